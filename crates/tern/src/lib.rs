pub mod conversation;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod prompt_template;
pub mod providers;
pub mod registry;
pub mod relay;
pub mod router;
pub mod schema;
pub mod servers;
