//! These models represent the objects passed around by the engine
//!
//! There are several related formats we need to interact with:
//! - openai chat completion requests/responses, exchanged with HTTP clients
//! - backend messages/functions, sent from the orchestrator to the LLM
//! - tool server listings and results, exchanged with the capability providers
//!
//! These overlap to varying degrees. We convert at the edges into the
//! internal structs here; the internal models are not an exact match to any
//! one of the wire formats.
pub mod api;
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
