use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tern::orchestrator::{EngineConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_TOOL_ITERATIONS};
use tern::providers::configs::ProviderConfig;

pub const CONFIG_PATH_VAR: &str = "TERN_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "ternd.toml";

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address {}: {}", addr, e))
    }
}

#[derive(Debug, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    #[serde(default)]
    pub system_instruction: Option<String>,
    /// Model ids advertised by `/v1/models`; empty means the provider's model
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            system_instruction: None,
            models: Vec::new(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl EngineSettings {
    pub fn advertised_models(&self, provider: &ProviderConfig) -> Vec<String> {
        if self.models.is_empty() {
            vec![provider.model().to_string()]
        } else {
            self.models.clone()
        }
    }

    pub fn to_config(&self) -> EngineConfig {
        EngineConfig {
            max_tool_iterations: self.max_tool_iterations,
            system_instruction: self.system_instruction.clone(),
            channel_capacity: self.channel_capacity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolServerSettings {
    pub name: String,
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ToolServerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub tool_servers: Vec<ToolServerSettings>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("engine.max_tool_iterations", default_max_tool_iterations() as u64)?
            .set_default("engine.channel_capacity", default_channel_capacity() as u64)?
            .add_source(File::new(&path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("TERN")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("engine.models")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // serde reports "missing field `api_key`"
                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_tool_iterations() -> usize {
    DEFAULT_MAX_TOOL_ITERATIONS
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_timeout_secs() -> u64 {
    30
}
