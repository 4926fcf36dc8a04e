use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use kbchat::agent::{DEFAULT_HISTORY_WINDOW, DEFAULT_MAX_CYCLES};
use kbchat::providers::configs::OpenAiProviderConfig;
use kbchat::systems::knowledge_base::DEFAULT_NUMBER_OF_RESULTS;
use kbchat::systems::{KnowledgeBaseConfig, WikiConfig};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

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
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

/// Any OpenAI compatible chat-completions endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_openai_host")]
    pub host: String,
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
}

impl ProviderSettings {
    pub fn into_config(self) -> OpenAiProviderConfig {
        OpenAiProviderConfig {
            host: self.host,
            api_key: self.api_key,
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeBaseSettings {
    pub endpoint: String,
    pub id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_number_of_results")]
    pub number_of_results: u32,
    #[serde(default)]
    pub min_score: Option<f64>,
}

impl KnowledgeBaseSettings {
    pub fn into_config(self) -> KnowledgeBaseConfig {
        KnowledgeBaseConfig {
            endpoint: self.endpoint,
            knowledge_base_id: self.id,
            api_key: self.api_key,
            number_of_results: self.number_of_results,
            min_score: self.min_score,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,
    /// Messages of history kept per session
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Overrides the bundled system prompt template
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
            history_window: default_history_window(),
            prompt_file: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    pub knowledge_base: KnowledgeBaseSettings,
    #[serde(default)]
    pub wiki: Option<WikiConfig>,
    #[serde(default)]
    pub agent: AgentSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("provider.host", default_openai_host())?
            .set_default("provider.model", default_model())?
            .set_default("provider.temperature", 0.2)?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("KBCHAT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                if let Some(path) = missing_field_path(&err.to_string()) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&path),
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

/// Read the dotted path out of "missing field `x`" and
/// "missing field `x` for key `y`" messages
fn missing_field_path(message: &str) -> Option<String> {
    let rest = message.strip_prefix("missing field `")?;
    let (field, rest) = rest.split_once('`')?;
    match rest
        .strip_prefix(" for key `")
        .and_then(|key| key.split_once('`'))
    {
        Some((key, _)) if !key.is_empty() => Some(format!("{}.{}", key, field)),
        _ => Some(field.to_string()),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_openai_host() -> String {
    "https://api.openai.com".to_string()
}

fn default_number_of_results() -> u32 {
    DEFAULT_NUMBER_OF_RESULTS
}

fn default_max_cycles() -> usize {
    DEFAULT_MAX_CYCLES
}

fn default_history_window() -> usize {
    DEFAULT_HISTORY_WINDOW
}
