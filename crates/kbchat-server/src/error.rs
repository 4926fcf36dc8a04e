use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// The environment variable that sets a dotted configuration path
pub fn to_env_var(field_path: &str) -> String {
    format!("KBCHAT_{}", field_path.replace('.', "__").to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("provider.api_key"), "KBCHAT_PROVIDER__API_KEY");
        assert_eq!(to_env_var("knowledge_base"), "KBCHAT_KNOWLEDGE_BASE");
    }
}
