//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{Environment, ServerConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, apply environment overrides and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: ServerConfig = toml::from_str(&content)?;

    apply_env(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay the mode flags from the environment.
///
/// `FaasEnv` selects development/production and `FaasMode` the deployment
/// mode. This is the only place the process environment is consulted; the
/// resulting typed config is threaded through everything else.
pub fn apply_env<F>(config: &mut ServerConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(env) = lookup("FaasEnv").filter(|v| !v.is_empty()) {
        match env.parse::<Environment>() {
            Ok(env) => config.mode.env = env,
            Err(e) => tracing::warn!(value = %env, error = %e, "Ignoring FaasEnv"),
        }
    }

    if let Some(mode) = lookup("FaasMode").filter(|v| !v.is_empty()) {
        config.mode.deploy = mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn env_overrides_mode() {
        let mut config = ServerConfig::default();
        apply_env(&mut config, |key| match key {
            "FaasEnv" => Some("production".into()),
            "FaasMode" => Some("distributed".into()),
            _ => None,
        });
        assert_eq!(config.mode.env, Environment::Production);
        assert_eq!(config.mode.deploy, "distributed");
    }

    #[test]
    fn bad_env_value_is_ignored() {
        let mut config = ServerConfig::default();
        apply_env(&mut config, |key| (key == "FaasEnv").then(|| "staging".to_string()));
        assert_eq!(config.mode.env, Environment::Development);
    }

    #[test]
    fn invalid_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[routing]\nextensions = []").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("routing.extensions"));
    }
}
