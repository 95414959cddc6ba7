//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (poll interval > 0, buffers > 0)
//! - Check extension conventions
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ServerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.routing.extensions.is_empty() {
        errors.push(ValidationError {
            field: "routing.extensions",
            message: "at least one handler extension is required".into(),
        });
    }
    for ext in &config.routing.extensions {
        if ext.is_empty() || ext.contains('.') || ext.contains('/') {
            errors.push(ValidationError {
                field: "routing.extensions",
                message: format!("'{ext}' must be a bare extension without dots or slashes"),
            });
        }
    }

    for (ext, command) in &config.loader.interpreters {
        if command.is_empty() {
            errors.push(ValidationError {
                field: "loader.interpreters",
                message: format!("interpreter for '{ext}' has no program"),
            });
        }
    }

    if config.listener.host.is_empty() {
        errors.push(ValidationError {
            field: "listener.host",
            message: "must not be empty".into(),
        });
    }
    if config.limits.stream_buffer_chunks == 0 {
        errors.push(ValidationError {
            field: "limits.stream_buffer_chunks",
            message: "must be greater than zero".into(),
        });
    }
    if config.compression.min_bytes == 0 {
        errors.push(ValidationError {
            field: "compression.min_bytes",
            message: "must be greater than zero".into(),
        });
    }
    if config.lifecycle.drain_poll_ms == 0 {
        errors.push(ValidationError {
            field: "lifecycle.drain_poll_ms",
            message: "must be greater than zero".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = ServerConfig::default();
        config.routing.extensions = vec![".ts".into()];
        config.lifecycle.drain_poll_ms = 0;
        config.limits.stream_buffer_chunks = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.field == "routing.extensions"));
        assert!(errors.iter().any(|e| e.field == "lifecycle.drain_poll_ms"));
    }
}
