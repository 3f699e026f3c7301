use std::net::SocketAddr;

use crate::config::models::{AuthConfig, GatewayConfig, KeySourceConfig, RepositoryConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration, collecting every problem.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        errors.extend(Self::validate_repository(&config.repository));

        if let Err(e) = Self::validate_duration(
            &config.change_detector.interval,
            "change_detector.interval",
        ) {
            errors.push(e);
        }
        if config.change_detector.channel_capacity == 0 {
            errors.push(ValidationError::InvalidField {
                field: "change_detector.channel_capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if let Some(auth) = &config.auth {
            errors.extend(Self::validate_auth(auth));
        }

        if let Err(e) = Self::validate_duration(&config.shutdown.drain_timeout, "shutdown.drain_timeout")
        {
            errors.push(e);
        }

        if config.logging.level.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "logging.level".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_repository(repository: &RepositoryConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        match repository {
            RepositoryConfig::File { path } => {
                if path.trim().is_empty() {
                    errors.push(ValidationError::MissingField {
                        field: "repository.path".to_string(),
                    });
                }
            }
            RepositoryConfig::Http { url, timeout_secs } => {
                if let Err(e) = Self::validate_url(url, "repository.url") {
                    errors.push(e);
                }
                if *timeout_secs == 0 {
                    errors.push(ValidationError::InvalidField {
                        field: "repository.timeout_secs".to_string(),
                        message: "must be greater than zero".to_string(),
                    });
                }
            }
        }
        errors
    }

    fn validate_auth(auth: &AuthConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        match auth {
            AuthConfig::Remote {
                url,
                timeout,
                negative_ttl,
            } => {
                if let Err(e) = Self::validate_url(url, "auth.url") {
                    errors.push(e);
                }
                if let Err(e) = Self::validate_duration(timeout, "auth.timeout") {
                    errors.push(e);
                }
                if let Err(e) = Self::validate_duration(negative_ttl, "auth.negative_ttl") {
                    errors.push(e);
                }
            }
            AuthConfig::Jwt {
                key_source,
                refresh_interval,
                negative_ttl,
            } => {
                match key_source {
                    KeySourceConfig::Env { var } if var.trim().is_empty() => {
                        errors.push(ValidationError::MissingField {
                            field: "auth.key_source.var".to_string(),
                        });
                    }
                    KeySourceConfig::Static { key } if key.is_empty() => {
                        errors.push(ValidationError::MissingField {
                            field: "auth.key_source.key".to_string(),
                        });
                    }
                    KeySourceConfig::Http { url, field } => {
                        if let Err(e) = Self::validate_url(url, "auth.key_source.url") {
                            errors.push(e);
                        }
                        if field.trim().is_empty() {
                            errors.push(ValidationError::MissingField {
                                field: "auth.key_source.field".to_string(),
                            });
                        }
                    }
                    _ => {}
                }
                if let Err(e) = Self::validate_duration(refresh_interval, "auth.refresh_interval")
                {
                    errors.push(e);
                }
                if let Err(e) = Self::validate_duration(negative_ttl, "auth.negative_ttl") {
                    errors.push(e);
                }
            }
        }
        errors
    }

    fn validate_duration(raw: &str, field: &str) -> ValidationResult<()> {
        match humantime::parse_duration(raw) {
            Ok(d) if d.is_zero() => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: "duration must be greater than zero".to_string(),
            }),
            Ok(_) => Ok(()),
            Err(e) => Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("Invalid duration '{raw}': {e}"),
            }),
        }
    }

    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
