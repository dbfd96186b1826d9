use std::net::{SocketAddr, ToSocketAddrs};

use tracing_subscriber::EnvFilter;

use crate::{
    config::models::{GatewayConfig, LoggingConfig, ServerConfig},
    core::CorsConfig,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid CORS configuration: {message}")]
    InvalidCors { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Checks a loaded configuration and reports every problem at once.
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        errors.extend(Self::validate_server(&config.server));
        if let Some(cors) = &config.server.cors {
            errors.extend(Self::validate_cors(cors));
        }
        if let Err(e) = Self::validate_logging(&config.logging) {
            errors.push(e);
        }
        if let Some(dir) = &config.deployment.artifacts_dir {
            if !dir.is_dir() {
                errors.push(ValidationError::InvalidField {
                    field: "deployment.artifacts_dir".to_string(),
                    message: format!("'{}' is not a directory", dir.display()),
                });
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(&errors),
            }),
        }
    }

    fn validate_server(server: &ServerConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if server.hostname.trim().is_empty() {
            errors.push(ValidationError::InvalidListenAddress {
                address: server.listen_address(),
                reason: "hostname must not be empty".to_string(),
            });
        } else if let Err(reason) = Self::resolve_listen_address(&server.listen_address()) {
            errors.push(ValidationError::InvalidListenAddress {
                address: server.listen_address(),
                reason,
            });
        }

        if let Err(e) = humantime::parse_duration(&server.shutdown_timeout) {
            errors.push(ValidationError::InvalidField {
                field: "server.shutdown_timeout".to_string(),
                message: format!("'{}' is not a duration: {e}", server.shutdown_timeout),
            });
        }

        if server.max_body_bytes == 0 {
            errors.push(ValidationError::InvalidField {
                field: "server.max_body_bytes".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        errors
    }

    fn resolve_listen_address(address: &str) -> Result<SocketAddr, String> {
        if let Ok(addr) = address.parse::<SocketAddr>() {
            return Ok(addr);
        }
        address
            .to_socket_addrs()
            .map_err(|e| e.to_string())?
            .next()
            .ok_or_else(|| "hostname did not resolve to any address".to_string())
    }

    fn validate_cors(cors: &CorsConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if cors.enabled && cors.allow_origins.is_empty() {
            errors.push(ValidationError::InvalidCors {
                message: "allow_origins must not be empty when CORS is enabled".to_string(),
            });
        }
        for method in &cors.allow_methods {
            if http::Method::from_bytes(method.as_bytes()).is_err() {
                errors.push(ValidationError::InvalidCors {
                    message: format!("invalid method in allow_methods: {method}"),
                });
            }
        }
        for header in cors.allow_headers.iter().chain(&cors.expose_headers) {
            if http::HeaderName::from_bytes(header.as_bytes()).is_err() {
                errors.push(ValidationError::InvalidCors {
                    message: format!("invalid header name: {header}"),
                });
            }
        }
        errors
    }

    fn validate_logging(logging: &LoggingConfig) -> ValidationResult<()> {
        EnvFilter::try_new(&logging.level)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidField {
                field: "logging.level".to_string(),
                message: e.to_string(),
            })
    }

    fn format_multiple_errors(errors: &[ValidationError]) -> String {
        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::GatewayConfigBuilder;

    fn minimal_valid_config() -> GatewayConfig {
        GatewayConfigBuilder::new().hostname("127.0.0.1").port(0).build()
    }

    #[test]
    fn test_valid_config() {
        assert!(ServerConfigValidator::validate(&minimal_valid_config()).is_ok());
    }

    #[test]
    fn test_bad_shutdown_timeout() {
        let config = GatewayConfigBuilder::new()
            .hostname("127.0.0.1")
            .shutdown_timeout("soon")
            .build();
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("server.shutdown_timeout"));
    }

    #[test]
    fn test_bad_cors() {
        let config = GatewayConfigBuilder::new()
            .hostname("127.0.0.1")
            .default_cors(CorsConfig {
                enabled: true,
                allow_origins: vec![],
                allow_headers: vec!["bad header".into()],
                ..CorsConfig::default()
            })
            .build();
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Found 2 validation errors"));
        assert!(message.contains("allow_origins"));
        assert!(message.contains("bad header"));
    }

    #[test]
    fn test_multiple_errors_are_aggregated() {
        let mut config = minimal_valid_config();
        config.server.hostname = String::new();
        config.server.max_body_bytes = 0;
        config.logging.level = "foo=notalevel".to_string();

        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(matches!(err, ValidationError::ValidationFailed { .. }));
        assert!(err.to_string().contains("Found 3 validation errors"));
    }

    #[test]
    fn test_missing_artifacts_dir() {
        let mut config = minimal_valid_config();
        config.deployment.artifacts_dir = Some("/definitely/not/here".into());
        assert!(ServerConfigValidator::validate(&config).is_err());
    }
}
