//! Configuration error types

use thiserror::Error;

/// Errors raised while loading or validating gateway configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("credential key for {descriptor} unavailable: {reason}")]
    MissingKey { descriptor: String, reason: String },
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let config_err = Error::Config("missing field".into());
        assert_eq!(config_err.to_string(), "Configuration error: missing field");

        let io_err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        assert!(
            io_err.to_string().starts_with("I/O error:"),
            "got: {}",
            io_err
        );
    }

    #[test]
    fn missing_key_names_the_credential() {
        let err = Error::MissingKey {
            descriptor: "relay-a/primary".into(),
            reason: "env var RELAY_A_KEY not set".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("relay-a/primary"), "got: {msg}");
        assert!(msg.contains("RELAY_A_KEY"), "got: {msg}");
    }
}
