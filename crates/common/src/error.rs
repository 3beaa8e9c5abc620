//! Startup and configuration errors

use thiserror::Error;

/// Errors raised while loading configuration or key material.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_setting() {
        let err = Error::Config("store.path must not be empty".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: store.path must not be empty"
        );
    }

    #[test]
    fn toml_errors_convert() {
        let parse: std::result::Result<toml::Table, _> = toml::from_str("[server\nlisten_addr =");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Toml(_)), "got {err:?}");
        assert!(err.to_string().starts_with("TOML parse error:"));
    }
}
