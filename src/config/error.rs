use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that failed to parse.
    #[error("failed to parse {name}={value:?}")]
    ParseError { name: &'static str, value: String },

    /// A setting was outside its valid range.
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}
