use std::io;

/// Custom error type for cloudbuild_notify operations
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    #[error("Could not decode build event: {0}")]
    DecodeError(#[from] serde_json::Error),

    #[error("Commit lookup failed: {0}")]
    FetchError(String),

    #[error("Chat delivery failed: {0}")]
    DeliveryError(String),

    #[error("Acknowledgement failed: {0}")]
    AckError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Helper type for Results that use NotifyError
pub type Result<T> = std::result::Result<T, NotifyError>;
