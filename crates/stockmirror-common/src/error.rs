//! Error types shared across stockmirror crates

use thiserror::Error;

/// Result type alias for stockmirror operations
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Base error type for cross-cutting failures
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = MirrorError::Config("missing API key".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing API key");
    }

    #[test]
    fn test_unknown_entity_display() {
        let err = MirrorError::UnknownEntity("gadgets".to_string());
        assert_eq!(err.to_string(), "Unknown entity type: gadgets");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: MirrorError = io.into();
        assert!(matches!(err, MirrorError::Io(_)));
    }
}
