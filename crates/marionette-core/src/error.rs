//! Error types for the Marionette toolkit

use thiserror::Error;

/// Main error type for Marionette operations
#[derive(Error, Debug)]
pub enum Error {
    /// Initialization error
    #[error("Initialization failed: {0}")]
    Init(String),

    /// Invalid configuration rejected at setter time
    #[error("Config error: {0}")]
    Config(String),

    /// A bone named in the configuration does not exist in the host
    #[error("Missing bone: {0}")]
    MissingBone(String),

    /// The host skeleton or scene returned inconsistent data
    #[error("Host error: {0}")]
    Host(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using Marionette Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::Config("iterations must be at least 1".to_string());
        assert!(err.to_string().contains("Config error"));
    }

    #[test]
    fn missing_bone_names_the_bone() {
        let err = Error::MissingBone("LeftForearm".to_string());
        assert!(err.to_string().contains("LeftForearm"));
    }
}
