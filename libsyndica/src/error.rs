//! Error types for Syndica

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyndicaError>;

#[derive(Error, Debug)]
pub enum SyndicaError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl SyndicaError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SyndicaError::InvalidInput(_) | SyndicaError::Unauthorized(_) => 3,
            SyndicaError::Credential(_) => 2,
            SyndicaError::Platform(PlatformError::Authentication(_)) => 2,
            SyndicaError::Platform(_) => 1,
            SyndicaError::Config(_) => 1,
            SyndicaError::Database(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Platform not configured: {0}")]
    PlatformNotConfigured(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to encode record field: {0}")]
    EncodingError(#[from] serde_json::Error),

    #[error("Failed to decode record field: {0}")]
    DecodeError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors surfaced by a platform driver call.
///
/// These are always isolated per platform by the orchestrator: one
/// platform's failure is recorded in that platform's publish record and
/// never aborts sibling platform attempts.
#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Publishing failed: {0}")]
    Publishing(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
}

#[derive(Error, Debug, Clone)]
pub enum CredentialError {
    #[error("No connected credential for platform: {0}")]
    NotConnected(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = SyndicaError::InvalidInput("Empty content".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_unauthorized() {
        let error = SyndicaError::Unauthorized("not the post owner".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_credential_error() {
        let error = SyndicaError::Credential(CredentialError::NotConnected("mastodon".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_authentication_error() {
        let error = SyndicaError::Platform(PlatformError::Authentication("bad token".to_string()));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_other_platform_errors() {
        for platform_error in [
            PlatformError::Validation("too long".to_string()),
            PlatformError::Publishing("rejected".to_string()),
            PlatformError::Network("connection refused".to_string()),
            PlatformError::Timeout("30s elapsed".to_string()),
            PlatformError::RateLimit("too many requests".to_string()),
        ] {
            let error = SyndicaError::Platform(platform_error);
            assert_eq!(error.exit_code(), 1);
        }
    }

    #[test]
    fn test_error_message_names_platform() {
        let error = SyndicaError::Credential(CredentialError::NotConnected("linkedin".to_string()));
        let message = format!("{}", error);
        assert!(message.contains("linkedin"));
        assert!(message.contains("No connected credential"));
    }

    #[test]
    fn test_error_message_formatting_validation() {
        let error = SyndicaError::Platform(PlatformError::Validation(
            "content exceeds maximum length of 500 characters".to_string(),
        ));
        assert_eq!(
            format!("{}", error),
            "Platform error: Content validation failed: content exceeds maximum length of 500 characters"
        );
    }

    #[test]
    fn test_error_conversion_from_config_error() {
        let config_error = ConfigError::MissingField("database.path".to_string());
        let error: SyndicaError = config_error.into();
        assert!(matches!(error, SyndicaError::Config(_)));
    }

    #[test]
    fn test_error_conversion_from_credential_error() {
        let cred_error = CredentialError::RefreshFailed("revoked upstream".to_string());
        let error: SyndicaError = cred_error.into();
        assert!(matches!(error, SyndicaError::Credential(_)));
    }

    #[test]
    fn test_platform_error_clone() {
        let original = PlatformError::Network("connection failed".to_string());
        let cloned = original.clone();
        assert_eq!(format!("{}", original), format!("{}", cloned));
    }
}
