use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("AUTHENTICATION: {0}")]
    Authentication(String),
    #[error("CONNECTIVITY: {0}")]
    Connectivity(String),
    #[error("INVALID_RANGE: {0}")]
    InvalidRange(String),
    #[error("QUERY: {0}")]
    Query(String),
    #[error("SECRET_STORE: {0}")]
    SecretStore(String),
    #[error("CONFIG: {0}")]
    Config(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Fatal errors halt the dashboard until the user fixes their credentials.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::Config(_))
    }

    /// Recoverable errors are shown inline with a retry prompt.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Query(_) | Self::Io(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AUTHENTICATION",
            Self::Connectivity(_) => "CONNECTIVITY",
            Self::InvalidRange(_) => "INVALID_RANGE",
            Self::Query(_) => "QUERY",
            Self::SecretStore(_) => "SECRET_STORE",
            Self::Config(_) => "CONFIG",
            Self::Io(_) => "IO_FAILURE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        match value.sqlite_error_code() {
            Some(
                rusqlite::ErrorCode::CannotOpen
                | rusqlite::ErrorCode::DatabaseBusy
                | rusqlite::ErrorCode::DatabaseLocked
                | rusqlite::ErrorCode::SystemIoFailure,
            ) => Self::Connectivity(value.to_string()),
            Some(rusqlite::ErrorCode::PermissionDenied | rusqlite::ErrorCode::AuthorizationForStatementDenied) => {
                Self::Authentication(value.to_string())
            }
            _ => Self::Query(value.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<keyring::Error> for AppError {
    fn from(value: keyring::Error) -> Self {
        Self::SecretStore(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn display_keeps_code_prefix() {
        let error = AppError::InvalidRange("start after end".to_string());
        assert_eq!(error.to_string(), "INVALID_RANGE: start after end");
        assert_eq!(error.code(), "INVALID_RANGE");
    }

    #[test]
    fn classification_separates_fatal_from_recoverable() {
        assert!(AppError::Authentication("bad token".to_string()).is_fatal());
        assert!(!AppError::Authentication("bad token".to_string()).is_recoverable());
        assert!(AppError::Connectivity("down".to_string()).is_recoverable());
        assert!(!AppError::Connectivity("down".to_string()).is_fatal());
    }

    #[test]
    fn sqlite_cannot_open_maps_to_connectivity() {
        let error = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
            Some("unable to open database file".to_string()),
        );
        assert!(matches!(AppError::from(error), AppError::Connectivity(_)));
    }
}
