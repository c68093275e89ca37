use thiserror::Error;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("Attempted path traversal. Access denied.")]
    PathTraversal { requested: String },

    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("{reason}")]
    ReadError { path: String, reason: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VaultError {
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::InvalidInput(_) => "invalid_input",
            VaultError::PathTraversal { .. } => "path_traversal",
            VaultError::NotFound { .. } => "not_found",
            VaultError::ReadError { .. } => "read_error",
            VaultError::Internal(_) => "internal",
            VaultError::ConfigError(_) => "config",
            VaultError::Io(_) => "io",
        }
    }

    pub(crate) fn read(path: impl Into<String>, err: &std::io::Error) -> Self {
        VaultError::ReadError {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}
