use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize)]
pub enum AppError {
    /// The embedding collaborator failed or returned an unusable vector.
    EmbeddingFailure(String),
    /// The template catalog is empty or its embeddings disagree in dimension.
    NoCatalog(String),
    /// A template placeholder has no value in the supplied parameters.
    MissingParameter(String),
    /// The bound statement failed against the store.
    ExecutionFailure(String),
    ValidationError(String),
    ConfigError(String),
    DatabaseError(String),
    Internal(String),
}

impl AppError {
    /// True for errors the caller can fix by changing its input.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            AppError::MissingParameter(_) | AppError::ValidationError(_)
        )
    }

    /// Message shown to API clients. Validation messages go out bare.
    pub fn client_message(&self) -> String {
        match self {
            AppError::ValidationError(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::EmbeddingFailure(msg) => write!(f, "Embedding failure: {}", msg),
            AppError::NoCatalog(msg) => write!(f, "No usable template catalog: {}", msg),
            AppError::MissingParameter(name) => {
                write!(f, "Missing value for parameter: {}", name)
            }
            AppError::ExecutionFailure(msg) => write!(f, "Execution failure: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
