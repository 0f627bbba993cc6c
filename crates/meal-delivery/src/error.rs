use meal_db::StoreError;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the engine and roster.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate (chart, meal) pair, refused transition, or a record that is
    /// still referenced.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The store stayed unavailable through every retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidInput,
    Unavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

impl DeliveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::NotFound(_) => ErrorKind::NotFound,
            DeliveryError::Conflict(_) => ErrorKind::Conflict,
            DeliveryError::InvalidInput(_) => ErrorKind::InvalidInput,
            DeliveryError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }
}

impl From<StoreError> for DeliveryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(m) => DeliveryError::NotFound(m),
            StoreError::Conflict(m) => DeliveryError::Conflict(m),
            StoreError::Unavailable(m) => DeliveryError::Unavailable(m),
        }
    }
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;
