use ulid::Ulid;

use crate::model::EntityKind;

#[derive(Debug)]
pub enum EngineError {
    NotFound { kind: EntityKind, id: Ulid },
    /// A required field is empty.
    Missing(&'static str),
    TooLong { field: &'static str, max: usize },
    Invalid(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            EngineError::Missing(field) => write!(f, "{field} is required"),
            EngineError::TooLong { field, max } => {
                write!(f, "{field} too long (max {max} bytes)")
            }
            EngineError::Invalid(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Storage faults abort the operation; everything else is the caller's input.
    pub fn is_storage(&self) -> bool {
        matches!(self, EngineError::WalError(_))
    }
}
