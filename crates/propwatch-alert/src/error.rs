use propwatch_common::types::AlertStatus;
use propwatch_storage::error::StorageError;

/// Errors surfaced synchronously by rule authoring and instance management.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// The rule is malformed and was not persisted.
    #[error("Alert: invalid rule: {0}")]
    Validation(String),

    /// The requested lifecycle move is not allowed from the current status.
    /// Nothing was mutated.
    #[error("Alert: cannot {action} instance {id} while it is {from}")]
    InvalidTransition {
        id: String,
        from: AlertStatus,
        action: &'static str,
    },

    #[error("Alert: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, AlertError>;
