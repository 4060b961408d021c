use propwatch_common::types::{ChannelType, DeliveryStatus};
use propwatch_storage::error::StorageError;

/// Errors returned synchronously by the notification subsystem.
///
/// Transport failures are not reported through this type: they end up on the
/// [`DeliveryLog`](propwatch_common::types::DeliveryLog) as a status and
/// `last_error`, see [`DeliveryError`].
///
/// # Examples
///
/// ```rust
/// use propwatch_notify::error::NotifyError;
///
/// let err = NotifyError::Validation("body must not be empty".to_string());
/// assert!(err.to_string().contains("body"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// A template field is malformed; nothing was persisted.
    #[error("Notify: invalid template: {0}")]
    Validation(String),

    /// The template body cannot produce a useful message.
    #[error("Notify: template rendering error: {0}")]
    TemplateError(String),

    /// No transport is configured for the requested channel.
    #[error("Notify: no {0} transport configured")]
    NoTransport(ChannelType),

    #[error("Notify: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A delivery receipt does not apply to the log's current status.
    #[error("Notify: delivery {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    /// The delivery queue is at capacity.
    #[error("Notify: delivery queue is full")]
    QueueFull,

    /// The delivery workers have shut down.
    #[error("Notify: delivery queue is closed")]
    QueueClosed,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Outcome of a single failed transport attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Timeouts, throttling, 5xx. Retried with backoff.
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The provider refused the message or the recipient is malformed.
    #[error("delivery rejected: {0}")]
    Rejected(String),

    /// The provider reported the address as undeliverable.
    #[error("delivery bounced: {0}")]
    Bounced(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Status a log takes when this error ends the delivery.
    pub fn terminal_status(&self) -> DeliveryStatus {
        match self {
            Self::Transient(_) | Self::Rejected(_) => DeliveryStatus::Failed,
            Self::Bounced(_) => DeliveryStatus::Bounced,
        }
    }

    /// Maps a non-success HTTP status from a gateway.
    ///
    /// 408, 429 and 5xx are worth retrying; any other 4xx is permanent, and
    /// 410 means the address itself is gone.
    pub fn from_http_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {status}: {body}");
        match status {
            408 | 429 => Self::Transient(detail),
            410 => Self::Bounced(detail),
            400..=499 => Self::Rejected(detail),
            _ => Self::Transient(detail),
        }
    }
}
