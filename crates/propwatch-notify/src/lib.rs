//! Notification rendering and delivery with pluggable channel support.
//!
//! Templates are rendered by [`template::render`], handed to a
//! [`NotificationChannel`] by the [`dispatcher::Dispatcher`], and every
//! attempt is written to the delivery log that feeds
//! [`stats::StatisticsAggregator`]. Built-in channels are email (SMTP),
//! SMS (HTTP gateway) and push (HTTP push gateway).

pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod plugin;
pub mod queue;
pub mod stats;
pub mod template;
pub mod utils;


use async_trait::async_trait;
use error::DeliveryError;
use propwatch_common::types::ChannelType;
use serde::Serialize;

pub use dispatcher::{Dispatcher, ReceiptOutcome, RetryPolicy};
pub use error::{NotifyError, Result};
pub use queue::{DeliveryJob, DeliveryQueue, DeliveryTicket};
pub use stats::{ChannelSummary, StatisticsAggregator, StatisticsReport};
pub use template::Bindings;

/// Content produced by rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    /// Only present for channels with a subject line.
    pub subject: Option<String>,
    pub body: String,
}

/// What a provider told us after accepting a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub provider_message_id: Option<String>,
}

/// A transport that hands one rendered message to one recipient.
///
/// Implementations are created by the matching [`plugin::ChannelPlugin`].
/// They make exactly one attempt per call; retries belong to the
/// dispatcher.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Delivers `message` to `recipient`.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::Transient`] when a later attempt may succeed,
    /// otherwise a permanent variant.
    async fn deliver(
        &self,
        recipient: &str,
        message: &RenderedMessage,
    ) -> std::result::Result<SendReceipt, DeliveryError>;

    fn channel_type(&self) -> ChannelType;

    /// Identifier of the configured instance this channel was built from.
    fn instance_id(&self) -> &str;
}
