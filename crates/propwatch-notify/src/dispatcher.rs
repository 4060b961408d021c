use crate::error::{NotifyError, Result};
use crate::stats::StatisticsAggregator;
use crate::template::{self, Bindings};
use crate::utils::mask_recipient;
use crate::NotificationChannel;
use chrono::Utc;
use propwatch_common::types::{ChannelType, DeliveryLog, DeliveryStatus, MessageTemplate};
use propwatch_storage::DeliveryLogStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Attempt budget and backoff schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (1-based): base, 2x base, 4x base, ...
    ///
    /// ```
    /// use propwatch_notify::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.backoff(1), Duration::from_millis(100));
    /// assert_eq!(policy.backoff(3), Duration::from_millis(400));
    /// assert_eq!(policy.backoff(30), Duration::from_secs(5));
    /// ```
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

/// Provider callback outcome for a message that was already sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptOutcome {
    Delivered,
    Bounced,
}

impl ReceiptOutcome {
    fn status(self) -> DeliveryStatus {
        match self {
            Self::Delivered => DeliveryStatus::Delivered,
            Self::Bounced => DeliveryStatus::Bounced,
        }
    }
}

/// Renders templates and pushes them through the configured transports.
///
/// A delivery is one [`DeliveryLog`], created `pending` and then written
/// exactly once per transport attempt: a retry bumps `retry_count` in place,
/// the last attempt sets the final status. No lock is held while waiting
/// between attempts.
pub struct Dispatcher {
    channels: HashMap<ChannelType, Arc<dyn NotificationChannel>>,
    logs: Arc<dyn DeliveryLogStore>,
    stats: StatisticsAggregator,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        channels: Vec<Arc<dyn NotificationChannel>>,
        logs: Arc<dyn DeliveryLogStore>,
        policy: RetryPolicy,
    ) -> Self {
        let channels = channels
            .into_iter()
            .map(|channel| (channel.channel_type(), channel))
            .collect();
        Self {
            channels,
            stats: StatisticsAggregator::new(logs.clone()),
            logs,
            policy,
        }
    }

    pub fn has_channel(&self, channel: ChannelType) -> bool {
        self.channels.contains_key(&channel)
    }

    pub fn statistics(&self) -> &StatisticsAggregator {
        &self.stats
    }

    /// Sends `template` to `recipient` over `channel`.
    ///
    /// Transport failures do not make this return `Err`; they are recorded on
    /// the returned log.
    pub async fn send(
        &self,
        template: &MessageTemplate,
        recipient: &str,
        channel: ChannelType,
        bindings: &Bindings,
    ) -> Result<DeliveryLog> {
        self.deliver(template, recipient, channel, bindings, false)
            .await
    }

    /// Same as [`send`](Self::send) over the template's own channel, but the
    /// log is tagged as a test and kept out of statistics. Returns whether the
    /// provider accepted the message.
    pub async fn send_test(
        &self,
        template: &MessageTemplate,
        recipient: &str,
        bindings: &Bindings,
    ) -> Result<bool> {
        let log = self
            .deliver(template, recipient, template.channel_type, bindings, true)
            .await?;
        Ok(matches!(
            log.status,
            DeliveryStatus::Sent | DeliveryStatus::Delivered
        ))
    }

    async fn deliver(
        &self,
        template: &MessageTemplate,
        recipient: &str,
        channel: ChannelType,
        bindings: &Bindings,
        is_test: bool,
    ) -> Result<DeliveryLog> {
        if template.channel_type != channel {
            return Err(NotifyError::Validation(format!(
                "template {} is for {}, not {channel}",
                template.id, template.channel_type
            )));
        }
        let transport = self
            .channels
            .get(&channel)
            .cloned()
            .ok_or(NotifyError::NoTransport(channel))?;

        let message = template::render(template, bindings);
        let mut log = DeliveryLog::new(&template.id, recipient, channel, is_test);
        self.logs.insert_log(&log)?;

        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let outcome = transport.deliver(recipient, &message).await;
            log.updated_at = Utc::now();

            match outcome {
                Ok(receipt) => {
                    log.status = DeliveryStatus::Sent;
                    log.provider_message_id = receipt.provider_message_id;
                    log.last_error = None;
                    self.logs.update_log(&log)?;
                    self.stats.record(&log)?;
                    tracing::info!(
                        log_id = %log.id,
                        channel = %channel,
                        recipient = %mask_recipient(recipient),
                        attempt,
                        is_test,
                        "Notification sent"
                    );
                    return Ok(log);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    log.retry_count += 1;
                    log.last_error = Some(e.to_string());
                    self.logs.update_log(&log)?;
                    let wait = self.policy.backoff(log.retry_count);
                    tracing::warn!(
                        log_id = %log.id,
                        channel = %channel,
                        attempt,
                        error = %e,
                        backoff_ms = wait.as_millis() as u64,
                        "Delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    log.status = e.terminal_status();
                    log.last_error = Some(e.to_string());
                    self.logs.update_log(&log)?;
                    self.stats.record(&log)?;
                    tracing::error!(
                        log_id = %log.id,
                        channel = %channel,
                        recipient = %mask_recipient(recipient),
                        attempt,
                        status = %log.status,
                        error = %e,
                        "Notification delivery failed"
                    );
                    return Ok(log);
                }
            }
        }

        // The loop returns on its last attempt.
        Ok(log)
    }

    /// Records a delivery that never reached the transport as `failed`.
    pub fn record_undelivered(
        &self,
        template: &MessageTemplate,
        recipient: &str,
        channel: ChannelType,
        reason: &str,
    ) -> Result<DeliveryLog> {
        let mut log = DeliveryLog::new(&template.id, recipient, channel, false);
        log.status = DeliveryStatus::Failed;
        log.last_error = Some(reason.to_string());
        self.logs.insert_log(&log)?;
        self.stats.record(&log)?;
        tracing::error!(
            log_id = %log.id,
            channel = %channel,
            recipient = %mask_recipient(recipient),
            reason,
            "Notification not delivered"
        );
        Ok(log)
    }

    /// Fails logs still `pending` from a previous run, whose worker stopped
    /// before the last attempt. Returns how many were closed.
    ///
    /// Only call this before any worker has started sending.
    pub fn fail_interrupted(&self, logs: &[DeliveryLog]) -> Result<usize> {
        let mut closed = 0;
        for stale in logs.iter().filter(|l| l.status == DeliveryStatus::Pending) {
            let mut log = stale.clone();
            log.status = DeliveryStatus::Failed;
            log.last_error = Some(match &stale.last_error {
                Some(e) => format!("delivery interrupted by shutdown (last error: {e})"),
                None => "delivery interrupted by shutdown".to_string(),
            });
            log.updated_at = Utc::now();
            self.logs.update_log(&log)?;
            self.stats.record(&log)?;
            tracing::warn!(log_id = %log.id, channel = %log.channel, "Interrupted delivery marked failed");
            closed += 1;
        }
        Ok(closed)
    }

    /// Applies a provider delivery receipt to a sent log.
    ///
    /// Replaying a receipt that was already applied is a no-op.
    pub fn record_receipt(&self, log_id: &str, outcome: ReceiptOutcome) -> Result<DeliveryLog> {
        let mut log = self
            .logs
            .get_log(log_id)?
            .ok_or_else(|| NotifyError::NotFound {
                entity: "delivery_log",
                id: log_id.to_string(),
            })?;

        let next = outcome.status();
        if log.status == next {
            return Ok(log);
        }
        if log.status != DeliveryStatus::Sent || !log.status.can_transition_to(next) {
            return Err(NotifyError::InvalidTransition {
                id: log.id,
                from: log.status,
                to: next,
            });
        }

        log.status = next;
        log.updated_at = Utc::now();
        self.logs.update_log(&log)?;
        self.stats.record(&log)?;
        tracing::info!(log_id, status = %next, "Delivery receipt recorded");
        Ok(log)
    }

    pub fn list_logs(&self, limit: usize) -> Result<Vec<DeliveryLog>> {
        Ok(self.logs.list_logs(limit)?)
    }
}
