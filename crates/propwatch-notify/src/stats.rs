use crate::error::Result;
use propwatch_common::types::{
    ChannelType, DateRange, DeliveryLog, DeliveryStatistic, DeliveryStatus, StatCounter,
};
use propwatch_storage::DeliveryLogStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Rolls delivery log transitions up into per-day, per-channel counters.
///
/// Each (log, counter) pair is applied at most once, so feeding the same
/// transition twice, or replaying logs after a restart, never double counts.
/// Test sends are ignored.
#[derive(Clone)]
pub struct StatisticsAggregator {
    store: Arc<dyn DeliveryLogStore>,
}

/// Counters implied by reaching `status`.
fn counters_for(status: DeliveryStatus) -> &'static [StatCounter] {
    match status {
        DeliveryStatus::Pending => &[],
        DeliveryStatus::Sent => &[StatCounter::Sent],
        DeliveryStatus::Delivered => &[StatCounter::Sent, StatCounter::Delivered],
        DeliveryStatus::Failed | DeliveryStatus::Bounced => &[StatCounter::Failed],
    }
}

impl StatisticsAggregator {
    pub fn new(store: Arc<dyn DeliveryLogStore>) -> Self {
        Self { store }
    }

    /// Applies the log's current status to its bucket.
    pub fn record(&self, log: &DeliveryLog) -> Result<()> {
        if log.is_test {
            return Ok(());
        }
        for &counter in counters_for(log.status) {
            let changed = self
                .store
                .apply_stat(&log.id, log.stat_date(), log.channel, counter)?;
            if changed {
                tracing::debug!(
                    log_id = %log.id,
                    channel = %log.channel,
                    counter = counter.as_str(),
                    "Delivery statistic updated"
                );
            }
        }
        Ok(())
    }

    /// Re-applies a batch of logs. Returns how many were processed.
    pub fn replay(&self, logs: &[DeliveryLog]) -> Result<usize> {
        for log in logs {
            self.record(log)?;
        }
        Ok(logs.len())
    }

    pub fn query(
        &self,
        range: &DateRange,
        channel: Option<ChannelType>,
    ) -> Result<StatisticsReport> {
        let buckets = self.store.query_statistics(range, channel)?;
        Ok(StatisticsReport::from_buckets(buckets))
    }
}

fn rate(delivered: u64, sent: u64) -> f64 {
    if sent == 0 {
        0.0
    } else {
        delivered as f64 / sent as f64
    }
}

/// Totals for one channel across the queried range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSummary {
    pub channel: ChannelType,
    pub total_sent: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub delivery_rate: f64,
}

/// Buckets for a date range plus their totals, overall and per channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsReport {
    pub buckets: Vec<DeliveryStatistic>,
    pub total_sent: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    pub delivery_rate: f64,
    /// Ordered by channel; channels without buckets are left out.
    pub by_channel: Vec<ChannelSummary>,
}

impl StatisticsReport {
    pub fn from_buckets(buckets: Vec<DeliveryStatistic>) -> Self {
        let mut per_channel: BTreeMap<ChannelType, (u64, u64, u64)> = BTreeMap::new();
        for b in &buckets {
            let totals = per_channel.entry(b.channel).or_default();
            totals.0 += b.total_sent;
            totals.1 += b.total_delivered;
            totals.2 += b.total_failed;
        }
        let by_channel: Vec<ChannelSummary> = per_channel
            .into_iter()
            .map(|(channel, (sent, delivered, failed))| ChannelSummary {
                channel,
                total_sent: sent,
                total_delivered: delivered,
                total_failed: failed,
                delivery_rate: rate(delivered, sent),
            })
            .collect();

        let total_sent: u64 = by_channel.iter().map(|c| c.total_sent).sum();
        let total_delivered: u64 = by_channel.iter().map(|c| c.total_delivered).sum();
        let total_failed: u64 = by_channel.iter().map(|c| c.total_failed).sum();
        Self {
            buckets,
            total_sent,
            total_delivered,
            total_failed,
            delivery_rate: rate(total_delivered, total_sent),
            by_channel,
        }
    }
}
