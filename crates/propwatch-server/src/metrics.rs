use async_trait::async_trait;
use chrono::{DateTime, Utc};
use propwatch_common::types::MetricType;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Latest observation of one metric for one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReading {
    pub value: f64,
    /// Reading this one replaced, for change tracking.
    pub previous: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

/// Where rule evaluation gets metric values from.
///
/// `None` means the value is unavailable; evaluation of that target is
/// skipped.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn latest(&self, metric: MetricType, target_id: &str) -> Option<MetricReading>;
}

/// In-process cache fed by metric ingestion.
#[derive(Default)]
pub struct MetricCache {
    readings: Mutex<HashMap<(MetricType, String), MetricReading>>,
}

impl MetricCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` as the latest reading and returns it.
    pub fn record(&self, metric: MetricType, target_id: &str, value: f64) -> MetricReading {
        let mut readings = self
            .readings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = (metric, target_id.to_string());
        let previous = readings.get(&key).map(|r| r.value);
        let reading = MetricReading {
            value,
            previous,
            observed_at: Utc::now(),
        };
        readings.insert(key, reading.clone());
        reading
    }

    pub fn get(&self, metric: MetricType, target_id: &str) -> Option<MetricReading> {
        self.readings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(metric, target_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl MetricSource for MetricCache {
    async fn latest(&self, metric: MetricType, target_id: &str) -> Option<MetricReading> {
        self.get(metric, target_id)
    }
}
