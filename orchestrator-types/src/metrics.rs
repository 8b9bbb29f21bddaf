//! Time-series metric value types (spec §3, §4.9).

use serde::{Deserialize, Serialize};

/// A single sample stored in a metric's ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDataPoint {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub value: f64,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub query_mode: Option<String>,
}

impl MetricDataPoint {
    pub fn now(value: f64) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp() as f64,
            value,
            model_id: None,
            tier: None,
            query_mode: None,
        }
    }
}

/// Named time window a metrics query can be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricRange {
    OneHour,
    SixHours,
    OneDay,
    SevenDays,
    ThirtyDays,
}

impl MetricRange {
    pub fn window_secs(&self) -> u64 {
        match self {
            MetricRange::OneHour => 3600,
            MetricRange::SixHours => 6 * 3600,
            MetricRange::OneDay => 24 * 3600,
            MetricRange::SevenDays => 7 * 24 * 3600,
            MetricRange::ThirtyDays => 30 * 24 * 3600,
        }
    }

    /// Downsampling bucket width, per spec §4.9: raw for 1h/6h, 10-minute
    /// buckets for 24h, 1-hour buckets for 7d/30d.
    pub fn bucket_interval_secs(&self) -> u64 {
        match self {
            MetricRange::OneHour | MetricRange::SixHours => 1,
            MetricRange::OneDay => 600,
            MetricRange::SevenDays | MetricRange::ThirtyDays => 3600,
        }
    }

    /// `compare()`'s bucket widths, distinct from `time_series()`'s: spec
    /// §4.9 gives these as an explicit 1m/5m/10m/1h/1h table.
    pub fn compare_bucket_interval_secs(&self) -> u64 {
        match self {
            MetricRange::OneHour => 60,
            MetricRange::SixHours => 300,
            MetricRange::OneDay => 600,
            MetricRange::SevenDays | MetricRange::ThirtyDays => 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_interval_matches_range_rules() {
        assert_eq!(MetricRange::OneHour.bucket_interval_secs(), 1);
        assert_eq!(MetricRange::OneDay.bucket_interval_secs(), 600);
        assert_eq!(MetricRange::SevenDays.bucket_interval_secs(), 3600);
    }
}
