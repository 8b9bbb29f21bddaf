//! Metrics Aggregator (spec §4.9).
//!
//! In-memory ring buffers, matching `original_source/metrics_aggregator.py`'s
//! design rather than the teacher's SQLite-backed `metrics.rs`: spec §3
//! calls for a fixed-capacity ring, not a database.

use orchestrator_types::{MetricDataPoint, MetricRange, MetricSummary};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

const RING_CAPACITY_PER_METRIC: usize = 20_000;
const TTL_SWEEP_INTERVAL_SECS: u64 = 3600;
/// Beyond 30 days a point is stale regardless of metric-specific query range.
const MAX_RETENTION_SECS: f64 = 30.0 * 24.0 * 3600.0;

#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    pub model_id: Option<String>,
    pub tier: Option<String>,
    pub query_mode: Option<String>,
}

impl TagFilter {
    fn matches(&self, point: &MetricDataPoint) -> bool {
        if let Some(model_id) = &self.model_id {
            if point.model_id.as_deref() != Some(model_id.as_str()) {
                return false;
            }
        }
        if let Some(tier) = &self.tier {
            if point.tier.as_deref() != Some(tier.as_str()) {
                return false;
            }
        }
        if let Some(mode) = &self.query_mode {
            if point.query_mode.as_deref() != Some(mode.as_str()) {
                return false;
            }
        }
        true
    }
}

pub struct TimeSeriesResult {
    pub points: Vec<MetricDataPoint>,
    pub summary: MetricSummary,
}

/// A single lock guards every ring buffer; per-call critical sections are
/// O(N-window) against the ring's expected ≤ 10³ records/sec ingestion rate.
pub struct MetricsAggregator {
    buffers: Arc<RwLock<HashMap<String, VecDeque<MetricDataPoint>>>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            buffers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn record(&self, metric: &str, point: MetricDataPoint) {
        let mut buffers = self.buffers.write().await;
        let ring = buffers.entry(metric.to_string()).or_insert_with(|| {
            VecDeque::with_capacity(RING_CAPACITY_PER_METRIC)
        });
        if ring.len() >= RING_CAPACITY_PER_METRIC {
            ring.pop_front();
        }
        ring.push_back(point);
    }

    pub async fn time_series(
        &self,
        metric: &str,
        range: MetricRange,
        filters: &TagFilter,
    ) -> TimeSeriesResult {
        let buffers = self.buffers.read().await;
        let now = chrono::Utc::now().timestamp() as f64;
        let cutoff = now - range.window_secs() as f64;

        let filtered: Vec<MetricDataPoint> = buffers
            .get(metric)
            .map(|ring| {
                ring.iter()
                    .filter(|p| p.timestamp >= cutoff && filters.matches(p))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let bucket_secs = range.bucket_interval_secs();
        let points = if bucket_secs <= 1 {
            filtered.clone()
        } else {
            downsample(&filtered, cutoff, range.window_secs(), bucket_secs)
        };
        let summary = summarize(&filtered);
        TimeSeriesResult { points, summary }
    }

    pub async fn summary(&self, metric: &str, range: MetricRange) -> MetricSummary {
        self.time_series(metric, range, &TagFilter::default()).await.summary
    }

    /// Aligned-bucket series per metric, using `compare()`'s own bucket table
    /// (distinct from `time_series()`'s downsampling rule).
    pub async fn compare(
        &self,
        metrics: &[String],
        range: MetricRange,
    ) -> HashMap<String, Vec<MetricDataPoint>> {
        let buffers = self.buffers.read().await;
        let now = chrono::Utc::now().timestamp() as f64;
        let cutoff = now - range.window_secs() as f64;
        let bucket_secs = range.compare_bucket_interval_secs();

        let mut out = HashMap::new();
        for metric in metrics {
            let filtered: Vec<MetricDataPoint> = buffers
                .get(metric)
                .map(|ring| {
                    ring.iter()
                        .filter(|p| p.timestamp >= cutoff)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            out.insert(metric.clone(), downsample(&filtered, cutoff, range.window_secs(), bucket_secs));
        }
        out
    }

    pub async fn model_breakdown(
        &self,
        metric: &str,
        range: MetricRange,
    ) -> HashMap<String, MetricSummary> {
        let buffers = self.buffers.read().await;
        let now = chrono::Utc::now().timestamp() as f64;
        let cutoff = now - range.window_secs() as f64;

        let mut by_model: HashMap<String, Vec<f64>> = HashMap::new();
        if let Some(ring) = buffers.get(metric) {
            for point in ring.iter().filter(|p| p.timestamp >= cutoff) {
                if let Some(model_id) = &point.model_id {
                    by_model.entry(model_id.clone()).or_default().push(point.value);
                }
            }
        }

        by_model
            .into_iter()
            .map(|(model_id, values)| (model_id, summarize_values(&values)))
            .collect()
    }

    /// Drops points older than 30 days independent of the ring's automatic
    /// capacity-based eviction. Intended to run on an hourly tick.
    pub async fn sweep_ttl(&self) {
        let mut buffers = self.buffers.write().await;
        let now = chrono::Utc::now().timestamp() as f64;
        for ring in buffers.values_mut() {
            while let Some(front) = ring.front() {
                if now - front.timestamp > MAX_RETENTION_SECS {
                    ring.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Spawns the hourly TTL sweep; cancellable by dropping the returned handle.
    pub fn spawn_ttl_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(TTL_SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                aggregator.sweep_ttl().await;
            }
        })
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Bucket grid is anchored to `cutoff` (the range's start), not the first
/// data point, and always emits `ceil(window_secs / bucket_secs)` buckets so
/// callers can rely on a fixed-length series regardless of data sparsity.
/// Empty buckets carry a `value` of `0.0` and no tags.
fn downsample(points: &[MetricDataPoint], cutoff: f64, window_secs: u64, bucket_secs: u64) -> Vec<MetricDataPoint> {
    let bucket_count = (window_secs as f64 / bucket_secs as f64).ceil() as usize;
    if bucket_count == 0 {
        return Vec::new();
    }

    let mut buckets: Vec<Vec<&MetricDataPoint>> = vec![Vec::new(); bucket_count];
    for point in points {
        let offset = point.timestamp - cutoff;
        if offset < 0.0 {
            continue;
        }
        let index = (offset / bucket_secs as f64) as usize;
        if index < bucket_count {
            buckets[index].push(point);
        }
    }

    buckets
        .into_iter()
        .enumerate()
        .map(|(index, bucket)| {
            let bucket_start = cutoff + (index as u64 * bucket_secs) as f64;
            if bucket.is_empty() {
                return MetricDataPoint {
                    timestamp: bucket_start,
                    value: 0.0,
                    model_id: None,
                    tier: None,
                    query_mode: None,
                };
            }
            let avg = bucket.iter().map(|p| p.value).sum::<f64>() / bucket.len() as f64;
            let first = bucket[0];
            MetricDataPoint {
                timestamp: bucket_start,
                value: avg,
                model_id: first.model_id.clone(),
                tier: first.tier.clone(),
                query_mode: first.query_mode.clone(),
            }
        })
        .collect()
}

fn summarize(points: &[MetricDataPoint]) -> MetricSummary {
    summarize_values(&points.iter().map(|p| p.value).collect::<Vec<_>>())
}

fn summarize_values(values: &[f64]) -> MetricSummary {
    if values.is_empty() {
        return MetricSummary { min: 0.0, max: 0.0, avg: 0.0, p50: 0.0, p95: 0.0, p99: 0.0 };
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let avg = sorted.iter().sum::<f64>() / sorted.len() as f64;
    MetricSummary {
        min,
        max,
        avg,
        p50: percentile(&sorted, 0.50),
        p95: percentile(&sorted, 0.95),
        p99: percentile(&sorted, 0.99),
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
