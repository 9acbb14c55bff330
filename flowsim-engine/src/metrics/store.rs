//! Bounded per-metric point storage with live subscriptions
//!
//! Points live in per-metric rings capped by count and by retention
//! window. Writers never block: full subscriber channels drop the batch
//! for that subscriber, closed ones are pruned on the next write.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::spec::Aggregation;
use crate::config::EngineConfig;

/// Buffer size of each subscriber channel
const SUBSCRIBER_BUFFER: usize = 64;

/// Unique identifier for a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricId(pub Uuid);

impl MetricId {
    /// Generate a new metric ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from string
    pub fn parse_str(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for MetricId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MetricId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One stored sample of a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Wall or simulated timestamp, per the canvas timeline
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl MetricPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            value,
            tags: BTreeMap::new(),
        }
    }
}

/// Point query over one metric
#[derive(Debug, Clone, Default)]
pub struct MetricQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub tag_filters: BTreeMap<String, String>,
}

/// Result page of a point query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Matching points in timestamp-ascending order
    pub points: Vec<MetricPoint>,
    /// Size of the full matching set, not just this page
    pub total_rows: usize,
    pub has_more: bool,
}

/// Windowed aggregation request
#[derive(Debug, Clone)]
pub struct AggregateQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub window: Duration,
    pub functions: Vec<Aggregation>,
    pub tag_filters: BTreeMap<String, String>,
}

/// One aggregation window; empty windows are omitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateBucket {
    pub window_start: DateTime<Utc>,
    pub count: usize,
    /// Requested function name to aggregated value
    pub values: BTreeMap<String, f64>,
}

/// Storage statistics for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub total_points: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    /// Events dropped before aggregation because a spec buffer was full
    pub dropped_events: u64,
}

/// Batch of appended points delivered to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricUpdateBatch {
    pub metric_id: MetricId,
    pub points: Vec<MetricPoint>,
}

/// Live subscription to metric appends.
///
/// Dropping the subscription, or calling the store's `unsubscribe`, closes
/// the channel; the store prunes the sender on its next write.
pub struct Subscription {
    /// Subscriber handle, usable with `unsubscribe`
    pub id: u64,
    /// Update stream
    pub rx: mpsc::Receiver<MetricUpdateBatch>,
}

/// Contract for metric point storage
pub trait MetricStore: Send + Sync {
    /// Append a point; oldest points are evicted when the ring is full
    fn write_point(&self, metric: MetricId, point: MetricPoint);

    /// Page through stored points in timestamp-ascending order
    fn query(&self, metric: MetricId, query: &MetricQuery) -> QueryResult;

    /// Aggregate stored points into fixed windows
    fn aggregate(&self, metric: MetricId, query: &AggregateQuery) -> Vec<AggregateBucket>;

    /// Subscribe to appends for the given metrics; empty means all
    fn subscribe(&self, metric_ids: &[MetricId]) -> Subscription;

    /// Drop a subscriber, closing its channel
    fn unsubscribe(&self, subscription_id: u64);

    /// Storage statistics for one metric
    fn stats(&self, metric: MetricId) -> Option<MetricStats>;

    /// Count events dropped upstream of this metric
    fn record_dropped(&self, metric: MetricId, count: u64);

    /// Remove all stored points, keeping subscribers
    fn clear(&self);

    /// Release subscribers and refuse further writes
    fn close(&self);
}

struct MetricRing {
    points: VecDeque<MetricPoint>,
    dropped: u64,
}

impl MetricRing {
    fn new() -> Self {
        Self {
            points: VecDeque::new(),
            dropped: 0,
        }
    }
}

struct Subscriber {
    id: u64,
    /// `None` subscribes to every metric
    metrics: Option<HashSet<MetricId>>,
    tx: mpsc::Sender<MetricUpdateBatch>,
}

/// In-memory ring-buffer metric store
pub struct RingMetricStore {
    capacity: usize,
    retention: chrono::Duration,
    rings: RwLock<HashMap<MetricId, MetricRing>>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscriber: AtomicU64,
    closed: AtomicBool,
}

impl RingMetricStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            capacity: config.metric_ring_capacity,
            retention: chrono::Duration::from_std(config.metric_retention)
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
            rings: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    fn matches(point: &MetricPoint, query_tags: &BTreeMap<String, String>) -> bool {
        query_tags
            .iter()
            .all(|(k, v)| point.tags.get(k).map_or(false, |t| t == v))
    }

    fn publish(&self, metric: MetricId, point: &MetricPoint) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| {
            if let Some(metrics) = &sub.metrics {
                if !metrics.contains(&metric) {
                    return !sub.tx.is_closed();
                }
            }
            let batch = MetricUpdateBatch {
                metric_id: metric,
                points: vec![point.clone()],
            };
            match sub.tx.try_send(batch) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber = sub.id, metric = %metric, "subscriber buffer full, dropping batch");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(subscriber = sub.id, "pruning closed subscriber");
                    false
                }
            }
        });
    }
}

impl MetricStore for RingMetricStore {
    fn write_point(&self, metric: MetricId, point: MetricPoint) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut rings = self.rings.write();
            let ring = rings.entry(metric).or_insert_with(MetricRing::new);
            ring.points.push_back(point.clone());
            while ring.points.len() > self.capacity {
                ring.points.pop_front();
            }
            let horizon = point.timestamp - self.retention;
            while ring
                .points
                .front()
                .map_or(false, |p| p.timestamp < horizon)
            {
                ring.points.pop_front();
            }
        }
        self.publish(metric, &point);
    }

    fn query(&self, metric: MetricId, query: &MetricQuery) -> QueryResult {
        let rings = self.rings.read();
        let mut matching: Vec<MetricPoint> = rings
            .get(&metric)
            .map(|ring| {
                ring.points
                    .iter()
                    .filter(|p| query.start.map_or(true, |s| p.timestamp >= s))
                    .filter(|p| query.end.map_or(true, |e| p.timestamp <= e))
                    .filter(|p| Self::matches(p, &query.tag_filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matching.sort_by_key(|p| p.timestamp);

        let total_rows = matching.len();
        let page: Vec<MetricPoint> = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        let has_more = query.offset + page.len() < total_rows;
        QueryResult {
            points: page,
            total_rows,
            has_more,
        }
    }

    fn aggregate(&self, metric: MetricId, query: &AggregateQuery) -> Vec<AggregateBucket> {
        let window = match chrono::Duration::from_std(query.window) {
            Ok(w) if w > chrono::Duration::zero() => w,
            _ => return Vec::new(),
        };
        let rings = self.rings.read();
        let Some(ring) = rings.get(&metric) else {
            return Vec::new();
        };

        let mut buckets = Vec::new();
        let mut window_start = query.start;
        while window_start < query.end {
            let window_end = window_start + window;
            let values: Vec<f64> = ring
                .points
                .iter()
                .filter(|p| p.timestamp >= window_start && p.timestamp < window_end)
                .filter(|p| Self::matches(p, &query.tag_filters))
                .map(|p| p.value)
                .collect();
            if !values.is_empty() {
                let mut results = BTreeMap::new();
                for function in &query.functions {
                    results.insert(
                        function.name().to_string(),
                        function.apply(&values, query.window),
                    );
                }
                buckets.push(AggregateBucket {
                    window_start,
                    count: values.len(),
                    values: results,
                });
            }
            window_start = window_end;
        }
        buckets
    }

    fn subscribe(&self, metric_ids: &[MetricId]) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let metrics = if metric_ids.is_empty() {
            None
        } else {
            Some(metric_ids.iter().copied().collect())
        };
        if !self.closed.load(Ordering::Acquire) {
            self.subscribers.lock().push(Subscriber { id, metrics, tx });
        }
        Subscription { id, rx }
    }

    fn unsubscribe(&self, subscription_id: u64) {
        self.subscribers.lock().retain(|sub| sub.id != subscription_id);
    }

    fn stats(&self, metric: MetricId) -> Option<MetricStats> {
        let rings = self.rings.read();
        rings.get(&metric).map(|ring| MetricStats {
            total_points: ring.points.len(),
            oldest: ring.points.front().map(|p| p.timestamp),
            newest: ring.points.back().map(|p| p.timestamp),
            dropped_events: ring.dropped,
        })
    }

    fn record_dropped(&self, metric: MetricId, count: u64) {
        let mut rings = self.rings.write();
        rings.entry(metric).or_insert_with(MetricRing::new).dropped += count;
    }

    fn clear(&self) {
        self.rings.write().clear();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.subscribers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RingMetricStore {
        RingMetricStore::new(&EngineConfig::for_tests())
    }

    fn point(ts: DateTime<Utc>, value: f64) -> MetricPoint {
        MetricPoint::new(ts, value)
    }

    #[test]
    fn test_query_pages_in_ascending_order() {
        let s = store();
        let id = MetricId::new();
        let t0 = Utc::now();
        for i in 0..10 {
            s.write_point(id, point(t0 + chrono::Duration::seconds(i), i as f64));
        }
        let result = s.query(
            id,
            &MetricQuery {
                limit: Some(4),
                offset: 2,
                ..MetricQuery::default()
            },
        );
        assert_eq!(result.total_rows, 10);
        assert_eq!(result.points.len(), 4);
        assert!(result.has_more);
        assert_eq!(result.points[0].value, 2.0);
        assert!(result
            .points
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_count_capacity_evicts_oldest() {
        let config = EngineConfig {
            metric_ring_capacity: 3,
            ..EngineConfig::for_tests()
        };
        let s = RingMetricStore::new(&config);
        let id = MetricId::new();
        let t0 = Utc::now();
        for i in 0..5 {
            s.write_point(id, point(t0 + chrono::Duration::seconds(i), i as f64));
        }
        let stats = s.stats(id).unwrap();
        assert_eq!(stats.total_points, 3);
        assert_eq!(stats.oldest, Some(t0 + chrono::Duration::seconds(2)));
    }

    #[test]
    fn test_retention_evicts_old_points() {
        let s = store();
        let id = MetricId::new();
        let t0 = Utc::now();
        s.write_point(id, point(t0 - chrono::Duration::seconds(400), 1.0));
        s.write_point(id, point(t0, 2.0));
        let stats = s.stats(id).unwrap();
        assert_eq!(stats.total_points, 1);
        assert_eq!(stats.newest, Some(t0));
    }

    #[test]
    fn test_aggregate_omits_empty_windows() {
        let s = store();
        let id = MetricId::new();
        let t0 = Utc::now();
        s.write_point(id, point(t0 + chrono::Duration::seconds(1), 10.0));
        s.write_point(id, point(t0 + chrono::Duration::seconds(2), 20.0));
        // a gap, then one more point two windows later
        s.write_point(id, point(t0 + chrono::Duration::seconds(25), 30.0));

        let buckets = s.aggregate(
            id,
            &AggregateQuery {
                start: t0,
                end: t0 + chrono::Duration::seconds(30),
                window: Duration::from_secs(10),
                functions: vec![Aggregation::Sum, Aggregation::Count],
                tag_filters: BTreeMap::new(),
            },
        );
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[0].values["sum"], 30.0);
        assert_eq!(buckets[1].values["count"], 1.0);
    }

    #[tokio::test]
    async fn test_subscribe_receives_appends() {
        let s = store();
        let id = MetricId::new();
        let mut sub = s.subscribe(&[id]);
        s.write_point(id, point(Utc::now(), 7.0));
        let batch = sub.rx.recv().await.unwrap();
        assert_eq!(batch.metric_id, id);
        assert_eq!(batch.points[0].value, 7.0);

        // other metrics do not leak in
        s.write_point(MetricId::new(), point(Utc::now(), 8.0));
        assert!(sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions() {
        let s = store();
        let mut sub = s.subscribe(&[]);
        s.close();
        assert!(sub.rx.recv().await.is_none());
        // writes after close are refused
        let id = MetricId::new();
        s.write_point(id, point(Utc::now(), 1.0));
        assert!(s.stats(id).is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_channel() {
        let s = store();
        let mut sub = s.subscribe(&[]);
        s.unsubscribe(sub.id);
        assert!(sub.rx.recv().await.is_none());
    }
}
