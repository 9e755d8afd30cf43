//! Cluster telemetry: one query per online member, folded into a single
//! snapshot or time series.
//!
//! Each fan-out is tagged with a generation token per cluster. A fan-out
//! whose token is no longer current is abandoned and none of its results
//! are folded.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::collaborators::{CollaboratorError, LogEntry, MetricSample, Telemetry, TimeRange};
use crate::models::{ProcessId, ProcessRecord};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_LOG_LIMIT: usize = 100;

/// Snapshot rollup of a cluster's online members.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAggregate {
    pub cpu: f64,
    pub memory: u64,
    pub heap_used: u64,
    /// Uptime of the oldest-started member.
    pub uptime: u64,
    /// Members whose sample went into the fold.
    pub reporting: usize,
}

impl ClusterAggregate {
    /// Sums cpu, memory and heap, keeps the largest uptime. `None` when
    /// there is nothing to fold, so "no data" never reads as zero.
    pub fn fold<'a, I>(samples: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a MetricSample>,
    {
        samples.into_iter().fold(None, |acc, s| {
            let acc = acc.unwrap_or(ClusterAggregate {
                cpu: 0.0,
                memory: 0,
                heap_used: 0,
                uptime: 0,
                reporting: 0,
            });
            Some(ClusterAggregate {
                cpu: acc.cpu + s.cpu,
                memory: acc.memory.saturating_add(s.memory),
                heap_used: acc.heap_used.saturating_add(s.heap_used),
                uptime: acc.uptime.max(s.uptime),
                reporting: acc.reporting + 1,
            })
        })
    }
}

/// One timestamp of a merged cluster series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub cpu: f64,
    pub memory: u64,
    pub heap_used: u64,
    /// Members that reported at this timestamp.
    pub reporting: usize,
}

/// Merges per-member series by timestamp, summing each metric, ascending
/// by time. Members only contribute to the timestamps they reported.
pub fn merge_series<I>(series: I) -> Vec<SeriesPoint>
where
    I: IntoIterator<Item = Vec<MetricSample>>,
{
    let mut by_time: BTreeMap<OffsetDateTime, SeriesPoint> = BTreeMap::new();
    for samples in series {
        for s in samples {
            let point = by_time.entry(s.timestamp).or_insert(SeriesPoint {
                timestamp: s.timestamp,
                cpu: 0.0,
                memory: 0,
                heap_used: 0,
                reporting: 0,
            });
            point.cpu += s.cpu;
            point.memory = point.memory.saturating_add(s.memory);
            point.heap_used = point.heap_used.saturating_add(s.heap_used);
            point.reporting += 1;
        }
    }
    by_time.into_values().collect()
}

/// A member whose query failed. Siblings' results are unaffected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFailure {
    pub process_id: ProcessId,
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSnapshot {
    pub cluster: String,
    pub generation: u64,
    /// `None` means "no data": no online member, or none answered.
    pub aggregate: Option<ClusterAggregate>,
    pub failures: Vec<QueryFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSeries {
    pub cluster: String,
    pub generation: u64,
    pub points: Vec<SeriesPoint>,
    pub failures: Vec<QueryFailure>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AggregateError {
    #[error("fan-out for cluster '{cluster}' (generation {generation}) was superseded")]
    Superseded { cluster: String, generation: u64 },
}

#[derive(Debug)]
struct ActiveFanOut {
    generation: u64,
    members: Vec<ProcessId>,
}

/// Fans telemetry queries out to a cluster's online members.
#[derive(Clone)]
pub struct MetricsAggregator {
    telemetry: Arc<dyn Telemetry>,
    query_timeout: Duration,
    counter: Arc<AtomicU64>,
    active: Arc<Mutex<HashMap<String, ActiveFanOut>>>,
}

impl MetricsAggregator {
    pub fn new(telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            telemetry,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            counter: Arc::new(AtomicU64::new(0)),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Generation for a cluster queried with `members`. Reused while the
    /// queried member set stays the same, renewed when it changes.
    pub fn begin(&self, cluster: &str, members: &[ProcessRecord]) -> u64 {
        let ids = online_ids(members);
        let mut active = self.active.lock();
        if let Some(fan_out) = active.get(cluster) {
            if fan_out.members == ids {
                return fan_out.generation;
            }
        }
        let generation = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(cluster, generation, members = ids.len(), "new telemetry generation");
        active.insert(cluster.to_string(), ActiveFanOut { generation, members: ids });
        generation
    }

    /// Abandons whatever is in flight for `cluster`.
    pub fn cancel(&self, cluster: &str) {
        if self.active.lock().remove(cluster).is_some() {
            debug!(cluster, "telemetry generation cancelled");
        }
    }

    /// Session end: every cluster's generation is dropped.
    pub fn cancel_all(&self) {
        let mut active = self.active.lock();
        if !active.is_empty() {
            debug!(clusters = active.len(), "telemetry generations cancelled");
            active.clear();
        }
    }

    pub fn is_current(&self, cluster: &str, generation: u64) -> bool {
        self.active
            .lock()
            .get(cluster)
            .map(|f| f.generation == generation)
            .unwrap_or(false)
    }

    fn ensure_current(&self, cluster: &str, generation: u64) -> Result<(), AggregateError> {
        if self.is_current(cluster, generation) {
            Ok(())
        } else {
            Err(AggregateError::Superseded { cluster: cluster.to_string(), generation })
        }
    }

    /// Current snapshot rollup of the cluster.
    pub async fn snapshot(
        &self,
        cluster: &str,
        members: &[ProcessRecord],
    ) -> Result<ClusterSnapshot, AggregateError> {
        let generation = self.begin(cluster, members);
        self.snapshot_for(cluster, generation, members).await
    }

    async fn snapshot_for(
        &self,
        cluster: &str,
        generation: u64,
        members: &[ProcessRecord],
    ) -> Result<ClusterSnapshot, AggregateError> {
        let (samples, failures) = self
            .fan_out(cluster, generation, members, |telemetry, id| async move {
                telemetry.get_snapshot(&id).await
            })
            .await?;

        Ok(ClusterSnapshot {
            cluster: cluster.to_string(),
            generation,
            aggregate: ClusterAggregate::fold(samples.iter()),
            failures,
        })
    }

    /// Merged time series of the cluster over `range`.
    pub async fn series(
        &self,
        cluster: &str,
        members: &[ProcessRecord],
        range: TimeRange,
    ) -> Result<ClusterSeries, AggregateError> {
        let generation = self.begin(cluster, members);
        let (series, failures) = self
            .fan_out(cluster, generation, members, move |telemetry, id| async move {
                telemetry.get_series(&id, range).await
            })
            .await?;

        Ok(ClusterSeries {
            cluster: cluster.to_string(),
            generation,
            points: merge_series(series),
            failures,
        })
    }

    /// Logs of every member in one query. Stopped members are included.
    pub async fn cluster_logs(
        &self,
        members: &[ProcessRecord],
        limit: usize,
    ) -> Result<Vec<LogEntry>, CollaboratorError> {
        if members.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<ProcessId> = members.iter().map(|p| p.id.clone()).collect();
        match tokio::time::timeout(self.query_timeout, self.telemetry.get_logs(&ids, limit)).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(self.query_timeout)),
        }
    }

    /// Refetches the cluster snapshot every `interval`.
    ///
    /// `members` is re-read before each refetch. Polling stops when the
    /// receiver is dropped, when the cluster's generation moves on, or when
    /// the online members differ from the ones the poll started with. A
    /// cluster that resolves to no member at all is cancelled.
    pub fn poll_snapshots<F>(
        &self,
        cluster: &str,
        interval: Duration,
        members: F,
    ) -> mpsc::Receiver<ClusterSnapshot>
    where
        F: Fn() -> Vec<ProcessRecord> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(4);
        let aggregator = self.clone();
        let cluster = cluster.to_string();
        let generation = self.begin(&cluster, &members());

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tx.closed() => break,
                }
                if !aggregator.is_current(&cluster, generation) {
                    break;
                }
                let current = members();
                if current.is_empty() {
                    debug!(cluster = %cluster, "polling stopped: cluster no longer visible");
                    aggregator.cancel(&cluster);
                    break;
                }
                // renews the generation when the online members changed
                if aggregator.begin(&cluster, &current) != generation {
                    debug!(cluster = %cluster, "polling stopped: cluster membership changed");
                    break;
                }
                match aggregator.snapshot_for(&cluster, generation, &current).await {
                    Ok(snapshot) => {
                        if tx.send(snapshot).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(cluster = %cluster, "polling stopped: {}", e);
                        break;
                    }
                }
            }
        });

        rx
    }

    /// Runs `query` for every online member concurrently. Results come back
    /// in member order whatever order the queries complete in.
    async fn fan_out<T, F, Fut>(
        &self,
        cluster: &str,
        generation: u64,
        members: &[ProcessRecord],
        query: F,
    ) -> Result<(Vec<T>, Vec<QueryFailure>), AggregateError>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn Telemetry>, ProcessId) -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>> + Send + 'static,
    {
        let targets: Vec<&ProcessRecord> = online(members).collect();
        let mut join_set = JoinSet::new();

        for (position, process) in targets.iter().enumerate() {
            let call = query(self.telemetry.clone(), process.id.clone());
            let timeout = self.query_timeout;
            join_set.spawn(async move {
                let result = match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(CollaboratorError::Timeout(timeout)),
                };
                (position, result)
            });
        }

        let mut outcomes: Vec<Option<Result<T, CollaboratorError>>> =
            (0..targets.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            // dropping the join set aborts whatever is still running
            self.ensure_current(cluster, generation)?;
            match joined {
                Ok((position, result)) => outcomes[position] = Some(result),
                Err(e) => warn!(cluster, "telemetry query task failed: {}", e),
            }
        }
        self.ensure_current(cluster, generation)?;

        let mut values = Vec::new();
        let mut failures = Vec::new();
        for (process, outcome) in targets.iter().zip(outcomes) {
            let error = match outcome {
                Some(Ok(value)) => {
                    values.push(value);
                    continue;
                }
                Some(Err(e)) => e.to_string(),
                None => "query task aborted".to_string(),
            };
            warn!(
                cluster,
                process_id = %process.id,
                name = %process.name,
                "telemetry query failed: {}",
                error
            );
            failures.push(QueryFailure {
                process_id: process.id.clone(),
                name: process.name.clone(),
                message: error,
            });
        }

        Ok((values, failures))
    }
}

fn online(members: &[ProcessRecord]) -> impl Iterator<Item = &ProcessRecord> {
    members.iter().filter(|p| p.status.is_online())
}

/// Ids a fan-out over `members` would query, in member order.
pub fn online_ids(members: &[ProcessRecord]) -> Vec<ProcessId> {
    online(members).map(|p| p.id.clone()).collect()
}
