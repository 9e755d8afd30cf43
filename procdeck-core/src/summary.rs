//! Per-cluster rows for the process list.

use serde::Serialize;
use tracing::debug;

use crate::cluster::{Cluster, ClusterStatus, Clusters};
use crate::metrics::{AggregateError, ClusterAggregate, MetricsAggregator, QueryFailure};
use crate::models::{ProcessId, ProcessRecord, Versioning};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub name: String,
    pub status: ClusterStatus,
    pub primary_id: ProcessId,
    /// Interpreter of the primary process.
    pub interpreter: String,
    pub versioning: Option<Versioning>,
    pub member_ids: Vec<ProcessId>,
    pub instances: usize,
    pub online: usize,
    pub stopped: usize,
    pub errored: usize,
    /// `None` renders as "no data".
    pub metrics: Option<ClusterAggregate>,
    pub metric_failures: Vec<QueryFailure>,
    /// The snapshot was abandoned for a newer one.
    pub superseded: bool,
}

impl ClusterSummary {
    fn from_cluster(cluster: &Cluster, primary: Option<&ProcessRecord>) -> Self {
        Self {
            name: cluster.name.clone(),
            status: cluster.rollup_status,
            primary_id: cluster.primary_id.clone(),
            interpreter: primary.map(|p| p.process_type.clone()).unwrap_or_default(),
            versioning: primary.and_then(|p| p.versioning.clone()),
            member_ids: cluster.member_ids.clone(),
            instances: cluster.size(),
            online: cluster.online,
            stopped: cluster.stopped,
            errored: cluster.errored,
            metrics: None,
            metric_failures: Vec::new(),
            superseded: false,
        }
    }
}

/// Members of `cluster` taken from `processes`, in cluster order.
pub fn cluster_members(cluster: &Cluster, processes: &[&ProcessRecord]) -> Vec<ProcessRecord> {
    cluster
        .member_ids
        .iter()
        .filter_map(|id| processes.iter().find(|p| p.id == *id).map(|p| (*p).clone()))
        .collect()
}

/// Summaries without telemetry.
pub fn summarize(processes: &[&ProcessRecord]) -> Vec<ClusterSummary> {
    let clusters = Clusters::resolve(processes.iter().copied());
    clusters
        .iter()
        .map(|cluster| {
            let primary = processes.iter().copied().find(|p| p.id == cluster.primary_id);
            ClusterSummary::from_cluster(cluster, primary)
        })
        .collect()
}

/// Summaries with a snapshot rollup for every cluster that has an online
/// member. Clusters are queried one after another, members in parallel.
/// A superseded snapshot only blanks its own row.
pub async fn cluster_summaries(
    processes: &[&ProcessRecord],
    aggregator: &MetricsAggregator,
) -> Vec<ClusterSummary> {
    let clusters = Clusters::resolve(processes.iter().copied());
    let mut summaries = Vec::with_capacity(clusters.len());

    for cluster in clusters.iter() {
        let primary = processes.iter().copied().find(|p| p.id == cluster.primary_id);
        let mut summary = ClusterSummary::from_cluster(cluster, primary);

        if cluster.has_online_member() {
            let members = cluster_members(cluster, processes);
            match aggregator.snapshot(&cluster.name, &members).await {
                Ok(snapshot) => {
                    summary.metrics = snapshot.aggregate;
                    summary.metric_failures = snapshot.failures;
                }
                Err(AggregateError::Superseded { generation, .. }) => {
                    debug!(cluster = %cluster.name, generation, "summary snapshot superseded");
                    summary.superseded = true;
                }
            }
        } else {
            aggregator.cancel(&cluster.name);
        }
        summaries.push(summary);
    }

    summaries
}
