//! procdeck core - selection and aggregation engine of the dashboard
//!
//! - Groups processes into clusters by name ([`cluster`])
//! - Resolves what a session may see and act on ([`access`])
//! - Holds the server/process selection with cluster cascading ([`selection`])
//! - Folds per-member telemetry into cluster rollups ([`metrics`])
//! - Runs bulk actions over a cluster, member by member ([`actions`])
//!
//! Pure computation never fails. Only collaborator calls return errors,
//! and those are always scoped to one member.

pub mod access;
pub mod actions;
pub mod cluster;
pub mod collaborators;
pub mod metrics;
pub mod models;
pub mod selection;
pub mod summary;

pub use access::{AccessControlList, AccessFilter, Permissions, ProcessGrant, ServerGrant};
pub use actions::{
    ClusterActionDispatcher, ClusterActionReport, MemberOutcome, MemberResult, ProcessAction,
};
pub use cluster::{Cluster, ClusterStatus, Clusters};
pub use collaborators::{
    AccessProvider, ActionClient, CollaboratorError, Directory, LogEntry, LogType, MetricSample,
    Telemetry, TimeRange,
};
pub use metrics::{
    online_ids, AggregateError, ClusterAggregate, ClusterSeries, ClusterSnapshot,
    MetricsAggregator, QueryFailure, SeriesPoint,
};
pub use models::{Inventory, ProcessId, ProcessRecord, ProcessStatus, ServerId, ServerRecord, Versioning};
pub use selection::{SelectKind, SelectionState, SelectionStore};
pub use summary::{cluster_members, cluster_summaries, summarize, ClusterSummary};
