//! Contracts of the external collaborators the engine talks to.
//!
//! The engine never assumes a transport: the kernel implements these over
//! HTTP and MQTT, tests implement them in memory.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;

use crate::access::AccessControlList;
use crate::actions::ProcessAction;
use crate::models::{ProcessId, ServerRecord};

/// Failure of one collaborator call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("rejected by backend: {0}")]
    Rejected(String),
}

/// One telemetry point attributed to a single process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default)]
    pub cpu: f64,
    /// Bytes.
    #[serde(default)]
    pub memory: u64,
    /// Bytes.
    #[serde(default)]
    pub heap_used: u64,
    /// Milliseconds since the process started.
    #[serde(default)]
    pub uptime: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeRange {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeRange::Seconds => "seconds",
            TimeRange::Minutes => "minutes",
            TimeRange::Hours => "hours",
            TimeRange::Days => "days",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Success,
    Error,
    #[default]
    #[serde(other)]
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub log_type: LogType,
    #[serde(default)]
    pub message: String,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub created_at: Option<OffsetDateTime>,
}

/// Source of servers and their processes. Full replace semantics.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn get_servers(&self) -> Result<Vec<ServerRecord>, CollaboratorError>;
}

/// Resolves the ACL of a session user. `None` when the user is unknown.
#[async_trait]
pub trait AccessProvider: Send + Sync {
    async fn get_acl(&self, session_user: &str) -> Option<AccessControlList>;
}

#[async_trait]
pub trait Telemetry: Send + Sync {
    async fn get_series(
        &self,
        process_id: &str,
        range: TimeRange,
    ) -> Result<Vec<MetricSample>, CollaboratorError>;

    async fn get_snapshot(&self, process_id: &str) -> Result<MetricSample, CollaboratorError>;

    async fn get_logs(
        &self,
        process_ids: &[ProcessId],
        limit: usize,
    ) -> Result<Vec<LogEntry>, CollaboratorError>;
}

/// Performs one action on one process.
///
/// `Ok(false)` means the target never answered; `Err` is a transport
/// failure.
#[async_trait]
pub trait ActionClient: Send + Sync {
    async fn perform(&self, process_id: &str, action: ProcessAction)
        -> Result<bool, CollaboratorError>;
}
