//! Bulk actions over a cluster.
//!
//! Members are handled one after the other, each awaited before the next
//! starts, so a delete never races a restart on a sibling. A failing member
//! is reported and the batch carries on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::access::{AccessFilter, Permissions};
use crate::collaborators::ActionClient;
use crate::models::{ProcessId, ProcessRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessAction {
    Restart,
    Stop,
    Delete,
}

impl ProcessAction {
    pub fn required_permission(self) -> Permissions {
        match self {
            ProcessAction::Restart => Permissions::RESTART,
            ProcessAction::Stop => Permissions::STOP,
            ProcessAction::Delete => Permissions::DELETE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessAction::Restart => "RESTART",
            ProcessAction::Stop => "STOP",
            ProcessAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ProcessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MemberResult {
    Done,
    /// The action client got no answer from the target.
    NoResponse,
    /// The session may not perform this action on the member.
    Denied,
    Failed { message: String },
}

impl MemberResult {
    pub fn is_success(&self) -> bool {
        matches!(self, MemberResult::Done)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberOutcome {
    pub process_id: ProcessId,
    pub name: String,
    #[serde(flatten)]
    pub result: MemberResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterActionReport {
    pub action: ProcessAction,
    /// One entry per member, in the order they were handled.
    pub outcomes: Vec<MemberOutcome>,
    pub elapsed_ms: u128,
}

impl ClusterActionReport {
    pub fn failures(&self) -> impl Iterator<Item = &MemberOutcome> {
        self.outcomes.iter().filter(|o| !o.result.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }
}

pub struct ClusterActionDispatcher {
    client: Arc<dyn ActionClient>,
}

impl ClusterActionDispatcher {
    pub fn new(client: Arc<dyn ActionClient>) -> Self {
        Self { client }
    }

    /// Applies `action` to every member in order.
    pub async fn dispatch(
        &self,
        members: &[ProcessRecord],
        action: ProcessAction,
        access: &AccessFilter<'_>,
    ) -> ClusterActionReport {
        let started = Instant::now();
        let required = action.required_permission();
        let mut outcomes = Vec::with_capacity(members.len());

        for process in members {
            let result = if !access.has_permission(&process.id, &process.server_id, Some(required)) {
                MemberResult::Denied
            } else {
                match self.client.perform(&process.id, action).await {
                    Ok(true) => MemberResult::Done,
                    Ok(false) => MemberResult::NoResponse,
                    Err(e) => MemberResult::Failed { message: e.to_string() },
                }
            };

            if !result.is_success() {
                warn!(
                    process_id = %process.id,
                    name = %process.name,
                    action = %action,
                    "cluster action failed on member: {:?}",
                    result
                );
            }
            outcomes.push(MemberOutcome {
                process_id: process.id.clone(),
                name: process.name.clone(),
                result,
            });
        }

        let report = ClusterActionReport {
            action,
            outcomes,
            elapsed_ms: started.elapsed().as_millis(),
        };
        info!(
            action = %action,
            members = members.len(),
            failed = report.failures().count(),
            "cluster action finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_format() {
        assert_eq!(serde_json::to_string(&ProcessAction::Restart).unwrap(), "\"RESTART\"");
        let a: ProcessAction = serde_json::from_str("\"DELETE\"").unwrap();
        assert_eq!(a, ProcessAction::Delete);
    }

    #[test]
    fn test_required_permissions() {
        assert_eq!(ProcessAction::Stop.required_permission(), Permissions::STOP);
        assert_eq!(ProcessAction::Delete.required_permission(), Permissions::DELETE);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = MemberOutcome {
            process_id: "p1".into(),
            name: "api".into(),
            result: MemberResult::Failed { message: "boom".into() },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["processId"], "p1");
        assert_eq!(json["result"], "failed");
        assert_eq!(json["message"], "boom");
    }
}
