//! Cluster resolution: processes sharing a name are instances of one
//! horizontally-scaled application and are handled as a unit.
//!
//! Resolution is pure and deterministic. Clusters are recomputed on every
//! read, never stored, so they cannot go stale against the directory.

use crate::models::{ProcessId, ProcessRecord, ProcessStatus};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Status of a cluster derived from its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Online,
    Stopped,
    Errored,
    Mixed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub name: String,
    /// Members in directory order, without duplicates.
    pub member_ids: Vec<ProcessId>,
    pub rollup_status: ClusterStatus,
    /// First online member, else the first member.
    pub primary_id: ProcessId,
    pub online: usize,
    pub stopped: usize,
    /// Errored and offline members.
    pub errored: usize,
}

impl Cluster {
    pub fn size(&self) -> usize {
        self.member_ids.len()
    }

    pub fn has_online_member(&self) -> bool {
        self.online > 0
    }
}

/// Rollup status of a set of member statuses.
///
/// An empty slice never reaches this from [`Clusters::resolve`]; it rolls up
/// as `Online` by vacuous truth.
pub fn rollup_status(statuses: &[ProcessStatus]) -> ClusterStatus {
    if statuses.iter().all(|s| *s == ProcessStatus::Online) {
        ClusterStatus::Online
    } else if statuses.iter().all(|s| *s == ProcessStatus::Stopped) {
        ClusterStatus::Stopped
    } else if statuses.iter().any(|s| s.is_failure()) {
        ClusterStatus::Errored
    } else {
        ClusterStatus::Mixed
    }
}

/// All clusters of a process list, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Clusters {
    by_name: BTreeMap<String, Cluster>,
    name_of: HashMap<ProcessId, String>,
}

impl Clusters {
    /// Groups `processes` by exact, case-sensitive name. Server ids play no
    /// part in membership.
    pub fn resolve<'a, I>(processes: I) -> Self
    where
        I: IntoIterator<Item = &'a ProcessRecord>,
    {
        let mut groups: BTreeMap<String, Vec<&ProcessRecord>> = BTreeMap::new();
        let mut seen = BTreeSet::new();
        for process in processes {
            if !seen.insert(process.id.as_str()) {
                continue;
            }
            groups.entry(process.name.clone()).or_default().push(process);
        }

        let mut by_name = BTreeMap::new();
        let mut name_of = HashMap::new();
        for (name, members) in groups {
            let statuses: Vec<ProcessStatus> = members.iter().map(|p| p.status).collect();
            let primary = members
                .iter()
                .find(|p| p.status.is_online())
                .unwrap_or(&members[0]);

            let cluster = Cluster {
                name: name.clone(),
                member_ids: members.iter().map(|p| p.id.clone()).collect(),
                rollup_status: rollup_status(&statuses),
                primary_id: primary.id.clone(),
                online: statuses.iter().filter(|s| s.is_online()).count(),
                stopped: statuses.iter().filter(|s| **s == ProcessStatus::Stopped).count(),
                errored: statuses.iter().filter(|s| s.is_failure()).count(),
            };
            for id in &cluster.member_ids {
                name_of.insert(id.clone(), name.clone());
            }
            by_name.insert(name, cluster);
        }

        Self { by_name, name_of }
    }

    pub fn get(&self, name: &str) -> Option<&Cluster> {
        self.by_name.get(name)
    }

    /// Cluster the process belongs to, if the process is known.
    pub fn of_process(&self, id: &str) -> Option<&Cluster> {
        self.name_of.get(id).and_then(|name| self.by_name.get(name))
    }

    /// Union of the clusters of every id in `ids`. Unknown ids contribute
    /// nothing.
    pub fn expand<'a, I>(&self, ids: I) -> BTreeSet<ProcessId>
    where
        I: IntoIterator<Item = &'a ProcessId>,
    {
        ids.into_iter()
            .filter_map(|id| self.of_process(id))
            .flat_map(|c| c.member_ids.iter().cloned())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cluster> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProcessStatus::*;

    fn proc(id: &str, name: &str, server: &str, status: ProcessStatus) -> ProcessRecord {
        ProcessRecord {
            id: id.into(),
            name: name.into(),
            server_id: server.into(),
            status,
            process_type: "node".into(),
            versioning: None,
        }
    }

    #[test]
    fn test_grouping_ignores_server() {
        let list = vec![
            proc("p1", "api", "s1", Online),
            proc("p2", "worker", "s1", Online),
            proc("p3", "api", "s2", Stopped),
        ];
        let clusters = Clusters::resolve(&list);

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters.get("api").unwrap().member_ids, vec!["p1", "p3"]);
        assert_eq!(clusters.of_process("p3").unwrap().name, "api");
        assert_eq!(clusters.get("worker").unwrap().size(), 1);
    }

    #[test]
    fn test_grouping_is_case_sensitive() {
        let list = vec![proc("p1", "api", "s1", Online), proc("p2", "API", "s1", Online)];
        assert_eq!(Clusters::resolve(&list).len(), 2);
    }

    #[test]
    fn test_rollup_status() {
        assert_eq!(rollup_status(&[Online, Online]), ClusterStatus::Online);
        assert_eq!(rollup_status(&[Stopped, Stopped]), ClusterStatus::Stopped);
        assert_eq!(rollup_status(&[Online, Errored]), ClusterStatus::Errored);
        assert_eq!(rollup_status(&[Stopped, Offline]), ClusterStatus::Errored);
        assert_eq!(rollup_status(&[Online, Stopped]), ClusterStatus::Mixed);
    }

    #[test]
    fn test_primary_prefers_online() {
        let list = vec![
            proc("p1", "api", "s1", Stopped),
            proc("p2", "api", "s1", Online),
            proc("p3", "api", "s1", Online),
        ];
        assert_eq!(Clusters::resolve(&list).get("api").unwrap().primary_id, "p2");

        let list = vec![proc("p1", "api", "s1", Errored), proc("p2", "api", "s1", Stopped)];
        assert_eq!(Clusters::resolve(&list).get("api").unwrap().primary_id, "p1");
    }

    #[test]
    fn test_mixed_counts() {
        let list = vec![
            proc("p1", "api", "s1", Online),
            proc("p2", "api", "s1", Online),
            proc("p3", "api", "s1", Stopped),
        ];
        let api = Clusters::resolve(&list).get("api").cloned().unwrap();
        assert_eq!(api.rollup_status, ClusterStatus::Mixed);
        assert_eq!((api.online, api.stopped, api.errored), (2, 1, 0));
    }

    #[test]
    fn test_expand() {
        let list = vec![
            proc("p1", "api", "s1", Online),
            proc("p2", "api", "s2", Online),
            proc("p3", "worker", "s1", Online),
        ];
        let clusters = Clusters::resolve(&list);
        let ids = vec!["p2".to_string(), "ghost".to_string()];
        let expanded = clusters.expand(&ids);
        assert_eq!(expanded.into_iter().collect::<Vec<_>>(), vec!["p1", "p2"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(Clusters::resolve(&Vec::<ProcessRecord>::new()).is_empty());
    }
}
