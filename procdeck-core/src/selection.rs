//! Selection state over servers and processes.
//!
//! An empty id set means "no filter": every entity of that kind counts as
//! selected. Process selection cascades over clusters so that a cluster is
//! always selected or deselected as a whole.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::access::AccessFilter;
use crate::cluster::Clusters;
use crate::models::{Inventory, ProcessId, ProcessRecord, ServerId, ServerRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectKind {
    Servers,
    Processes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionState {
    pub server_ids: BTreeSet<ServerId>,
    pub process_ids: BTreeSet<ProcessId>,
}

impl SelectionState {
    pub fn is_empty(&self) -> bool {
        self.server_ids.is_empty() && self.process_ids.is_empty()
    }
}

/// Owns one session's [`SelectionState`].
///
/// The state only changes through [`SelectionStore::select_item`] (or the
/// two setters behind it) and [`SelectionStore::reset`]. Each transition
/// reads and replaces the whole state. Directory data is passed to every
/// call so nothing derived from it is kept between calls.
#[derive(Debug, Clone, Default)]
pub struct SelectionStore {
    state: SelectionState,
}

impl SelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    /// Session end.
    pub fn reset(&mut self) {
        self.state = SelectionState::default();
    }

    pub fn select_item(&mut self, inventory: &Inventory, items: Vec<String>, kind: SelectKind) {
        let items: BTreeSet<String> = items.into_iter().collect();
        match kind {
            SelectKind::Servers => self.set_servers(inventory, items),
            SelectKind::Processes => self.set_processes(inventory, items),
        }
    }

    /// Replaces the server filter. Clearing it also clears the process
    /// selection; otherwise processes outside the new servers are dropped.
    pub fn set_servers(&mut self, inventory: &Inventory, items: BTreeSet<ServerId>) {
        let process_ids = if items.is_empty() {
            BTreeSet::new()
        } else {
            let in_scope = inventory.process_ids_on(&items);
            self.state
                .process_ids
                .intersection(&in_scope)
                .cloned()
                .collect()
        };

        self.state = SelectionState { server_ids: items, process_ids };
        debug!(
            servers = self.state.server_ids.len(),
            processes = self.state.process_ids.len(),
            "server selection updated"
        );
    }

    /// Replaces the process selection with cluster cascading.
    ///
    /// Ids dropped since the current selection remove their whole cluster;
    /// ids kept or added bring in their whole cluster. When a cluster is both
    /// dropped and re-added in one call, the removal wins. Ids unknown to the
    /// directory are discarded.
    pub fn set_processes(&mut self, inventory: &Inventory, items: BTreeSet<ProcessId>) {
        if items.is_empty() {
            self.state.process_ids.clear();
            return;
        }

        let clusters = Clusters::resolve(inventory.processes());
        let current = &self.state.process_ids;

        let removed: Vec<&ProcessId> = current.difference(&items).collect();
        let to_remove = clusters.expand(removed);

        let mut next: BTreeSet<ProcessId> = clusters
            .expand(&items)
            .difference(&to_remove)
            .cloned()
            .collect();

        if !self.state.server_ids.is_empty() {
            let in_scope = inventory.process_ids_on(&self.state.server_ids);
            next.retain(|id| in_scope.contains(id));
        }

        debug!(
            requested = items.len(),
            removed_clusters = to_remove.len(),
            selected = next.len(),
            "process selection updated"
        );
        self.state.process_ids = next;
    }

    /// Servers in the filter, or every server when the filter is empty.
    pub fn selected_servers<'a>(&self, inventory: &'a Inventory) -> Vec<&'a ServerRecord> {
        inventory
            .servers()
            .iter()
            .filter(|s| self.state.server_ids.is_empty() || self.state.server_ids.contains(&s.id))
            .collect()
    }

    /// Processes of the selected servers that pass the process filter and
    /// the permission check. Denied processes are left out silently.
    pub fn selected_processes<'a>(
        &self,
        inventory: &'a Inventory,
        access: &AccessFilter<'_>,
    ) -> Vec<&'a ProcessRecord> {
        self.selected_servers(inventory)
            .into_iter()
            .flat_map(|s| s.processes.iter())
            .filter(|p| self.state.process_ids.is_empty() || self.state.process_ids.contains(&p.id))
            .filter(|p| access.has_permission(&p.id, &p.server_id, None))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{AccessControlList, Permissions, ServerGrant};
    use crate::models::ProcessStatus::{self, *};

    fn proc(id: &str, name: &str, server: &str, status: ProcessStatus) -> ProcessRecord {
        ProcessRecord {
            id: id.into(),
            name: name.into(),
            server_id: server.into(),
            status,
            ..Default::default()
        }
    }

    fn inventory() -> Inventory {
        Inventory::new(vec![
            ServerRecord {
                id: "s1".into(),
                name: "alpha".into(),
                processes: vec![
                    proc("p1", "api", "s1", Online),
                    proc("p2", "api", "s1", Online),
                    proc("p3", "api", "s1", Stopped),
                    proc("w1", "worker", "s1", Online),
                ],
            },
            ServerRecord {
                id: "s2".into(),
                name: "beta".into(),
                processes: vec![proc("p4", "api", "s2", Online), proc("c1", "cron", "s2", Online)],
            },
        ])
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn selected(store: &SelectionStore) -> Vec<&str> {
        store.state().process_ids.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_select_one_member_selects_cluster() {
        let inv = inventory();
        let mut store = SelectionStore::new();
        store.select_item(&inv, ids(&["p1"]), SelectKind::Processes);
        assert_eq!(selected(&store), vec!["p1", "p2", "p3", "p4"]);
    }

    #[test]
    fn test_deselect_one_member_removes_cluster() {
        let inv = inventory();
        let mut store = SelectionStore::new();
        store.select_item(&inv, ids(&["p1", "w1"]), SelectKind::Processes);
        assert_eq!(selected(&store), vec!["p1", "p2", "p3", "p4", "w1"]);

        // p2 dropped
        store.select_item(&inv, ids(&["p1", "p3", "p4", "w1"]), SelectKind::Processes);
        assert_eq!(selected(&store), vec!["w1"]);
    }

    #[test]
    fn test_deselect_to_empty() {
        let inv = Inventory::new(vec![ServerRecord {
            id: "s1".into(),
            name: "alpha".into(),
            processes: vec![
                proc("p1", "api", "s1", Online),
                proc("p2", "api", "s1", Online),
                proc("p3", "api", "s1", Stopped),
            ],
        }]);
        let mut store = SelectionStore::new();
        store.select_item(&inv, ids(&["p1"]), SelectKind::Processes);
        assert_eq!(selected(&store), vec!["p1", "p2", "p3"]);

        store.select_item(&inv, ids(&["p1", "p3"]), SelectKind::Processes);
        assert!(store.state().process_ids.is_empty());
    }

    #[test]
    fn test_equal_size_swap_keeps_added_cluster_only() {
        let inv = inventory();
        let mut store = SelectionStore::new();
        store.select_item(&inv, ids(&["w1"]), SelectKind::Processes);
        assert_eq!(selected(&store), vec!["w1"]);

        store.select_item(&inv, ids(&["c1"]), SelectKind::Processes);
        assert_eq!(selected(&store), vec!["c1"]);
    }

    #[test]
    fn test_empty_items_clears_processes_only() {
        let inv = inventory();
        let mut store = SelectionStore::new();
        store.select_item(&inv, ids(&["s1"]), SelectKind::Servers);
        store.select_item(&inv, ids(&["w1"]), SelectKind::Processes);

        store.select_item(&inv, vec![], SelectKind::Processes);
        assert!(store.state().process_ids.is_empty());
        assert_eq!(store.state().server_ids.len(), 1);
    }

    #[test]
    fn test_server_filter_limits_expansion() {
        let inv = inventory();
        let mut store = SelectionStore::new();
        store.select_item(&inv, ids(&["s1"]), SelectKind::Servers);
        store.select_item(&inv, ids(&["p1"]), SelectKind::Processes);
        // p4 runs on s2
        assert_eq!(selected(&store), vec!["p1", "p2", "p3"]);
    }

    #[test]
    fn test_server_change_intersects_processes() {
        let inv = inventory();
        let mut store = SelectionStore::new();
        store.select_item(&inv, ids(&["p1", "c1"]), SelectKind::Processes);
        store.select_item(&inv, ids(&["s2"]), SelectKind::Servers);
        assert_eq!(selected(&store), vec!["c1", "p4"]);
    }

    #[test]
    fn test_server_reset_clears_everything() {
        let inv = inventory();
        let mut store = SelectionStore::new();
        store.select_item(&inv, ids(&["s1"]), SelectKind::Servers);
        store.select_item(&inv, ids(&["w1"]), SelectKind::Processes);

        store.select_item(&inv, vec![], SelectKind::Servers);
        assert!(store.state().is_empty());
    }

    #[test]
    fn test_unknown_ids_are_dropped() {
        let inv = inventory();
        let mut store = SelectionStore::new();
        store.select_item(&inv, ids(&["ghost"]), SelectKind::Processes);
        assert!(store.state().process_ids.is_empty());
    }

    #[test]
    fn test_empty_means_all() {
        let inv = inventory();
        let store = SelectionStore::new();
        let acl = AccessControlList::owner();
        let access = AccessFilter::new(Some(&acl));

        assert_eq!(store.selected_servers(&inv).len(), 2);
        assert_eq!(store.selected_processes(&inv, &access).len(), 6);
    }

    #[test]
    fn test_permission_exclusion_wins_over_selection() {
        let inv = inventory();
        let mut store = SelectionStore::new();
        store.select_item(&inv, ids(&["p1"]), SelectKind::Processes);

        let acl = AccessControlList {
            servers: vec![ServerGrant {
                server: "s1".into(),
                perms: Permissions::READ,
                processes: vec![],
            }],
            ..Default::default()
        };
        let access = AccessFilter::new(Some(&acl));
        let visible: Vec<&str> = store
            .selected_processes(&inv, &access)
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(visible, vec!["p1", "p2", "p3"]);

        assert!(store.selected_processes(&inv, &AccessFilter::deny_all()).is_empty());
    }

    #[test]
    fn test_reset() {
        let inv = inventory();
        let mut store = SelectionStore::new();
        store.select_item(&inv, ids(&["s2"]), SelectKind::Servers);
        store.select_item(&inv, ids(&["c1"]), SelectKind::Processes);
        store.reset();
        assert!(store.state().is_empty());
    }
}
