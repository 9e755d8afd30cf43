//! Sessions: une sélection et un agrégateur par utilisateur.
//!
//! Les agrégateurs sont propres à chaque session: deux utilisateurs sur le
//! même cluster ne s'invalident jamais leurs fan-outs. Une session n'est
//! ouverte que par une sélection; les lectures sans session retombent sur
//! la sélection vide.

use procdeck_core::{
    online_ids, AccessFilter, Clusters, Inventory, MetricsAggregator, ProcessId, ProcessRecord,
    SelectKind, SelectionState, SelectionStore, ServerRecord, Telemetry,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::state::{new_state, Shared};

struct Session {
    store: SelectionStore,
    aggregator: MetricsAggregator,
}

#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Shared<HashMap<String, Session>>,
    telemetry: Arc<dyn Telemetry>,
    query_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(telemetry: Arc<dyn Telemetry>, query_timeout: Duration) -> Self {
        Self { sessions: new_state(HashMap::new()), telemetry, query_timeout }
    }

    fn new_aggregator(&self) -> MetricsAggregator {
        MetricsAggregator::new(self.telemetry.clone()).with_query_timeout(self.query_timeout)
    }

    /// Applique une sélection, en ouvrant la session au besoin.
    ///
    /// Les clusters qui sortent de la vue, ou dont les membres en ligne
    /// changent, voient leur génération annulée.
    pub fn select(
        &self,
        user: &str,
        inventory: &Inventory,
        access: &AccessFilter<'_>,
        ids: Vec<String>,
        kind: SelectKind,
    ) -> SelectionState {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(user.to_string()).or_insert_with(|| {
            info!(user, "session opened");
            Session { store: SelectionStore::new(), aggregator: self.new_aggregator() }
        });

        let before = queried_members(&session.store.selected_processes(inventory, access));
        session.store.select_item(inventory, ids, kind);
        let after = queried_members(&session.store.selected_processes(inventory, access));

        for (name, members) in &before {
            if after.get(name) != Some(members) {
                debug!(user, cluster = %name, "cluster left the selection");
                session.aggregator.cancel(name);
            }
        }
        session.store.state().clone()
    }

    pub fn selection(&self, user: &str) -> SelectionState {
        self.sessions
            .lock()
            .get(user)
            .map(|s| s.store.state().clone())
            .unwrap_or_default()
    }

    pub fn selected_servers<'a>(&self, user: &str, inventory: &'a Inventory) -> Vec<&'a ServerRecord> {
        match self.sessions.lock().get(user) {
            Some(session) => session.store.selected_servers(inventory),
            None => SelectionStore::new().selected_servers(inventory),
        }
    }

    pub fn visible_processes<'a>(
        &self,
        user: &str,
        inventory: &'a Inventory,
        access: &AccessFilter<'_>,
    ) -> Vec<&'a ProcessRecord> {
        match self.sessions.lock().get(user) {
            Some(session) => session.store.selected_processes(inventory, access),
            None => SelectionStore::new().selected_processes(inventory, access),
        }
    }

    /// Agrégateur de la session, ou un agrégateur jetable hors session
    pub fn aggregator(&self, user: &str) -> MetricsAggregator {
        self.sessions
            .lock()
            .get(user)
            .map(|s| s.aggregator.clone())
            .unwrap_or_else(|| self.new_aggregator())
    }

    /// Fin de session: sélection remise à vide, fan-outs abandonnés.
    pub fn end(&self, user: &str) {
        if let Some(mut session) = self.sessions.lock().remove(user) {
            session.store.reset();
            session.aggregator.cancel_all();
            info!(user, "session closed");
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }
}

/// Membres en ligne de chaque cluster visible
fn queried_members(visible: &[&ProcessRecord]) -> BTreeMap<String, Vec<ProcessId>> {
    Clusters::resolve(visible.iter().copied())
        .iter()
        .map(|cluster| {
            let members: Vec<ProcessRecord> = visible
                .iter()
                .filter(|p| p.name == cluster.name)
                .map(|p| (*p).clone())
                .collect();
            (cluster.name.clone(), online_ids(&members))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use procdeck_core::AccessControlList;
    use procdeck_core::ProcessStatus::*;
    use procdeck_devkit::{process, server, StubTelemetry};

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(StubTelemetry::new()), Duration::from_secs(1))
    }

    fn inventory() -> Inventory {
        Inventory::new(vec![server(
            "s1",
            vec![
                process("p1", "api", "s1", Online),
                process("p2", "api", "s1", Online),
                process("w1", "worker", "s1", Online),
            ],
        )])
    }

    #[test]
    fn test_sessions_are_isolated() {
        let inventory = inventory();
        let acl = AccessControlList::owner();
        let access = AccessFilter::new(Some(&acl));
        let sessions = registry();

        sessions.select("alice", &inventory, &access, vec!["p1".into()], SelectKind::Processes);
        sessions.select("bob", &inventory, &access, vec!["w1".into()], SelectKind::Processes);

        assert!(sessions.selection("alice").process_ids.contains("p1"));
        assert!(!sessions.selection("alice").process_ids.contains("w1"));
        assert!(sessions.selection("bob").process_ids.contains("w1"));
        assert_eq!(sessions.len(), 2);
    }

    #[test]
    fn test_reads_do_not_open_sessions() {
        let inventory = inventory();
        let sessions = registry();

        for i in 0..50 {
            let user = format!("nobody-{i}");
            assert!(sessions.selection(&user).is_empty());
            assert!(sessions.visible_processes(&user, &inventory, &AccessFilter::new(None)).is_empty());
            assert_eq!(sessions.selected_servers(&user, &inventory).len(), 1);
            sessions.aggregator(&user);
        }

        assert_eq!(sessions.len(), 0);
    }

    #[test]
    fn test_end_resets_selection_and_generations() {
        let inventory = inventory();
        let acl = AccessControlList::owner();
        let access = AccessFilter::new(Some(&acl));
        let sessions = registry();
        sessions.select("alice", &inventory, &access, vec!["s1".into()], SelectKind::Servers);
        let aggregator = sessions.aggregator("alice");
        let generation = aggregator.begin("api", &[process("p1", "api", "s1", Online)]);

        sessions.end("alice");

        assert_eq!(sessions.len(), 0);
        assert!(sessions.selection("alice").is_empty());
        assert!(!aggregator.is_current("api", generation));
    }

    #[test]
    fn test_deselection_cancels_cluster_generation() {
        let inventory = inventory();
        let acl = AccessControlList::owner();
        let access = AccessFilter::new(Some(&acl));
        let sessions = registry();
        sessions.select("alice", &inventory, &access, vec!["p1".into(), "w1".into()], SelectKind::Processes);

        let aggregator = sessions.aggregator("alice");
        let api = aggregator.begin("api", &[process("p1", "api", "s1", Online), process("p2", "api", "s1", Online)]);
        let worker = aggregator.begin("worker", &[process("w1", "worker", "s1", Online)]);

        sessions.select("alice", &inventory, &access, vec!["w1".into()], SelectKind::Processes);

        assert!(!aggregator.is_current("api", api));
        assert!(aggregator.is_current("worker", worker));
    }

    #[test]
    fn test_aggregators_do_not_share_generations() {
        let inventory = inventory();
        let acl = AccessControlList::owner();
        let access = AccessFilter::new(Some(&acl));
        let members = vec![process("p1", "api", "s1", Online)];
        let sessions = registry();
        sessions.select("alice", &inventory, &access, vec!["p1".into()], SelectKind::Processes);
        sessions.select("bob", &inventory, &access, vec!["p1".into()], SelectKind::Processes);
        let alice = sessions.aggregator("alice");
        let bob = sessions.aggregator("bob");

        let generation = alice.begin("api", &members);
        bob.begin("api", &members);
        bob.cancel("api");

        assert!(alice.is_current("api", generation));
    }
}
