/*!
Test Harness pour le moteur de sélection

Facilite l'écriture de tests avec:
- un annuaire en mémoire et une session (sélection + ACL)
- télémétrie et actions simulées, branchées sur l'agrégateur et le dispatcher
- assertions sur la sélection courante
*/

use crate::action_stub::RecordingActionClient;
use crate::telemetry_stub::StubTelemetry;
use procdeck_core::{
    AccessControlList, AccessFilter, ClusterActionDispatcher, ClusterActionReport, ClusterSummary,
    Inventory, MetricsAggregator, ProcessAction, ProcessRecord, SelectKind, SelectionStore,
    ServerRecord,
};
use std::sync::{Arc, Once};
use std::time::Duration;

static INIT_LOGGING: Once = Once::new();

/// Init logging pour tests (idempotent)
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        env_logger::builder().is_test(true).try_init().ok();
    });
}

/// Harness complet: annuaire, session, collaborateurs simulés
pub struct TestHarness {
    pub inventory: Inventory,
    pub store: SelectionStore,
    pub acl: Option<AccessControlList>,
    pub telemetry: StubTelemetry,
    pub actions: RecordingActionClient,
    pub aggregator: MetricsAggregator,
}

impl TestHarness {
    /// Harness avec une session propriétaire (voit tout)
    pub fn new(servers: Vec<ServerRecord>) -> Self {
        Self::with_collaborators(servers, StubTelemetry::new(), RecordingActionClient::new())
    }

    pub fn with_collaborators(
        servers: Vec<ServerRecord>,
        telemetry: StubTelemetry,
        actions: RecordingActionClient,
    ) -> Self {
        init_logging();
        let aggregator = MetricsAggregator::new(Arc::new(telemetry.clone()))
            .with_query_timeout(Duration::from_millis(500));
        Self {
            inventory: Inventory::new(servers),
            store: SelectionStore::new(),
            acl: Some(AccessControlList::owner()),
            telemetry,
            actions,
            aggregator,
        }
    }

    pub fn with_acl(mut self, acl: Option<AccessControlList>) -> Self {
        self.acl = acl;
        self
    }

    pub fn access(&self) -> AccessFilter<'_> {
        AccessFilter::new(self.acl.as_ref())
    }

    /// Nouveau poll de l'annuaire
    pub fn refresh(&mut self, servers: Vec<ServerRecord>) {
        self.inventory = Inventory::new(servers);
    }

    pub fn select(&mut self, ids: &[&str], kind: SelectKind) -> &mut Self {
        let ids = ids.iter().map(|s| s.to_string()).collect();
        self.store.select_item(&self.inventory, ids, kind);
        self
    }

    pub fn selected_process_ids(&self) -> Vec<String> {
        self.store.state().process_ids.iter().cloned().collect()
    }

    pub fn visible_process_ids(&self) -> Vec<String> {
        self.store
            .selected_processes(&self.inventory, &self.access())
            .iter()
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn visible_processes(&self) -> Vec<ProcessRecord> {
        self.store
            .selected_processes(&self.inventory, &self.access())
            .into_iter()
            .cloned()
            .collect()
    }

    /// Membres visibles d'un cluster
    pub fn cluster(&self, name: &str) -> Vec<ProcessRecord> {
        self.visible_processes().into_iter().filter(|p| p.name == name).collect()
    }

    pub async fn summaries(&self) -> Vec<ClusterSummary> {
        let visible = self.store.selected_processes(&self.inventory, &self.access());
        procdeck_core::cluster_summaries(&visible, &self.aggregator).await
    }

    pub async fn dispatch(&self, name: &str, action: ProcessAction) -> ClusterActionReport {
        let members = self.cluster(name);
        let dispatcher = ClusterActionDispatcher::new(Arc::new(self.actions.clone()));
        dispatcher.dispatch(&members, action, &self.access()).await
    }

    /// Assert que la sélection de processus vaut exactement `expected`
    pub fn assert_selected(&self, expected: &[&str]) {
        let mut expected: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(self.selected_process_ids(), expected, "unexpected process selection");
    }
}
