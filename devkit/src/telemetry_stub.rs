/*!
Télémétrie en mémoire pour tests sans backend

Réponses programmables par processus (snapshot, séries, logs), avec
échecs et latences simulés. Tous les appels reçus sont enregistrés pour
les assertions.
*/

use async_trait::async_trait;
use procdeck_core::{CollaboratorError, LogEntry, MetricSample, ProcessId, Telemetry, TimeRange};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryCall {
    Snapshot(ProcessId),
    Series(ProcessId, TimeRange),
    Logs(Vec<ProcessId>, usize),
}

#[derive(Default)]
struct StubState {
    snapshots: HashMap<ProcessId, MetricSample>,
    series: HashMap<ProcessId, Vec<MetricSample>>,
    logs: Vec<LogEntry>,
    failures: HashMap<ProcessId, CollaboratorError>,
    delays: HashMap<ProcessId, Duration>,
    calls: Vec<TelemetryCall>,
}

/// Stub de [`Telemetry`], clonable et partagé
#[derive(Clone, Default)]
pub struct StubTelemetry {
    state: Arc<Mutex<StubState>>,
}

impl StubTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot renvoyé pour `process_id`
    pub fn with_snapshot(self, process_id: &str, sample: MetricSample) -> Self {
        self.state.lock().unwrap().snapshots.insert(process_id.to_string(), sample);
        self
    }

    /// Série renvoyée pour `process_id`
    pub fn with_series(self, process_id: &str, samples: Vec<MetricSample>) -> Self {
        self.state.lock().unwrap().series.insert(process_id.to_string(), samples);
        self
    }

    pub fn with_logs(self, entries: Vec<LogEntry>) -> Self {
        self.state.lock().unwrap().logs = entries;
        self
    }

    /// Toute requête sur `process_id` échoue avec `error`
    pub fn failing(self, process_id: &str, error: CollaboratorError) -> Self {
        self.state.lock().unwrap().failures.insert(process_id.to_string(), error);
        self
    }

    /// Latence simulée avant la réponse pour `process_id`
    pub fn delayed(self, process_id: &str, delay: Duration) -> Self {
        self.state.lock().unwrap().delays.insert(process_id.to_string(), delay);
        self
    }

    /// Remplace le snapshot d'un processus en cours de test
    pub fn set_snapshot(&self, process_id: &str, sample: MetricSample) {
        self.state.lock().unwrap().snapshots.insert(process_id.to_string(), sample);
    }

    pub fn calls(&self) -> Vec<TelemetryCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Processus interrogés en snapshot, dans l'ordre d'appel
    pub fn snapshot_targets(&self) -> Vec<ProcessId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                TelemetryCall::Snapshot(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    async fn enter(&self, process_id: &str, call: TelemetryCall) -> Result<(), CollaboratorError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            state.delays.get(process_id).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.state.lock().unwrap().failures.get(process_id) {
            Some(error) => {
                log::info!("[stub-telemetry] simulated failure for {}", process_id);
                Err(error.clone())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Telemetry for StubTelemetry {
    async fn get_series(
        &self,
        process_id: &str,
        range: TimeRange,
    ) -> Result<Vec<MetricSample>, CollaboratorError> {
        self.enter(process_id, TelemetryCall::Series(process_id.to_string(), range)).await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .series
            .get(process_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_snapshot(&self, process_id: &str) -> Result<MetricSample, CollaboratorError> {
        self.enter(process_id, TelemetryCall::Snapshot(process_id.to_string())).await?;
        self.state
            .lock()
            .unwrap()
            .snapshots
            .get(process_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::Rejected(format!("no stats for {process_id}")))
    }

    async fn get_logs(
        &self,
        process_ids: &[ProcessId],
        limit: usize,
    ) -> Result<Vec<LogEntry>, CollaboratorError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(TelemetryCall::Logs(process_ids.to_vec(), limit));
        Ok(state.logs.iter().take(limit).cloned().collect())
    }
}
