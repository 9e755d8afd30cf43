/*!
Fixtures pour construire des données d'annuaire et de télémétrie

Builders chaînables, dans l'esprit des messages de test:
- processus et serveurs avec des valeurs par défaut raisonnables
- échantillons de métriques horodatés à partir d'une origine fixe
*/

use procdeck_core::{
    LogEntry, LogType, MetricSample, ProcessRecord, ProcessStatus, ServerRecord, Versioning,
};
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

/// Origine fixe des horodatages de test
pub const EPOCH: OffsetDateTime = datetime!(2025-01-01 12:00 UTC);

/// Construction de processus
pub struct ProcessBuilder {
    record: ProcessRecord,
}

impl ProcessBuilder {
    pub fn new<S: Into<String>>(id: S, name: S) -> Self {
        Self {
            record: ProcessRecord {
                id: id.into(),
                name: name.into(),
                server_id: "s1".to_string(),
                status: ProcessStatus::Online,
                process_type: "node".to_string(),
                versioning: None,
            },
        }
    }

    pub fn on<S: Into<String>>(mut self, server_id: S) -> Self {
        self.record.server_id = server_id.into();
        self
    }

    pub fn status(mut self, status: ProcessStatus) -> Self {
        self.record.status = status;
        self
    }

    pub fn stopped(self) -> Self {
        self.status(ProcessStatus::Stopped)
    }

    pub fn errored(self) -> Self {
        self.status(ProcessStatus::Errored)
    }

    pub fn interpreter<S: Into<String>>(mut self, kind: S) -> Self {
        self.record.process_type = kind.into();
        self
    }

    pub fn repo<S: Into<String>>(mut self, url: S) -> Self {
        self.record.versioning = Some(Versioning {
            url: Some(url.into()),
            branch: Some("main".to_string()),
            commit: None,
        });
        self
    }

    pub fn build(self) -> ProcessRecord {
        self.record
    }
}

/// Raccourci: processus online sur `server_id`
pub fn process(id: &str, name: &str, server_id: &str, status: ProcessStatus) -> ProcessRecord {
    ProcessBuilder::new(id, name).on(server_id).status(status).build()
}

/// Serveur dont les processus sont rattachés à son id
pub fn server(id: &str, processes: Vec<ProcessRecord>) -> ServerRecord {
    let processes = processes
        .into_iter()
        .map(|mut p| {
            if p.server_id.is_empty() || p.server_id == "s1" {
                p.server_id = id.to_string();
            }
            p
        })
        .collect();
    ServerRecord { id: id.to_string(), name: format!("server-{id}"), processes }
}

/// Échantillon à `offset_secs` secondes de [`EPOCH`]
pub fn sample(offset_secs: i64, cpu: f64, memory: u64, uptime: u64) -> MetricSample {
    MetricSample {
        timestamp: EPOCH + Duration::seconds(offset_secs),
        cpu,
        memory,
        heap_used: memory / 2,
        uptime,
    }
}

pub fn log_entry(id: &str, log_type: LogType, message: &str) -> LogEntry {
    LogEntry {
        id: id.to_string(),
        log_type,
        message: message.to_string(),
        created_at: Some(EPOCH),
    }
}
