//! Directory data: servers, the processes they run, and the indexed
//! snapshot ([`Inventory`]) every other module reads from.
//!
//! Records are immutable snapshots of one Directory poll. Missing fields
//! deserialize to safe empties so a partial payload never breaks the views.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub type ProcessId = String;
pub type ServerId = String;

/// Process state as reported by the process manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Online,
    Stopped,
    Errored,
    /// Also used for any status the dashboard does not know about.
    #[default]
    #[serde(other)]
    Offline,
}

impl ProcessStatus {
    pub fn is_online(self) -> bool {
        self == ProcessStatus::Online
    }

    /// Errored and offline both count as failures in a cluster rollup.
    pub fn is_failure(self) -> bool {
        matches!(self, ProcessStatus::Errored | ProcessStatus::Offline)
    }
}

/// Source control info attached to a deployed process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Versioning {
    pub url: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub name: String,
    #[serde(rename = "serverId")]
    pub server_id: ServerId,
    pub status: ProcessStatus,
    /// Interpreter (node, python, ...)
    #[serde(rename = "type")]
    pub process_type: String,
    pub versioning: Option<Versioning>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerRecord {
    pub id: ServerId,
    pub name: String,
    pub processes: Vec<ProcessRecord>,
}

/// Indexed snapshot of one Directory poll.
///
/// Replaced wholesale on every refresh, never patched in place.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    servers: Vec<ServerRecord>,
    // process id -> (server position, process position)
    index: HashMap<ProcessId, (usize, usize)>,
}

impl Inventory {
    pub fn new(servers: Vec<ServerRecord>) -> Self {
        let mut index = HashMap::new();
        for (s, server) in servers.iter().enumerate() {
            for (p, process) in server.processes.iter().enumerate() {
                // first occurrence wins when the directory repeats an id
                index.entry(process.id.clone()).or_insert((s, p));
            }
        }
        Self { servers, index }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn servers(&self) -> &[ServerRecord] {
        &self.servers
    }

    /// Every process, servers in order then processes in order.
    pub fn processes(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.servers.iter().flat_map(|s| s.processes.iter())
    }

    pub fn process(&self, id: &str) -> Option<&ProcessRecord> {
        self.index
            .get(id)
            .map(|&(s, p)| &self.servers[s].processes[p])
    }

    /// Ids of the processes whose `server_id` is one of `server_ids`.
    pub fn process_ids_on(&self, server_ids: &BTreeSet<ServerId>) -> BTreeSet<ProcessId> {
        self.processes()
            .filter(|p| server_ids.contains(&p.server_id))
            .map(|p| p.id.clone())
            .collect()
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn process_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl From<Vec<ServerRecord>> for Inventory {
    fn from(servers: Vec<ServerRecord>) -> Self {
        Self::new(servers)
    }
}
