use parking_lot::Mutex;
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::task;
use tracing::{debug, warn};

use crate::sessions::SessionRegistry;
use crate::state::{current_inventory, SharedInventory};

#[derive(Debug, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub servers_tracked: u32,
    pub processes_tracked: u32,
    pub sessions: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_directory_refresh: Option<OffsetDateTime>,
    pub directory_failures: u32,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
    last_directory_refresh: Arc<Mutex<Option<OffsetDateTime>>>,
    directory_failures: Arc<AtomicU32>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new("connecting".to_string())),
            last_directory_refresh: Arc::new(Mutex::new(None)),
            directory_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn mark_directory_refreshed(&self) {
        *self.last_directory_refresh.lock() = Some(OffsetDateTime::now_utc());
    }

    pub fn mark_directory_failed(&self) {
        self.directory_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self, inventory: &SharedInventory, sessions: &SessionRegistry) -> KernelHealth {
        let inventory = current_inventory(inventory);
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            servers_tracked: inventory.server_count() as u32,
            processes_tracked: inventory.process_count() as u32,
            sessions: sessions.len() as u32,
            last_directory_refresh: *self.last_directory_refresh.lock(),
            directory_failures: self.directory_failures.load(Ordering::Relaxed),
            memory_usage_mb: get_memory_usage_mb(),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }

    /// Démarre la publication auto du health kernel (toutes les 30s)
    pub fn spawn_health_publisher(
        &self,
        client: AsyncClient,
        topic: String,
        inventory: SharedInventory,
        sessions: SessionRegistry,
    ) {
        let health_tracker = self.clone();

        task::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                let health = health_tracker.get_health(&inventory, &sessions);
                let Ok(payload) = serde_json::to_string(&health) else { continue };
                match client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
                    Ok(()) => debug!(
                        uptime = health.uptime_seconds,
                        processes = health.processes_tracked,
                        "published kernel health"
                    ),
                    Err(e) => warn!("failed to publish health: {:?}", e),
                }
            }
        });
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        let pid = std::process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::new_state;
    use procdeck_core::{AccessControlList, AccessFilter, Inventory, SelectKind};
    use procdeck_devkit::{process, server, StubTelemetry};
    use procdeck_core::ProcessStatus::Online;

    #[test]
    fn test_health_counts_inventory_and_sessions() {
        let inventory = new_state(Arc::new(Inventory::new(vec![server(
            "s1",
            vec![process("p1", "api", "s1", Online), process("p2", "api", "s1", Online)],
        )])));
        let sessions = SessionRegistry::new(Arc::new(StubTelemetry::new()), Duration::from_secs(1));
        let inv = current_inventory(&inventory);
        let acl = AccessControlList::owner();
        sessions.select("alice", &inv, &AccessFilter::new(Some(&acl)), vec!["p1".into()], SelectKind::Processes);
        sessions.selection("bob");

        let tracker = HealthTracker::new();
        tracker.mark_directory_refreshed();
        tracker.increment_reconnects();
        let health = tracker.get_health(&inventory, &sessions);

        assert_eq!(health.servers_tracked, 1);
        assert_eq!(health.processes_tracked, 2);
        assert_eq!(health.sessions, 1);
        assert!(health.last_directory_refresh.is_some());
        assert_eq!(health.mqtt_status, "reconnecting");
        assert_eq!(health.mqtt_reconnects, 1);
    }
}
