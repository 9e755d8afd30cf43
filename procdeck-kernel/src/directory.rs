use procdeck_core::{CollaboratorError, Directory, Inventory};
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tracing::{debug, info, warn};

use crate::health::HealthTracker;
use crate::state::{install_inventory, SharedInventory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Replaced,
    /// Données invalides: tout ce qui dérive de l'annuaire est vide
    Cleared,
    /// Backend injoignable: l'inventaire précédent reste en place
    Kept,
}

pub async fn refresh_inventory(
    directory: &dyn Directory,
    inventory: &SharedInventory,
    health: &HealthTracker,
) -> RefreshOutcome {
    match directory.get_servers().await {
        Ok(servers) => {
            let next = Inventory::new(servers);
            debug!(servers = next.server_count(), processes = next.process_count(), "directory refreshed");
            install_inventory(inventory, next);
            health.mark_directory_refreshed();
            RefreshOutcome::Replaced
        }
        Err(CollaboratorError::Decode(e)) => {
            warn!("malformed directory data, clearing inventory: {}", e);
            install_inventory(inventory, Inventory::empty());
            health.mark_directory_failed();
            RefreshOutcome::Cleared
        }
        Err(e) => {
            warn!("directory poll failed, keeping previous inventory: {}", e);
            health.mark_directory_failed();
            RefreshOutcome::Kept
        }
    }
}

pub fn spawn_directory_poller(
    directory: Arc<dyn Directory>,
    inventory: SharedInventory,
    health: HealthTracker,
    interval: Duration,
) {
    task::spawn(async move {
        info!("directory poller started (every {:?})", interval);
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            refresh_inventory(directory.as_ref(), &inventory, &health).await;
        }
    });
}
