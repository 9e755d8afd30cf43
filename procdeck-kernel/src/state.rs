use parking_lot::Mutex;
use procdeck_core::Inventory;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

/// Dernier poll de l'annuaire, remplacé en bloc. Les lecteurs clonent
/// l'`Arc` et relâchent le verrou avant tout await.
pub type SharedInventory = Shared<Arc<Inventory>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

pub fn current_inventory(shared: &SharedInventory) -> Arc<Inventory> {
    shared.lock().clone()
}

pub fn install_inventory(shared: &SharedInventory, inventory: Inventory) {
    *shared.lock() = Arc::new(inventory);
}
