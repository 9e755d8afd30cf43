/*!
Annuaire statique pour tests

Renvoie la liste de serveurs configurée; peut être remplacée en cours de
test pour simuler un nouveau poll, ou échouer à la demande.
*/

use async_trait::async_trait;
use procdeck_core::{CollaboratorError, Directory, ServerRecord};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct StaticDirectory {
    servers: Arc<Mutex<Vec<ServerRecord>>>,
    failure: Arc<Mutex<Option<CollaboratorError>>>,
}

impl StaticDirectory {
    pub fn new(servers: Vec<ServerRecord>) -> Self {
        Self {
            servers: Arc::new(Mutex::new(servers)),
            failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Remplace les serveurs renvoyés au prochain poll
    pub fn replace(&self, servers: Vec<ServerRecord>) {
        *self.servers.lock().unwrap() = servers;
    }

    /// Le prochain poll échoue avec `error`
    pub fn fail_next(&self, error: CollaboratorError) {
        *self.failure.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn get_servers(&self) -> Result<Vec<ServerRecord>, CollaboratorError> {
        if let Some(error) = self.failure.lock().unwrap().take() {
            log::info!("[stub-directory] simulated failure: {}", error);
            return Err(error);
        }
        Ok(self.servers.lock().unwrap().clone())
    }
}
