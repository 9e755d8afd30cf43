/*!
Client d'actions enregistreur

Simule l'exécution des actions sur les processus:
- réponses programmables par processus (succès, pas de réponse, erreur transport)
- latence simulée pour vérifier l'exécution séquentielle
- enregistrement ordonné des appels et du parallélisme maximal observé
*/

use async_trait::async_trait;
use procdeck_core::{ActionClient, CollaboratorError, ProcessAction, ProcessId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Success,
    NoResponse,
    TransportError(String),
}

#[derive(Default)]
struct ActionState {
    replies: HashMap<ProcessId, ScriptedReply>,
    performed: Vec<(ProcessId, ProcessAction)>,
}

#[derive(Clone, Default)]
pub struct RecordingActionClient {
    state: Arc<Mutex<ActionState>>,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl RecordingActionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, process_id: &str, reply: ScriptedReply) -> Self {
        self.state.lock().unwrap().replies.insert(process_id.to_string(), reply);
        self
    }

    /// Chaque action prend `delay` avant de répondre
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Appels reçus, dans l'ordre
    pub fn performed(&self) -> Vec<(ProcessId, ProcessAction)> {
        self.state.lock().unwrap().performed.clone()
    }

    pub fn performed_ids(&self) -> Vec<ProcessId> {
        self.performed().into_iter().map(|(id, _)| id).collect()
    }

    /// Nombre maximal d'actions simultanées observé
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionClient for RecordingActionClient {
    async fn perform(
        &self,
        process_id: &str,
        action: ProcessAction,
    ) -> Result<bool, CollaboratorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let reply = {
            let mut state = self.state.lock().unwrap();
            state.performed.push((process_id.to_string(), action));
            state.replies.get(process_id).cloned().unwrap_or(ScriptedReply::Success)
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        log::info!("[stub-actions] {} {} -> {:?}", action, process_id, reply);
        match reply {
            ScriptedReply::Success => Ok(true),
            ScriptedReply::NoResponse => Ok(false),
            ScriptedReply::TransportError(msg) => Err(CollaboratorError::Transport(msg)),
        }
    }
}
