/*!
Client MQTT des actions sur les processus

Publie une commande par action et attend le résultat corrélé par
`command_id`:
- `{prefix}/process/action@v1`        -> `{command_id, process_id, action, timestamp}`
- `{prefix}/process/action-result@v1` <- `{command_id, success}`

Pas de réponse dans le délai => `Ok(false)`; échec de publication =>
`CollaboratorError::Transport`.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use procdeck_core::{ActionClient, CollaboratorError, ProcessAction};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio::task;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MqttConf;
use crate::health::HealthTracker;

pub const ACTION_TOPIC: &str = "process/action@v1";
pub const ACTION_RESULT_TOPIC: &str = "process/action-result@v1";
pub const HEALTH_TOPIC: &str = "kernel/health@v1";

#[derive(Debug, Serialize)]
pub struct ActionCommand<'a> {
    pub command_id: String,
    pub process_id: &'a str,
    pub action: ProcessAction,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
pub struct ActionResult {
    pub command_id: String,
    pub success: bool,
}

/// Commandes en attente: command_id -> sender du résultat
#[derive(Default)]
pub struct PendingCommands {
    inner: Mutex<HashMap<String, oneshot::Sender<bool>>>,
}

impl PendingCommands {
    pub fn register(&self, command_id: &str) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(command_id.to_string(), tx);
        rx
    }

    pub fn forget(&self, command_id: &str) {
        self.inner.lock().remove(command_id);
    }

    /// Délivre un résultat; false si personne n'attendait cette commande
    pub fn resolve(&self, result: ActionResult) -> bool {
        match self.inner.lock().remove(&result.command_id) {
            Some(sender) => sender.send(result.success).is_ok(),
            None => {
                debug!(command_id = %result.command_id, "result for unknown command");
                false
            }
        }
    }

    #[cfg(test)]
    pub fn ids(&self) -> Vec<String> {
        self.inner.lock().keys().cloned().collect()
    }
}

pub struct MqttActionClient {
    client: AsyncClient,
    pending: Arc<PendingCommands>,
    action_topic: String,
    reply_timeout: Duration,
}

impl MqttActionClient {
    pub fn new(client: AsyncClient, pending: Arc<PendingCommands>, conf: &MqttConf) -> Self {
        Self {
            client,
            pending,
            action_topic: conf.topic(ACTION_TOPIC),
            reply_timeout: conf.action_timeout(),
        }
    }
}

#[async_trait]
impl ActionClient for MqttActionClient {
    async fn perform(
        &self,
        process_id: &str,
        action: ProcessAction,
    ) -> Result<bool, CollaboratorError> {
        let command = ActionCommand {
            command_id: Uuid::new_v4().to_string(),
            process_id,
            action,
            timestamp: OffsetDateTime::now_utc(),
        };
        let payload =
            serde_json::to_string(&command).map_err(|e| CollaboratorError::Decode(e.to_string()))?;

        let rx = self.pending.register(&command.command_id);
        if let Err(e) = self
            .client
            .publish(&self.action_topic, QoS::AtLeastOnce, false, payload)
            .await
        {
            self.pending.forget(&command.command_id);
            return Err(CollaboratorError::Transport(e.to_string()));
        }

        match timeout(self.reply_timeout, rx).await {
            Ok(Ok(success)) => Ok(success),
            Ok(Err(_)) | Err(_) => {
                self.pending.forget(&command.command_id);
                warn!(process_id, action = %action, "no answer to action command");
                Ok(false)
            }
        }
    }
}

pub fn create_mqtt_client(conf: &MqttConf) -> (AsyncClient, EventLoop) {
    let client_id = format!("procdeck-kernel-{}", &Uuid::new_v4().to_string()[..8]);
    let mut opts = MqttOptions::new(client_id, &conf.host, conf.port);
    opts.set_keep_alive(Duration::from_secs(15));
    AsyncClient::new(opts, 10)
}

/// Boucle MQTT: (ré)abonnement aux résultats à chaque connexion, routage
/// des résultats vers les commandes en attente.
pub fn spawn_mqtt_listener(
    client: AsyncClient,
    mut eventloop: EventLoop,
    conf: &MqttConf,
    pending: Arc<PendingCommands>,
    health: HealthTracker,
) {
    let result_topic = conf.topic(ACTION_RESULT_TOPIC);

    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("connected to MQTT broker");
                    health.mark_mqtt_connected();
                    if let Err(e) = client.subscribe(&result_topic, QoS::AtLeastOnce).await {
                        error!("subscribe to {} failed: {:?}", result_topic, e);
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == result_topic => {
                    match serde_json::from_slice::<ActionResult>(&p.payload) {
                        Ok(result) => {
                            pending.resolve(result);
                        }
                        Err(e) => warn!("invalid action result: {}", e),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT error: {:?}", e);
                    health.increment_reconnects();
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}
