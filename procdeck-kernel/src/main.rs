/**
 * PROCDECK KERNEL - Point d'entrée du service de sélection et d'agrégation
 *
 * RÔLE : Héberge le moteur procdeck-core derrière une API REST : config,
 * poll de l'annuaire, télémétrie HTTP, actions MQTT, sessions, health.
 *
 * ARCHITECTURE : annuaire/télémétrie via le backend HTTP, actions via MQTT,
 * une sélection + un agrégateur par utilisateur de session.
 */

mod access;
mod backend;
mod config;
mod directory;
mod health;
mod http;
mod mqtt;
mod sessions;
mod state;

use anyhow::Context;
use procdeck_core::{ClusterActionDispatcher, Inventory};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::access::ConfigAccessProvider;
use crate::backend::HttpBackend;
use crate::config::{load_config, KernelConfig};
use crate::health::HealthTracker;
use crate::http::AppState;
use crate::mqtt::{MqttActionClient, PendingCommands};
use crate::sessions::SessionRegistry;
use crate::state::new_state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("procdeck_kernel=info,procdeck_core=info")),
        )
        .init();

    let cfg: KernelConfig = load_config().await;
    let health_tracker = HealthTracker::new();

    // annuaire + télémétrie
    let backend = Arc::new(HttpBackend::new(&cfg.backend));
    info!("backend at {}", cfg.backend.url);

    // actions via MQTT
    let (mqtt_client, eventloop) = mqtt::create_mqtt_client(&cfg.mqtt);
    let pending = Arc::new(PendingCommands::default());
    mqtt::spawn_mqtt_listener(
        mqtt_client.clone(),
        eventloop,
        &cfg.mqtt,
        pending.clone(),
        health_tracker.clone(),
    );
    let actions = MqttActionClient::new(mqtt_client.clone(), pending, &cfg.mqtt);

    // inventaire partagé, remplacé à chaque poll
    let inventory = new_state(Arc::new(Inventory::empty()));
    directory::spawn_directory_poller(
        backend.clone(),
        inventory.clone(),
        health_tracker.clone(),
        cfg.polling.directory_interval(),
    );

    let sessions = SessionRegistry::new(backend.clone(), cfg.telemetry.query_timeout());

    health_tracker.spawn_health_publisher(
        mqtt_client,
        cfg.mqtt.topic(mqtt::HEALTH_TOPIC),
        inventory.clone(),
        sessions.clone(),
    );

    let app_state = AppState {
        inventory,
        sessions,
        access: Arc::new(ConfigAccessProvider::new(cfg.users.clone())),
        dispatcher: Arc::new(ClusterActionDispatcher::new(Arc::new(actions))),
        health_tracker,
        api_key: Arc::from(std::env::var("PROCDECK_API_KEY").unwrap_or_default()),
        log_limit: cfg.telemetry.log_limit,
        stream_interval: cfg.polling.frontend_interval(),
    };

    let app = http::build_router(app_state);

    info!("listening on http://{}", cfg.listen);
    let listener = TcpListener::bind(cfg.listen)
        .await
        .with_context(|| format!("cannot bind {}", cfg.listen))?;
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
