/*!
API REST procdeck - sélection et agrégation par session

Routes:
- /health (libre), /system/health
- /servers, /processes: vues dérivées de la sélection
- /selection: lecture, sélection (cascade par cluster), fin de session
- /clusters: résumés, séries, logs, flux de snapshots, actions groupées

Sécurité:
- header `x-api-key` obligatoire partout sauf /health
- utilisateur de session lu dans `x-session-user`; sans ACL toute
  vérification de permission échoue
*/

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use procdeck_core::{
    cluster_members, cluster_summaries, AccessControlList, AccessFilter, AccessProvider,
    AggregateError, ClusterActionDispatcher, ClusterActionReport, ClusterSeries, ClusterSummary,
    Clusters, CollaboratorError, Inventory, LogEntry, Permissions, ProcessAction, ProcessRecord,
    SelectKind, SelectionState, ServerRecord, TimeRange,
};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::health::{HealthTracker, KernelHealth};
use crate::sessions::SessionRegistry;
use crate::state::{current_inventory, SharedInventory};

pub const SESSION_HEADER: &str = "x-session-user";

#[derive(Clone)]
pub struct AppState {
    pub inventory: SharedInventory,
    pub sessions: SessionRegistry,
    pub access: Arc<dyn AccessProvider>,
    pub dispatcher: Arc<ClusterActionDispatcher>,
    pub health_tracker: HealthTracker,
    pub api_key: Arc<str>,
    pub log_limit: usize,
    pub stream_interval: Duration,
}

async fn require_api_key(
    State(app): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // Health check toujours accessible
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    if app.api_key.is_empty() {
        warn!("SECURITY: PROCDECK_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == &*app.api_key)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/servers", get(get_servers))
        .route("/processes", get(get_processes))
        .route("/selection", get(get_selection).post(select_item).delete(end_session))
        .route("/clusters", get(get_clusters))
        .route("/clusters/{name}/series", get(get_cluster_series))
        .route("/clusters/{name}/logs", get(get_cluster_logs))
        .route("/clusters/{name}/stream", get(stream_cluster))
        .route("/clusters/{name}/actions", post(dispatch_cluster_action))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

/// Session courante: utilisateur, ACL et dernier inventaire
struct SessionContext {
    user: String,
    acl: Option<AccessControlList>,
    inventory: Arc<Inventory>,
}

impl SessionContext {
    async fn load(app: &AppState, headers: &HeaderMap) -> Self {
        let user = headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let acl = if user.is_empty() { None } else { app.access.get_acl(&user).await };
        Self { user, acl, inventory: current_inventory(&app.inventory) }
    }

    fn access(&self) -> AccessFilter<'_> {
        AccessFilter::new(self.acl.as_ref())
    }

    fn visible_processes(&self, app: &AppState) -> Vec<&ProcessRecord> {
        app.sessions.visible_processes(&self.user, &self.inventory, &self.access())
    }

    /// Membres visibles du cluster `name`; 404 si aucun
    fn cluster(&self, app: &AppState, name: &str) -> Result<Vec<ProcessRecord>, StatusCode> {
        visible_cluster(&self.visible_processes(app), name).ok_or(StatusCode::NOT_FOUND)
    }
}

fn visible_cluster(visible: &[&ProcessRecord], name: &str) -> Option<Vec<ProcessRecord>> {
    let clusters = Clusters::resolve(visible.iter().copied());
    clusters.get(name).map(|cluster| cluster_members(cluster, visible))
}

fn collaborator_status(e: &CollaboratorError) -> StatusCode {
    match e {
        CollaboratorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn superseded(e: AggregateError) -> StatusCode {
    info!("{}", e);
    StatusCode::CONFLICT
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health_tracker.get_health(&app.inventory, &app.sessions))
}

// GET /servers (selectedServers)
async fn get_servers(State(app): State<AppState>, headers: HeaderMap) -> Json<Vec<ServerRecord>> {
    let ctx = SessionContext::load(&app, &headers).await;
    Json(app.sessions.selected_servers(&ctx.user, &ctx.inventory).into_iter().cloned().collect())
}

// GET /processes (selectedProcesses)
async fn get_processes(State(app): State<AppState>, headers: HeaderMap) -> Json<Vec<ProcessRecord>> {
    let ctx = SessionContext::load(&app, &headers).await;
    Json(ctx.visible_processes(&app).into_iter().cloned().collect())
}

async fn get_selection(State(app): State<AppState>, headers: HeaderMap) -> Json<SelectionState> {
    let ctx = SessionContext::load(&app, &headers).await;
    Json(app.sessions.selection(&ctx.user))
}

#[derive(Debug, Deserialize)]
struct SelectRequest {
    ids: Vec<String>,
    kind: SelectKind,
}

// POST /selection (selectItem); ouvre la session, 403 sans ACL
async fn select_item(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SelectRequest>,
) -> Result<Json<SelectionState>, StatusCode> {
    let ctx = SessionContext::load(&app, &headers).await;
    if ctx.acl.is_none() {
        warn!(user = %ctx.user, "selection refused: no ACL");
        return Err(StatusCode::FORBIDDEN);
    }
    let state = app.sessions.select(&ctx.user, &ctx.inventory, &ctx.access(), req.ids, req.kind);
    Ok(Json(state))
}

// DELETE /selection (fin de session)
async fn end_session(State(app): State<AppState>, headers: HeaderMap) -> StatusCode {
    let ctx = SessionContext::load(&app, &headers).await;
    app.sessions.end(&ctx.user);
    StatusCode::NO_CONTENT
}

// GET /clusters (clusterSummaries)
async fn get_clusters(
    State(app): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ClusterSummary>>, StatusCode> {
    let ctx = SessionContext::load(&app, &headers).await;
    let visible = ctx.visible_processes(&app);
    let aggregator = app.sessions.aggregator(&ctx.user);
    Ok(Json(cluster_summaries(&visible, &aggregator).await))
}

#[derive(Debug, Deserialize)]
struct SeriesParams {
    #[serde(default)]
    range: TimeRange,
}

// GET /clusters/{name}/series?range=
async fn get_cluster_series(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Query(params): Query<SeriesParams>,
) -> Result<Json<ClusterSeries>, StatusCode> {
    let ctx = SessionContext::load(&app, &headers).await;
    let members = ctx.cluster(&app, &name)?;
    let aggregator = app.sessions.aggregator(&ctx.user);
    let series = aggregator.series(&name, &members, params.range).await.map_err(superseded)?;
    Ok(Json(series))
}

#[derive(Debug, Deserialize)]
struct LogsParams {
    limit: Option<usize>,
}

// GET /clusters/{name}/logs?limit=
async fn get_cluster_logs(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Query(params): Query<LogsParams>,
) -> Result<Json<Vec<LogEntry>>, StatusCode> {
    let ctx = SessionContext::load(&app, &headers).await;
    let access = ctx.access();
    let members: Vec<ProcessRecord> = ctx
        .cluster(&app, &name)?
        .into_iter()
        .filter(|p| access.has_permission(&p.id, &p.server_id, Some(Permissions::LOGS)))
        .collect();
    if members.is_empty() {
        return Err(StatusCode::FORBIDDEN);
    }

    let limit = params.limit.unwrap_or(app.log_limit);
    let aggregator = app.sessions.aggregator(&ctx.user);
    let logs = aggregator.cluster_logs(&members, limit).await.map_err(|e| {
        warn!(cluster = %name, "cluster logs failed: {}", e);
        collaborator_status(&e)
    })?;
    Ok(Json(logs))
}

// GET /clusters/{name}/stream (snapshots toutes les polling.frontend_ms)
// Les membres sont relus à chaque tick: le flux se termine dès que le
// cluster quitte la sélection ou que ses membres en ligne changent.
async fn stream_cluster(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let ctx = SessionContext::load(&app, &headers).await;
    ctx.cluster(&app, &name)?;
    let aggregator = app.sessions.aggregator(&ctx.user);

    let SessionContext { user, acl, .. } = ctx;
    let (sessions, inventory, cluster) = (app.sessions.clone(), app.inventory.clone(), name.clone());
    let rx = aggregator.poll_snapshots(&name, app.stream_interval, move || {
        let inventory = current_inventory(&inventory);
        let access = AccessFilter::new(acl.as_ref());
        let visible = sessions.visible_processes(&user, &inventory, &access);
        visible_cluster(&visible, &cluster).unwrap_or_default()
    });

    let stream = ReceiverStream::new(rx).map(|snapshot| {
        Ok(Event::default()
            .event("snapshot")
            .json_data(&snapshot)
            .unwrap_or_else(|_| Event::default().comment("unserializable snapshot")))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct ActionRequest {
    action: ProcessAction,
}

// POST /clusters/{name}/actions (dispatchClusterAction)
async fn dispatch_cluster_action(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(req): Json<ActionRequest>,
) -> Result<Json<ClusterActionReport>, StatusCode> {
    let ctx = SessionContext::load(&app, &headers).await;
    let members = ctx.cluster(&app, &name)?;
    info!(user = %ctx.user, cluster = %name, action = %req.action, members = members.len(), "cluster action");
    let report = app.dispatcher.dispatch(&members, req.action, &ctx.access()).await;
    Ok(Json(report))
}
