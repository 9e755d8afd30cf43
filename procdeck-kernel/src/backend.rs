//! Client HTTP du backend du dashboard: annuaire et télémétrie en JSON.
//!
//! Routes, relatives à `backend.url`:
//! - `GET  /servers`                    -> serveurs et leurs processus
//! - `GET  /processes/{id}/stat`        -> dernier échantillon
//! - `GET  /processes/{id}/stats?range` -> échantillons sur une plage
//! - `POST /logs {processIds, limit}`   -> logs, plus récents d'abord

use async_trait::async_trait;
use procdeck_core::{
    CollaboratorError, Directory, LogEntry, MetricSample, ProcessId, ServerRecord, Telemetry,
    TimeRange,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::config::BackendConf;

pub struct HttpBackend {
    client: Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogsQuery<'a> {
    process_ids: &'a [ProcessId],
    limit: usize,
}

impl HttpBackend {
    pub fn new(conf: &BackendConf) -> Self {
        let timeout = conf.timeout();
        Self {
            client: Client::builder().timeout(timeout).build().unwrap_or_default(),
            base_url: conf.url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CollaboratorError> {
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(CollaboratorError::Rejected(format!("{status}: {}", body.trim())));
        }
        serde_json::from_str(&body).map_err(|e| CollaboratorError::Decode(e.to_string()))
    }

    fn transport_error(&self, e: reqwest::Error) -> CollaboratorError {
        if e.is_timeout() {
            CollaboratorError::Timeout(self.timeout)
        } else {
            CollaboratorError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl Directory for HttpBackend {
    async fn get_servers(&self) -> Result<Vec<ServerRecord>, CollaboratorError> {
        self.fetch(self.client.get(self.url("/servers"))).await
    }
}

#[async_trait]
impl Telemetry for HttpBackend {
    async fn get_series(
        &self,
        process_id: &str,
        range: TimeRange,
    ) -> Result<Vec<MetricSample>, CollaboratorError> {
        let url = self.url(&format!("/processes/{process_id}/stats?range={}", range.as_str()));
        self.fetch(self.client.get(url)).await
    }

    async fn get_snapshot(&self, process_id: &str) -> Result<MetricSample, CollaboratorError> {
        self.fetch(self.client.get(self.url(&format!("/processes/{process_id}/stat")))).await
    }

    async fn get_logs(
        &self,
        process_ids: &[ProcessId],
        limit: usize,
    ) -> Result<Vec<LogEntry>, CollaboratorError> {
        let query = LogsQuery { process_ids, limit };
        self.fetch(self.client.post(self.url("/logs")).json(&query)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.ok() });
        format!("http://{addr}/api")
    }

    fn backend(url: String) -> HttpBackend {
        HttpBackend::new(&BackendConf { url, timeout_secs: 2 })
    }

    fn fake_backend() -> Router {
        Router::new()
            .route(
                "/api/servers",
                get(|| async {
                    Json(json!([{
                        "id": "s1",
                        "name": "edge",
                        "processes": [
                            {"id": "p1", "name": "api", "serverId": "s1", "status": "online", "type": "node"},
                            {"id": "p2", "name": "api", "serverId": "s1", "status": "launching"}
                        ]
                    }]))
                }),
            )
            .route(
                "/api/processes/{id}/stat",
                get(|Path(id): Path<String>| async move {
                    if id == "p1" {
                        Ok(Json(json!({
                            "timestamp": "2025-01-01T12:00:00Z",
                            "cpu": 12.5, "memory": 2048, "heapUsed": 1024, "uptime": 60000
                        })))
                    } else {
                        Err((StatusCode::NOT_FOUND, "no stats"))
                    }
                }),
            )
            .route(
                "/api/processes/{id}/stats",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let ts = if q.get("range").map(String::as_str) == Some("hours") {
                        "2025-01-01T12:00:00Z"
                    } else {
                        "1999-01-01T00:00:00Z"
                    };
                    Json(json!([{ "timestamp": ts, "cpu": 1.0, "memory": 1 }]))
                }),
            )
            .route(
                "/api/logs",
                post(|Json(body): Json<Value>| async move {
                    let count = body["processIds"].as_array().map(|a| a.len()).unwrap_or(0);
                    Json(json!([{
                        "id": "l1",
                        "type": "error",
                        "message": format!("{count} processes, limit {}", body["limit"]),
                        "createdAt": "2025-01-01T12:00:00Z"
                    }]))
                }),
            )
    }

    #[tokio::test]
    async fn test_directory_decodes_servers() {
        let backend = backend(serve(fake_backend()).await);

        let servers = backend.get_servers().await.unwrap();

        assert_eq!(servers[0].name, "edge");
        assert_eq!(servers[0].processes.len(), 2);
        assert_eq!(servers[0].processes[1].status, procdeck_core::ProcessStatus::Offline);
    }

    #[tokio::test]
    async fn test_telemetry_routes() {
        let backend = backend(serve(fake_backend()).await);

        assert_eq!(backend.get_snapshot("p1").await.unwrap().heap_used, 1024);
        assert!(matches!(backend.get_snapshot("p9").await, Err(CollaboratorError::Rejected(_))));

        let series = backend.get_series("p1", TimeRange::Hours).await.unwrap();
        assert_eq!(series[0].timestamp.year(), 2025);

        let logs = backend.get_logs(&["p1".into(), "p2".into()], 7).await.unwrap();
        assert_eq!(logs[0].message, "2 processes, limit 7");
        assert_eq!(logs[0].log_type, procdeck_core::LogType::Error);
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let router = Router::new().route("/api/servers", get(|| async { "<html>oops</html>" }));
        let backend = backend(serve(router).await);

        assert!(matches!(backend.get_servers().await, Err(CollaboratorError::Decode(_))));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let backend = backend(format!("http://{addr}/api"));

        assert!(matches!(backend.get_servers().await, Err(CollaboratorError::Transport(_))));
    }
}
