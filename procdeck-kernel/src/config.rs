use procdeck_core::AccessControlList;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::SocketAddr, path::Path, time::Duration};
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub listen: SocketAddr,
    pub backend: BackendConf,
    pub mqtt: MqttConf,
    pub polling: PollingConf,
    pub telemetry: TelemetryConf,
    /// Utilisateur de session -> ACL. Absent de la map = aucune ACL
    pub users: HashMap<String, AccessControlList>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BackendConf {
    pub url: String, // ex: "http://localhost:3000/api"
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub action_timeout_secs: u64,
    pub topic_prefix: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConf {
    pub directory_secs: u64,
    /// Intervalle de rafraîchissement du flux de métriques cluster
    pub frontend_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConf {
    pub query_timeout_ms: u64,
    pub log_limit: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            backend: BackendConf::default(),
            mqtt: MqttConf::default(),
            polling: PollingConf::default(),
            telemetry: TelemetryConf::default(),
            users: HashMap::new(),
        }
    }
}

impl Default for BackendConf {
    fn default() -> Self {
        Self { url: "http://localhost:3000/api".into(), timeout_secs: 10 }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            action_timeout_secs: 10,
            topic_prefix: "procdeck".into(),
        }
    }
}

impl Default for PollingConf {
    fn default() -> Self {
        Self { directory_secs: 5, frontend_ms: 5000 }
    }
}

impl Default for TelemetryConf {
    fn default() -> Self {
        Self {
            query_timeout_ms: procdeck_core::metrics::DEFAULT_QUERY_TIMEOUT.as_millis() as u64,
            log_limit: procdeck_core::metrics::DEFAULT_LOG_LIMIT,
        }
    }
}

impl BackendConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl MqttConf {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.topic_prefix.trim_end_matches('/'), suffix)
    }
}

impl PollingConf {
    pub fn directory_interval(&self) -> Duration {
        Duration::from_secs(self.directory_secs.max(1))
    }

    pub fn frontend_interval(&self) -> Duration {
        Duration::from_millis(self.frontend_ms.max(100))
    }
}

impl TelemetryConf {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("PROCDECK_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    load_config_from(&path).await
}

/// N'échoue jamais: fichier absent, vide ou invalide = valeurs par défaut
pub async fn load_config_from(path: impl AsRef<Path>) -> KernelConfig {
    let path = path.as_ref();
    if !path.exists() {
        info!("no config at {}, using defaults", path.display());
        return KernelConfig::default();
    }
    let txt = match fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) => {
            warn!("cannot read {}: {}", path.display(), e);
            return KernelConfig::default();
        }
    };
    if txt.trim().is_empty() {
        return KernelConfig::default();
    }
    serde_yaml::from_str(&txt).unwrap_or_else(|e| {
        warn!("invalid config {}: {}", path.display(), e);
        KernelConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use procdeck_core::Permissions;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let cfg = load_config_from("/nonexistent/kernel.yaml").await;
        assert_eq!(cfg.listen.port(), 8080);
        assert_eq!(cfg.telemetry.log_limit, 100);
        assert_eq!(cfg.mqtt.topic("process/action@v1"), "procdeck/process/action@v1");
    }

    #[tokio::test]
    async fn test_partial_file_keeps_other_defaults() {
        let file = write_config(
            r#"
listen: "127.0.0.1:9000"
mqtt:
  host: broker.lan
polling:
  directory_secs: 30
users:
  alice:
    owner: true
  bob:
    servers:
      - server: s1
        perms: 9
        processes:
          - process: p1
            perms: 1
"#,
        );

        let cfg = load_config_from(file.path()).await;

        assert_eq!(cfg.listen.port(), 9000);
        assert_eq!(cfg.mqtt.host, "broker.lan");
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.polling.directory_interval(), Duration::from_secs(30));
        assert_eq!(cfg.polling.frontend_ms, 5000);
        assert!(cfg.users["alice"].is_superuser());
        let bob = &cfg.users["bob"];
        assert_eq!(bob.perms("s1", "p2"), Permissions::READ | Permissions::STOP);
        assert_eq!(bob.perms("s1", "p1"), Permissions::READ);
    }

    #[tokio::test]
    async fn test_invalid_or_empty_file_gives_defaults() {
        let invalid = write_config("listen: [not, an, address");
        assert_eq!(load_config_from(invalid.path()).await.listen.port(), 8080);

        let empty = write_config("   \n");
        assert!(load_config_from(empty.path()).await.users.is_empty());
    }
}
