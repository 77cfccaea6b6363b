//! 服务配置：项目白名单、查询上限、传输方式与上游地址。

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{OpsError, Result};

pub const DEFAULT_MAX_RANGE_HOURS: i64 = 72;
pub const DEFAULT_MAX_LOG_ENTRIES: i64 = 500;
pub const DEFAULT_MAX_TIME_SERIES: i64 = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Empty means every project is allowed.
    #[serde(default)]
    pub allowed_project_ids: Vec<String>,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_range_hours")]
    pub max_range_hours: i64,
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: i64,
    #[serde(default = "default_max_time_series")]
    pub max_time_series: i64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_range_hours: DEFAULT_MAX_RANGE_HOURS,
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
            max_time_series: DEFAULT_MAX_TIME_SERIES,
        }
    }
}

fn default_max_range_hours() -> i64 {
    DEFAULT_MAX_RANGE_HOURS
}

fn default_max_log_entries() -> i64 {
    DEFAULT_MAX_LOG_ENTRIES
}

fn default_max_time_series() -> i64 {
    DEFAULT_MAX_TIME_SERIES
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    #[default]
    Stdio,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub mode: ServerMode,
    pub http_addr: Option<String>,
    pub http_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: ServerMode::Stdio,
            http_addr: None,
            http_port: None,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let addr = format!(
            "{}:{}",
            self.http_addr.as_deref().unwrap_or("127.0.0.1"),
            self.http_port.unwrap_or(3000)
        );
        addr.parse()
            .map_err(|e| OpsError::ConfigError(format!("invalid http address {addr}: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_logging_endpoint")]
    pub logging_endpoint: String,
    #[serde(default = "default_monitoring_endpoint")]
    pub monitoring_endpoint: String,
    /// Environment variable holding an OAuth access token. When unset the
    /// metadata server is asked instead.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            logging_endpoint: default_logging_endpoint(),
            monitoring_endpoint: default_monitoring_endpoint(),
            access_token_env: default_access_token_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_logging_endpoint() -> String {
    "https://logging.googleapis.com".to_string()
}

fn default_monitoring_endpoint() -> String {
    "https://monitoring.googleapis.com".to_string()
}

fn default_access_token_env() -> String {
    "GOOGLE_OAUTH_ACCESS_TOKEN".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    /// 从 YAML 或 JSON 文件加载配置；文件不存在时使用默认值。
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(OpsError::ConfigError(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        let is_json = matches!(
            path.extension().and_then(|s| s.to_str()),
            Some("json")
        );
        let mut cfg: Config = if is_json {
            serde_json::from_str(&raw)?
        } else if raw.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&raw)?
        };
        cfg.normalize();
        info!(
            path = %path.display(),
            allowed_projects = cfg.allowed_project_ids.len(),
            max_range_hours = cfg.limits.max_range_hours,
            "config loaded"
        );
        Ok(cfg)
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_path(p),
            None => Ok(Self::default()),
        }
    }

    /// Replace non-positive limits with their defaults.
    pub fn normalize(&mut self) {
        if self.limits.max_range_hours <= 0 {
            self.limits.max_range_hours = DEFAULT_MAX_RANGE_HOURS;
        }
        if self.limits.max_log_entries <= 0 {
            self.limits.max_log_entries = DEFAULT_MAX_LOG_ENTRIES;
        }
        if self.limits.max_time_series <= 0 {
            self.limits.max_time_series = DEFAULT_MAX_TIME_SERIES;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let cfg = Config::load_from_path(&dir.path().join("absent.yaml")).unwrap();
        assert!(cfg.allowed_project_ids.is_empty());
        assert_eq!(cfg.limits.max_range_hours, 72);
        assert_eq!(cfg.limits.max_log_entries, 500);
        assert_eq!(cfg.limits.max_time_series, 50);
        assert_eq!(cfg.server.mode, ServerMode::Stdio);
    }

    #[test]
    fn yaml_with_non_positive_limits_is_normalized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "allowed_project_ids:\n  - prod-a\n  - prod-b\nlimits:\n  max_range_hours: 0\n  max_log_entries: -5\n  max_time_series: 10\n",
        )
        .unwrap();

        let cfg = Config::load_from_path(&path).unwrap();
        assert_eq!(cfg.allowed_project_ids, vec!["prod-a", "prod-b"]);
        assert_eq!(cfg.limits.max_range_hours, 72);
        assert_eq!(cfg.limits.max_log_entries, 500);
        assert_eq!(cfg.limits.max_time_series, 10);
    }

    #[test]
    fn json_config_and_http_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"server": {"mode": "http", "http_port": 8088}, "upstream": {"request_timeout_secs": 5}}"#,
        )
        .unwrap();

        let cfg = Config::load_from_path(&path).unwrap();
        assert_eq!(cfg.server.mode, ServerMode::Http);
        assert_eq!(cfg.server.socket_addr().unwrap().port(), 8088);
        assert_eq!(cfg.upstream.request_timeout_secs, 5);
        assert_eq!(cfg.upstream.logging_endpoint, "https://logging.googleapis.com");
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "limits: [not, a, map]\n").unwrap();
        assert!(Config::load_from_path(&path).is_err());
    }
}
