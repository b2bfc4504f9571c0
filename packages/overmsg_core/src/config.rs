use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::token::Token;

// =============================================================================
// Persisted client record (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [session]
//                    heartbeat_interval_secs = 15
//
//   env var:         OVERMSG_SESSION__HEARTBEAT_INTERVAL_SECS=15   (double underscore = nesting)
//
//   (single underscore stays within field names: OVERMSG_SERVER_URLS)

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// The record the client keeps between runs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,
    /// Theme preference, only read by the presentation layer.
    #[serde(default)]
    pub is_dark: bool,
    #[serde(default = "default_server_urls")]
    pub server_urls: Vec<String>,
    #[serde(default)]
    pub session: SessionFileConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            token: None,
            is_dark: false,
            server_urls: default_server_urls(),
            session: SessionFileConfig::default(),
        }
    }
}

fn default_server_urls() -> Vec<String> {
    vec!["localhost".to_string()]
}

impl ClientConfig {
    /// Repair inconsistent records. Returns `true` when something changed
    /// and the record should be written back.
    pub fn normalize(&mut self) -> bool {
        let mut changed = false;

        if self.token.as_ref().is_some_and(|t| t.expose().trim().is_empty()) {
            self.token = None;
            changed = true;
        }

        let has_name = !self.name.trim().is_empty();
        if has_name != self.token.is_some() {
            debug!("name and token out of sync, clearing both");
            self.name.clear();
            self.token = None;
            changed = true;
        }

        self.server_urls.retain(|u| !u.trim().is_empty());
        if self.server_urls.is_empty() {
            self.server_urls = default_server_urls();
            changed = true;
        }

        changed
    }

    /// Name and token of a previously signed-in user.
    pub fn signed_in(&self) -> Option<(&str, &Token)> {
        self.token.as_ref().map(|t| (self.name.as_str(), t))
    }

    pub fn set_signed_in(&mut self, name: &str, token: Token) {
        self.name = name.to_string();
        self.token = Some(token);
    }

    pub fn clear_signed_in(&mut self) {
        self.name.clear();
        self.token = None;
    }
}

/// Session tunables (lives under `[session]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionFileConfig {
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default = "default_stream_port")]
    pub stream_port: u16,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub selection_deadline_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub dial_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_delivery_capacity")]
    pub delivery_capacity: usize,
    #[serde(default = "default_heartbeat_failure_threshold")]
    pub heartbeat_failure_threshold: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_secs")]
    pub reconnect_max_delay_secs: u64,
    /// 0 = keep retrying while the control channel answers.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            control_port: default_control_port(),
            stream_port: default_stream_port(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            probe_timeout_secs: default_timeout_secs(),
            selection_deadline_secs: default_timeout_secs(),
            dial_timeout_secs: default_timeout_secs(),
            request_timeout_secs: default_timeout_secs(),
            delivery_capacity: default_delivery_capacity(),
            heartbeat_failure_threshold: default_heartbeat_failure_threshold(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_secs: default_reconnect_max_delay_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

fn default_control_port() -> u16 {
    4422
}
fn default_stream_port() -> u16 {
    4242
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_delivery_capacity() -> usize {
    64
}
fn default_heartbeat_failure_threshold() -> u32 {
    2
}
fn default_reconnect_base_delay_ms() -> u64 {
    500
}
fn default_reconnect_max_delay_secs() -> u64 {
    60
}
fn default_max_reconnect_attempts() -> u32 {
    8
}

/// Build a figment that layers: defaults → config.toml → OVERMSG_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `OVERMSG_SESSION__DIAL_TIMEOUT_SECS=5`  →  `session.dial_timeout_secs = 5`
pub fn load_config(path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(ClientConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("OVERMSG_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from SessionFileConfig)
// =============================================================================

/// Server selection settings (runtime view).
#[derive(Clone, Debug)]
pub struct SelectorConfig {
    pub control_port: u16,
    pub stream_port: u16,
    /// Upper bound for a single liveness probe
    pub probe_timeout: Duration,
    /// Upper bound for the whole selection pass
    pub deadline: Duration,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self::from_file(&SessionFileConfig::default())
    }
}

impl SelectorConfig {
    pub fn from_file(fc: &SessionFileConfig) -> Self {
        Self {
            control_port: fc.control_port,
            stream_port: fc.stream_port,
            probe_timeout: Duration::from_secs(fc.probe_timeout_secs),
            deadline: Duration::from_secs(fc.selection_deadline_secs),
        }
    }
}

/// Session settings (runtime view).
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
    pub dial_timeout: Duration,
    pub request_timeout: Duration,
    /// Capacity of the delivery queue; a full queue blocks the ingest loop
    pub delivery_capacity: usize,
    /// Consecutive heartbeat failures tolerated while the connection still reads
    pub heartbeat_failure_threshold: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    /// None = unlimited
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_file(&SessionFileConfig::default())
    }
}

impl SessionConfig {
    pub fn from_file(fc: &SessionFileConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(fc.heartbeat_interval_secs.max(1)),
            dial_timeout: Duration::from_secs(fc.dial_timeout_secs),
            request_timeout: Duration::from_secs(fc.request_timeout_secs),
            delivery_capacity: fc.delivery_capacity.max(1),
            heartbeat_failure_threshold: fc.heartbeat_failure_threshold.max(1),
            reconnect_base_delay: Duration::from_millis(fc.reconnect_base_delay_ms),
            reconnect_max_delay: Duration::from_secs(fc.reconnect_max_delay_secs),
            max_reconnect_attempts: if fc.max_reconnect_attempts == 0 {
                None
            } else {
                Some(fc.max_reconnect_attempts)
            },
        }
    }
}

// =============================================================================
// Config file store
// =============================================================================

/// Reads and writes the client record at a fixed path.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, creating the file if it does not exist and writing
    /// back any normalization.
    pub fn load(&self) -> Result<ClientConfig, ConfigError> {
        if !self.path.exists() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            std::fs::write(&self.path, "").map_err(|source| ConfigError::Io {
                path: self.path.clone(),
                source,
            })?;
            info!(path = %self.path.display(), "created config file");
        }

        let mut config: ClientConfig = load_config(&self.path).extract().map_err(Box::new)?;
        if config.normalize() {
            self.save(&config)?;
        }
        Ok(config)
    }

    /// Read-modify-write the persisted keys, leaving any other keys intact.
    pub fn save(&self, config: &ClientConfig) -> Result<(), ConfigError> {
        let mut doc = if self.path.exists() {
            let contents = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
                path: self.path.clone(),
                source,
            })?;
            contents
                .parse::<toml::Table>()
                .map_err(|source| ConfigError::Parse {
                    path: self.path.clone(),
                    source,
                })?
        } else {
            toml::Table::new()
        };

        doc.insert("name".to_string(), toml::Value::String(config.name.clone()));
        match &config.token {
            Some(token) => {
                doc.insert(
                    "token".to_string(),
                    toml::Value::String(token.expose().to_string()),
                );
            }
            None => {
                doc.remove("token");
            }
        }
        doc.insert("is_dark".to_string(), toml::Value::Boolean(config.is_dark));
        doc.insert(
            "server_urls".to_string(),
            toml::Value::Array(
                config
                    .server_urls
                    .iter()
                    .cloned()
                    .map(toml::Value::String)
                    .collect(),
            ),
        );

        let serialized = toml::to_string_pretty(&doc)?;
        std::fs::write(&self.path, serialized).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "config saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── normalize ───────────────────────────────────────────────────────

    #[test]
    fn test_defaults_are_normal() {
        let mut c = ClientConfig::default();
        assert!(!c.normalize());
        assert_eq!(c.server_urls, vec!["localhost".to_string()]);
    }

    #[test]
    fn test_name_without_token_is_cleared() {
        let mut c = ClientConfig {
            name: "alice".into(),
            ..Default::default()
        };
        assert!(c.normalize());
        assert!(c.name.is_empty());
        assert!(c.signed_in().is_none());
    }

    #[test]
    fn test_token_without_name_is_cleared() {
        let mut c = ClientConfig {
            token: Token::parse("abc"),
            ..Default::default()
        };
        assert!(c.normalize());
        assert!(c.token.is_none());
    }

    #[test]
    fn test_empty_server_list_gets_default() {
        let mut c = ClientConfig {
            server_urls: vec![" ".into()],
            ..Default::default()
        };
        assert!(c.normalize());
        assert_eq!(c.server_urls, vec!["localhost".to_string()]);
    }

    // ── runtime views ───────────────────────────────────────────────────

    #[test]
    fn test_session_config_defaults() {
        let sc = SessionConfig::default();
        assert_eq!(sc.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(sc.dial_timeout, Duration::from_secs(10));
        assert_eq!(sc.heartbeat_failure_threshold, 2);
        assert_eq!(sc.reconnect_max_delay, Duration::from_secs(60));
        assert_eq!(sc.max_reconnect_attempts, Some(8));
    }

    #[test]
    fn test_zero_attempts_means_unlimited() {
        let fc = SessionFileConfig {
            max_reconnect_attempts: 0,
            ..Default::default()
        };
        assert!(SessionConfig::from_file(&fc).max_reconnect_attempts.is_none());
    }

    #[test]
    fn test_selector_config_defaults() {
        let sc = SelectorConfig::default();
        assert_eq!(sc.control_port, 4422);
        assert_eq!(sc.stream_port, 4242);
        assert_eq!(sc.deadline, Duration::from_secs(10));
    }

    // ── ConfigStore ─────────────────────────────────────────────────────

    #[test]
    fn test_load_creates_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path().join("nested/config.toml"));
        let config = store.load().unwrap();
        assert!(store.path().exists());
        assert_eq!(config.server_urls, vec!["localhost".to_string()]);
        assert!(config.signed_in().is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path().join("config.toml"));
        let mut config = store.load().unwrap();
        config.set_signed_in("alice", Token::parse("tok-1").unwrap());
        config.is_dark = true;
        config.server_urls = vec!["a.example".into(), "b.example".into()];
        store.save(&config).unwrap();

        let back = store.load().unwrap();
        let (name, token) = back.signed_in().unwrap();
        assert_eq!(name, "alice");
        assert_eq!(token.expose(), "tok-1");
        assert!(back.is_dark);
        assert_eq!(back.server_urls.len(), 2);
    }

    #[test]
    fn test_save_preserves_unknown_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "window_width = 768\n[session]\nheartbeat_interval_secs = 5\n",
        )
        .unwrap();
        let store = ConfigStore::new(&path);
        let config = store.load().unwrap();
        assert_eq!(config.session.heartbeat_interval_secs, 5);
        store.save(&config).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("window_width"));
        assert!(raw.contains("heartbeat_interval_secs = 5"));
    }

    #[test]
    fn test_clear_signed_in_removes_token_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(tmp.path().join("config.toml"));
        let mut config = store.load().unwrap();
        config.set_signed_in("bob", Token::parse("t").unwrap());
        store.save(&config).unwrap();

        config.clear_signed_in();
        store.save(&config).unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("token"));
    }

    #[test]
    fn test_inconsistent_file_is_repaired_on_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "name = \"alice\"\nserver_urls = []\n").unwrap();
        let config = ConfigStore::new(&path).load().unwrap();
        assert!(config.name.is_empty());
        assert_eq!(config.server_urls, vec!["localhost".to_string()]);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("localhost"));
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "server_urls = [\"chat.example\"]\n[session]\ncontrol_port = 8080\n",
        )
        .unwrap();
        let c: ClientConfig = load_config(&path).extract().unwrap();
        assert_eq!(c.server_urls, vec!["chat.example".to_string()]);
        assert_eq!(c.session.control_port, 8080);
        assert_eq!(c.session.stream_port, 4242);
    }
}
