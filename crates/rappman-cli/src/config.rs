//! Configuration – reads `~/.rappman/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Persisted configuration stored in `~/.rappman/config.toml`.  Every field
/// has a serde default so a partial (or absent) file is always usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Human-chosen robot name; the outward identity appends a unique
    /// suffix when `unique_suffix` is set.
    #[serde(default = "default_robot_name")]
    pub robot_name: String,

    /// Semicolon-separated list of rapp catalog files.
    #[serde(default)]
    pub rapp_catalogs: String,

    /// Reconciliation period of the watch loop, in milliseconds.
    #[serde(default = "default_watch_period_ms")]
    pub watch_period_ms: u64,

    /// Glob patterns naming the hubs allowed to control this robot.
    /// Empty list means any hub (unless `local_only` is set).
    #[serde(default)]
    pub hub_whitelist: Vec<String>,

    /// Refuse all remote control and stay invisible on the hub.
    #[serde(default)]
    pub local_only: bool,

    /// Rapp to start as soon as the manager is up, if any.
    #[serde(default)]
    pub auto_start_rapp: Option<String>,

    /// Append a generated suffix to `robot_name` so several robots with the
    /// same base name can share a hub.
    #[serde(default = "default_unique_suffix")]
    pub unique_suffix: bool,

    /// WebSocket URL of the hub.
    #[serde(default = "default_hub_url")]
    pub hub_url: String,

    /// TCP port of the remote control channel.
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,

    /// Platform capabilities offered to rapp descriptors.
    #[serde(default)]
    pub available_capabilities: Vec<String>,

    /// Deadline for a single hub connection attempt, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Grace period between SIGTERM and SIGKILL when stopping a rapp, in
    /// milliseconds.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

fn default_robot_name() -> String {
    "robot".to_string()
}
fn default_watch_period_ms() -> u64 {
    2000
}
fn default_unique_suffix() -> bool {
    true
}
fn default_hub_url() -> String {
    "ws://localhost:9420".to_string()
}
fn default_remote_port() -> u16 {
    9421
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_stop_grace_ms() -> u64 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            robot_name: default_robot_name(),
            rapp_catalogs: String::new(),
            watch_period_ms: default_watch_period_ms(),
            hub_whitelist: Vec::new(),
            local_only: false,
            auto_start_rapp: None,
            unique_suffix: default_unique_suffix(),
            hub_url: default_hub_url(),
            remote_port: default_remote_port(),
            available_capabilities: Vec::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

impl Config {
    pub fn watch_period(&self) -> Duration {
        Duration::from_millis(self.watch_period_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Return the path to `~/.rappman/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rappman").join("config.toml")
}

/// Load the config from disk.  Returns the defaults when the file does not
/// exist; env overrides are applied in both cases.
pub fn load() -> Result<Config, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Config, String> {
    let mut cfg = if path.exists() {
        let raw = fs::read_to_string(path)
            .map_err(|e| format!("failed to read config at {}: {}", path.display(), e))?;
        toml::from_str(&raw).map_err(|e| format!("failed to parse config: {}", e))?
    } else {
        Config::default()
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Apply `RAPPMAN_*` environment variable overrides to `cfg`.  Invalid
/// values are ignored and the field keeps its previous value.
///
/// | Variable | Config field |
/// |---|---|
/// | `RAPPMAN_ROBOT_NAME` | `robot_name` |
/// | `RAPPMAN_RAPP_CATALOGS` | `rapp_catalogs` |
/// | `RAPPMAN_WATCH_PERIOD_MS` | `watch_period_ms` |
/// | `RAPPMAN_LOCAL_ONLY` | `local_only` |
/// | `RAPPMAN_AUTO_START` | `auto_start_rapp` |
/// | `RAPPMAN_HUB_URL` | `hub_url` |
/// | `RAPPMAN_REMOTE_PORT` | `remote_port` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("RAPPMAN_ROBOT_NAME") {
        cfg.robot_name = v;
    }
    if let Ok(v) = std::env::var("RAPPMAN_RAPP_CATALOGS") {
        cfg.rapp_catalogs = v;
    }
    if let Ok(v) = std::env::var("RAPPMAN_WATCH_PERIOD_MS")
        && let Ok(period) = v.parse::<u64>()
    {
        cfg.watch_period_ms = period;
    }
    if let Ok(v) = std::env::var("RAPPMAN_LOCAL_ONLY")
        && let Ok(flag) = v.parse::<bool>()
    {
        cfg.local_only = flag;
    }
    if let Ok(v) = std::env::var("RAPPMAN_AUTO_START") {
        cfg.auto_start_rapp = if v.is_empty() { None } else { Some(v) };
    }
    if let Ok(v) = std::env::var("RAPPMAN_HUB_URL") {
        cfg.hub_url = v;
    }
    if let Ok(v) = std::env::var("RAPPMAN_REMOTE_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.remote_port = port;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(cfg: &Config, path: &PathBuf) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, toml::to_string_pretty(cfg).unwrap()).unwrap();
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.robot_name, "robot");
        assert_eq!(cfg.watch_period_ms, 2000);
        assert_eq!(cfg.remote_port, 9421);
        assert_eq!(cfg.hub_url, "ws://localhost:9420");
        assert!(cfg.unique_suffix);
        assert!(!cfg.local_only);
        assert!(cfg.auto_start_rapp.is_none());
        assert_eq!(cfg.stop_grace(), Duration::from_secs(5));
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.robot_name = "turtle".to_string();
        cfg.hub_whitelist = vec!["gateway.*".to_string()];
        write_config(&cfg, &path);

        let loaded = load_from(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let cfg = load_from(&path).expect("no error");
        assert_eq!(cfg.robot_name, "robot");
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "robot_name = \"turtle\"\nlocal_only = true\n").unwrap();

        let cfg = load_from(&path).expect("load");
        assert_eq!(cfg.robot_name, "turtle");
        assert!(cfg.local_only);
        assert_eq!(cfg.watch_period_ms, 2000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "robot_name = [1, 2]\n").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn config_path_points_to_rappman_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".rappman"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn apply_env_overrides_changes_robot_name() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RAPPMAN_ROBOT_NAME", "crab") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.robot_name, "crab");
        unsafe { std::env::remove_var("RAPPMAN_ROBOT_NAME") };
    }

    #[test]
    fn apply_env_overrides_changes_hub_url() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RAPPMAN_HUB_URL", "ws://hub.lan:9420") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.hub_url, "ws://hub.lan:9420");
        unsafe { std::env::remove_var("RAPPMAN_HUB_URL") };
    }

    #[test]
    fn apply_env_overrides_changes_auto_start() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RAPPMAN_AUTO_START", "demo/talker") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.auto_start_rapp.as_deref(), Some("demo/talker"));
        unsafe { std::env::remove_var("RAPPMAN_AUTO_START") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_port() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RAPPMAN_REMOTE_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.remote_port, 9421);
        unsafe { std::env::remove_var("RAPPMAN_REMOTE_PORT") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_local_only() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("RAPPMAN_LOCAL_ONLY", "maybe") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(!cfg.local_only);
        unsafe { std::env::remove_var("RAPPMAN_LOCAL_ONLY") };
    }
}
