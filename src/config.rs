//! Process configuration, resolved once at start-up.
//!
//! Precedence: built-in defaults < JSON config file < environment (including
//! `.env`) < CLI flags (applied by the binary).

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::entity::chain::ChainSettings;
use crate::entity::resolver::DEFAULT_RESULT_CAP;

const DEFAULT_TABLE: &str = "mosques";
const DEFAULT_SERVICE_FN: &str = "search_mosques";
const DEFAULT_SLUG_FIELD: &str = "slug";
const DEFAULT_ORDER_BY: &str = "created_at";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_BIND: &str = "127.0.0.1:8787";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingEnvVar(String),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
    #[error("cannot read config file {}: {reason}", .path.display())]
    InvalidFile { path: PathBuf, reason: String },
}

#[derive(Clone)]
pub struct Config {
    pub store_url: Option<String>,
    pub store_key: Option<String>,
    pub table: String,
    pub service_fn: String,
    pub slug_field: String,
    /// `None` leaves the direct table page in backend order.
    pub order_by: Option<String>,
    pub result_cap: usize,
    pub timeout_secs: u64,
    pub log_level: String,
    pub bind_addr: SocketAddr,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("store_url", &self.store_url)
            .field("store_key", &self.store_key.as_ref().map(|_| "[redacted]"))
            .field("table", &self.table)
            .field("service_fn", &self.service_fn)
            .field("slug_field", &self.slug_field)
            .field("order_by", &self.order_by)
            .field("result_cap", &self.result_cap)
            .field("timeout_secs", &self.timeout_secs)
            .field("log_level", &self.log_level)
            .field("bind_addr", &self.bind_addr)
            .finish()
    }
}

impl Config {
    pub fn chain_settings(&self) -> ChainSettings {
        ChainSettings {
            table: self.table.clone(),
            slug_field: self.slug_field.clone(),
            order_by: self.order_by.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The store URL, required whenever the HTTP store is used.
    pub fn require_store_url(&self) -> Result<&str, ConfigError> {
        self.store_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("MASJID_STORE_URL".into()))
    }
}

/// Optional overrides read from the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub store_url: Option<String>,
    pub store_key: Option<String>,
    pub table: Option<String>,
    pub service_fn: Option<String>,
    pub slug_field: Option<String>,
    pub order_by: Option<String>,
    pub result_cap: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub log_level: Option<String>,
    pub bind_addr: Option<SocketAddr>,
}

/// `~/.config/masjid/config.json` (platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("masjid").join("config.json"))
}

/// Load `.env`, the config file, and the environment.
///
/// An explicit `path` must exist; the default path is optional.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();

    let file = match path {
        Some(p) => Some(read_file(p)?),
        None => match default_config_path() {
            Some(p) if p.exists() => Some(read_file(&p)?),
            _ => None,
        },
    };

    build_config(file.unwrap_or_default(), |key| std::env::var(key))
}

pub fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidFile {
        path: path.to_path_buf(),
        reason,
    };
    let data = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    serde_json::from_str(&data).map_err(|e| invalid(e.to_string()))
}

/// Merge file values with an env lookup. Pure, so tests need no `set_var`.
pub fn build_config<F>(file: FileConfig, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let env = |var: &str| lookup(var).ok().map(|v| v.trim().to_string());

    let pick = |var: &str, from_file: Option<String>, default: &str| -> String {
        env(var).or(from_file).unwrap_or_else(|| default.to_string())
    };

    fn parse<T: std::str::FromStr>(var: &str, raw: String) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        raw.parse::<T>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    }

    let result_cap = match env("MASJID_RESULT_CAP") {
        Some(raw) => parse::<usize>("MASJID_RESULT_CAP", raw)?,
        None => file.result_cap.unwrap_or(DEFAULT_RESULT_CAP),
    };
    if result_cap == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "MASJID_RESULT_CAP".into(),
            reason: "must be at least 1".into(),
        });
    }

    let timeout_secs = match env("MASJID_TIMEOUT_SECS") {
        Some(raw) => parse::<u64>("MASJID_TIMEOUT_SECS", raw)?,
        None => file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
    };

    let bind_addr = match env("MASJID_BIND") {
        Some(raw) => parse::<SocketAddr>("MASJID_BIND", raw)?,
        None => match file.bind_addr {
            Some(addr) => addr,
            None => parse::<SocketAddr>("MASJID_BIND", DEFAULT_BIND.to_string())?,
        },
    };

    let order_by = pick("MASJID_ORDER_BY", file.order_by, DEFAULT_ORDER_BY);

    Ok(Config {
        store_url: env("MASJID_STORE_URL").or(file.store_url).filter(|s| !s.is_empty()),
        store_key: env("MASJID_STORE_KEY").or(file.store_key).filter(|s| !s.is_empty()),
        table: pick("MASJID_TABLE", file.table, DEFAULT_TABLE),
        service_fn: pick("MASJID_SERVICE_FN", file.service_fn, DEFAULT_SERVICE_FN),
        slug_field: pick("MASJID_SLUG_FIELD", file.slug_field, DEFAULT_SLUG_FIELD),
        order_by: if order_by.is_empty() { None } else { Some(order_by) },
        result_cap,
        timeout_secs,
        log_level: pick("MASJID_LOG_LEVEL", file.log_level, DEFAULT_LOG_LEVEL),
        bind_addr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env::VarError;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, VarError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned().ok_or(VarError::NotPresent)
    }

    #[test]
    fn test_defaults() {
        let config = build_config(FileConfig::default(), lookup(&[])).unwrap();
        assert_eq!(config.table, "mosques");
        assert_eq!(config.service_fn, "search_mosques");
        assert_eq!(config.result_cap, 200);
        assert_eq!(config.order_by.as_deref(), Some("created_at"));
        assert!(config.store_url.is_none());
        assert!(config.require_store_url().is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let file = FileConfig {
            table: Some("venues".into()),
            result_cap: Some(50),
            ..FileConfig::default()
        };
        let config = build_config(file, lookup(&[("MASJID_RESULT_CAP", "75")])).unwrap();
        assert_eq!(config.table, "venues");
        assert_eq!(config.result_cap, 75);
    }

    #[test]
    fn test_empty_order_by_disables_ordering() {
        let config =
            build_config(FileConfig::default(), lookup(&[("MASJID_ORDER_BY", "")])).unwrap();
        assert_eq!(config.order_by, None);
        assert_eq!(config.chain_settings().order_by, None);
    }

    #[test]
    fn test_invalid_numbers_rejected() {
        let err = build_config(FileConfig::default(), lookup(&[("MASJID_RESULT_CAP", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnvVar { ref var, .. } if var == "MASJID_RESULT_CAP"
        ));

        let zero = build_config(FileConfig::default(), lookup(&[("MASJID_RESULT_CAP", "0")]));
        assert!(zero.is_err());

        let bind = build_config(FileConfig::default(), lookup(&[("MASJID_BIND", "nowhere")]));
        assert!(bind.is_err());
    }

    #[test]
    fn test_store_key_redacted_in_debug() {
        let config = build_config(
            FileConfig::default(),
            lookup(&[
                ("MASJID_STORE_URL", "https://db.example.org"),
                ("MASJID_STORE_KEY", "secret-key"),
            ]),
        )
        .unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("[redacted]"));
        assert_eq!(config.require_store_url().unwrap(), "https://db.example.org");
    }

    #[test]
    fn test_read_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"table": "masajid", "bind_addr": "0.0.0.0:9000"}"#).unwrap();
        let file = read_file(&path).unwrap();
        let config = build_config(file, lookup(&[])).unwrap();
        assert_eq!(config.table, "masajid");
        assert_eq!(config.bind_addr.port(), 9000);
    }

    #[test]
    fn test_read_file_rejects_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"tabel": "typo"}"#).unwrap();
        assert!(matches!(read_file(&path), Err(ConfigError::InvalidFile { .. })));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(load(Some(&missing)).is_err());
    }
}
