//! Configuration vault – reads/writes `~/.ferment/config.toml`.
//!
//! ```toml
//! [hub]
//! enabled = true
//! base_url = "http://homeassistant.local:8123"
//! token = "..."
//!
//! [direct]
//! hosts = ["192.168.1.40", "192.168.1.41:8080"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use ferment_hal::{DirectConfig, HubConfig, RouterConfig};
use ferment_types::FermentError;
use serde::{Deserialize, Serialize};

/// Persisted backend configuration. `Debug` never shows the hub token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub direct: DirectConfig,
}

impl Config {
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            hub: self.hub.clone(),
            direct: self.direct.clone(),
        }
    }
}

pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".ferment").join("config.toml")
}

/// Load `path` with environment overrides applied. A missing file yields
/// `None`.
pub fn load_from(path: &Path) -> Result<Option<Config>, FermentError> {
    let mut cfg = read_file(path)?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

/// The file contents alone, without environment overrides.
pub(crate) fn read_file(path: &Path) -> Result<Option<Config>, FermentError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        FermentError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| FermentError::Config(format!("failed to parse {}: {e}", path.display())))
}

/// Like [`load_from`], falling back to defaults (plus overrides) when the
/// file is absent.
pub fn load_or_default(path: &Path) -> Result<Config, FermentError> {
    Ok(load_from(path)?.unwrap_or_else(|| {
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        cfg
    }))
}

/// | Variable | Effect |
/// |---|---|
/// | `FERMENT_HUB_URL` | `hub.base_url`, and enables the hub |
/// | `FERMENT_HUB_TOKEN` | `hub.token` |
/// | `FERMENT_DIRECT_HOSTS` | `direct.hosts`, comma separated |
///
/// Empty values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(url) = non_empty_var("FERMENT_HUB_URL") {
        cfg.hub.base_url = url;
        cfg.hub.enabled = true;
    }
    if let Some(token) = non_empty_var("FERMENT_HUB_TOKEN") {
        cfg.hub.token = token;
    }
    if let Some(hosts) = non_empty_var("FERMENT_DIRECT_HOSTS") {
        let hosts: Vec<String> = hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(String::from)
            .collect();
        if !hosts.is_empty() {
            cfg.direct.hosts = hosts;
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Write `cfg` to `path`, owner-only on Unix.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), FermentError> {
    let io_err = |what: &str, e: std::io::Error| {
        FermentError::Config(format!("failed to {what} {}: {e}", path.display()))
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("create directory for", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("restrict directory of", e))?;
        }
    }

    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| FermentError::Config(format!("failed to serialise config: {e}")))?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| io_err("write", e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| io_err("write", e))?;
    Ok(())
}
