//! Daemon configuration.
//!
//! Stored as TOML at `$FSUPLOAD_CONFIG` when set, otherwise:
//! - Linux: `~/.config/fsupload/daemon.toml`
//! - Windows: `%APPDATA%/fsupload/daemon.toml`

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use fsupload_protocol::constants::{UPLOAD_WS_PATH, WS_MAX_MESSAGE_SIZE};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV: &str = "FSUPLOAD_CONFIG";

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on.
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// WebSocket server port (0 = auto-assign).
    #[serde(default)]
    pub port: u16,

    /// HTTP path upgraded to the upload WebSocket.
    #[serde(default = "default_path")]
    pub path: String,

    /// When set, uploads resolving outside this directory are refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_root: Option<PathBuf>,

    /// Largest accepted WebSocket message, in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_path() -> String {
    UPLOAD_WS_PATH.into()
}

fn default_max_message_size() -> usize {
    WS_MAX_MESSAGE_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: 0,
            path: default_path(),
            upload_root: None,
            max_message_size: default_max_message_size(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }

    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("fsupload")
            .join("daemon.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("fsupload").join("daemon.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/fsupload/daemon.toml"))
    }
}
