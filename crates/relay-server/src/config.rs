//! Server configuration: TOML file + CLI overrides.

use relay_core::{HubConfig, HubError, HubResult, DEFAULT_ECHO_PREFIX};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub hub: HubSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 0 = unlimited.
    #[serde(default)]
    pub max_connections: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: 0,
            max_message_size: default_max_message_size(),
        }
    }
}

/// `[hub]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct HubSection {
    #[serde(default = "default_echo_prefix")]
    pub echo_prefix: String,
    /// Seconds; 0 disables the idle timeout.
    #[serde(default)]
    pub idle_timeout: u64,
    /// Seconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout: u64,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            echo_prefix: default_echo_prefix(),
            idle_timeout: 0,
            send_timeout: default_send_timeout(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_message_size() -> usize {
    1_048_576
}
fn default_echo_prefix() -> String {
    DEFAULT_ECHO_PREFIX.to_string()
}
fn default_send_timeout() -> u64 {
    10
}

/// Values given on the command line; each one wins over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub idle_timeout: Option<u64>,
    pub echo_prefix: Option<String>,
    pub max_connections: Option<usize>,
}

/// Resolved server configuration (CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub max_message_size: usize,
    pub echo_prefix: String,
    pub idle_timeout: Option<Duration>,
    pub send_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::resolve(ConfigFile::default(), CliOverrides::default())
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides. A missing file
    /// means defaults.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> HubResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| HubError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Ok(Self::resolve(file_config, cli))
    }

    fn resolve(file: ConfigFile, cli: CliOverrides) -> Self {
        let idle_secs = cli.idle_timeout.unwrap_or(file.hub.idle_timeout);
        Self {
            host: cli.host.unwrap_or(file.server.host),
            port: cli.port.unwrap_or(file.server.port),
            max_connections: cli.max_connections.unwrap_or(file.server.max_connections),
            max_message_size: file.server.max_message_size,
            echo_prefix: cli.echo_prefix.unwrap_or(file.hub.echo_prefix),
            idle_timeout: (idle_secs > 0).then_some(Duration::from_secs(idle_secs)),
            send_timeout: Duration::from_secs(file.hub.send_timeout),
        }
    }

    /// Settings handed to the broadcast hub.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            echo_prefix: self.echo_prefix.clone(),
            idle_timeout: self.idle_timeout,
            send_timeout: self.send_timeout,
        }
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
