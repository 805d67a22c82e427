//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

use peerchat_core::{ChatConfig, SERVICE_NAME};

/// Daemon configuration. File: ~/.config/peerchat/config.toml or /etc/peerchat/config.toml.
/// Env overrides: PEERCHAT_NAME, PEERCHAT_SERVICE, PEERCHAT_DISCOVERY_PORT,
/// PEERCHAT_TRANSPORT_PORT, PEERCHAT_LOG.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Name shown to other devices (default: host name plus a random 4 hex digit suffix).
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Service advertised and browsed for (default "peer-chat").
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Discovery UDP port (default 45700).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Session TCP port (default 45701).
    #[serde(default = "default_transport_port")]
    pub transport_port: u16,
    /// Log filter used when RUST_LOG is not set (default "info").
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_display_name() -> String {
    let host = std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
        .unwrap_or_else(|| "peer".to_string());
    suffixed_name(&host, rand::random())
}

/// Devices sharing a host name (or with none) still get distinct identities.
fn suffixed_name(host: &str, suffix: u16) -> String {
    format!("{}-{:04x}", host, suffix)
}
fn default_service_name() -> String {
    SERVICE_NAME.to_string()
}
fn default_discovery_port() -> u16 {
    45700
}
fn default_transport_port() -> u16 {
    45701
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            service_name: default_service_name(),
            discovery_port: default_discovery_port(),
            transport_port: default_transport_port(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn chat_config(&self) -> ChatConfig {
        ChatConfig::new(self.display_name.clone()).with_service_name(self.service_name.clone())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(s) = var("PEERCHAT_NAME").filter(|s| !s.is_empty()) {
            self.display_name = s;
        }
        if let Some(s) = var("PEERCHAT_SERVICE").filter(|s| !s.is_empty()) {
            self.service_name = s;
        }
        if let Some(p) = var("PEERCHAT_DISCOVERY_PORT").and_then(|s| s.parse::<u16>().ok()) {
            self.discovery_port = p;
        }
        if let Some(p) = var("PEERCHAT_TRANSPORT_PORT").and_then(|s| s.parse::<u16>().ok()) {
            self.transport_port = p;
        }
        if let Some(s) = var("PEERCHAT_LOG") {
            self.log_level = s;
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    c.apply_env(|k| std::env::var(k).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/peerchat/config.toml"));
    }
    out.push(PathBuf::from("/etc/peerchat/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => eprintln!("ignoring {}: {}", p.display(), e),
                },
                Err(e) => eprintln!("cannot read {}: {}", p.display(), e),
            }
            break;
        }
    }
    None
}
