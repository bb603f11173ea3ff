//! Configuration types and loading for the pooled client and quote endpoint.

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Default config.yaml embedded at compile time
pub const DEFAULT_CONFIG_YAML: &str = include_str!("../../config.yaml");

/// Main configuration struct
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub quote: QuoteConfig,
    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
    #[serde(default)]
    pub keep_alive: KeepAliveConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub tcp_keepalive: TcpKeepaliveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: default_listen_addr(),
            quote: QuoteConfig::default(),
            connection_pool: ConnectionPoolConfig::default(),
            keep_alive: KeepAliveConfig::default(),
            timeouts: TimeoutConfig::default(),
            reaper: ReaperConfig::default(),
            tcp_keepalive: TcpKeepaliveConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ============== Quote Endpoint Config ==============

#[derive(Debug, Deserialize, Clone)]
pub struct QuoteConfig {
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        QuoteConfig {
            upstream_url: default_upstream_url(),
        }
    }
}

// ============== Connection Pool Config ==============

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionPoolConfig {
    /// Cap for any single route without an override
    #[serde(default = "default_max_per_route")]
    pub max_per_route: usize,
    /// Cap across all routes, overrides included
    #[serde(default = "default_max_total")]
    pub max_total: usize,
    #[serde(default = "default_route_overrides")]
    pub route_overrides: Vec<RouteOverride>,
}

/// A route allowed a different cap than `max_per_route`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RouteOverride {
    #[serde(default = "default_override_scheme")]
    pub scheme: String,
    pub host: String,
    /// Defaults to the scheme's well-known port
    #[serde(default)]
    pub port: Option<u16>,
    pub max_connections: usize,
}

fn default_max_per_route() -> usize {
    40
}

fn default_max_total() -> usize {
    40
}

fn default_override_scheme() -> String {
    "http".to_string()
}

fn default_route_overrides() -> Vec<RouteOverride> {
    vec![RouteOverride {
        scheme: "http".to_string(),
        host: "localhost".to_string(),
        port: Some(8080),
        max_connections: 80,
    }]
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        ConnectionPoolConfig {
            max_per_route: default_max_per_route(),
            max_total: default_max_total(),
            route_overrides: default_route_overrides(),
        }
    }
}

// ============== Keep-Alive Config ==============

#[derive(Debug, Deserialize, Clone)]
pub struct KeepAliveConfig {
    /// Used when the server sends no usable Keep-Alive timeout
    #[serde(default = "default_keep_alive_seconds")]
    pub default_seconds: u64,
}

fn default_keep_alive_seconds() -> u64 {
    20
}

impl KeepAliveConfig {
    pub fn default_duration(&self) -> Duration {
        Duration::from_secs(self.default_seconds)
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        KeepAliveConfig {
            default_seconds: default_keep_alive_seconds(),
        }
    }
}

// ============== Timeout Config ==============

#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// Time allowed to establish TCP (and TLS) for a new connection
    #[serde(default = "default_connect_seconds")]
    pub connect_seconds: u64,
    /// Time allowed to wait for a pooled connection
    #[serde(default = "default_acquire_seconds")]
    pub acquire_seconds: u64,
    /// Time allowed between response reads
    #[serde(default = "default_socket_seconds")]
    pub socket_seconds: u64,
}

fn default_connect_seconds() -> u64 {
    30
}

fn default_acquire_seconds() -> u64 {
    30
}

fn default_socket_seconds() -> u64 {
    60
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            connect_seconds: default_connect_seconds(),
            acquire_seconds: default_acquire_seconds(),
            socket_seconds: default_socket_seconds(),
        }
    }
}

// ============== Reaper Config ==============

#[derive(Debug, Deserialize, Clone)]
pub struct ReaperConfig {
    #[serde(default = "default_reaper_interval")]
    pub interval_seconds: u64,
    /// Idle connections older than this are closed even without an expired keep-alive
    #[serde(default = "default_max_idle")]
    pub max_idle_seconds: u64,
}

fn default_reaper_interval() -> u64 {
    20
}

fn default_max_idle() -> u64 {
    30
}

impl Default for ReaperConfig {
    fn default() -> Self {
        ReaperConfig {
            interval_seconds: default_reaper_interval(),
            max_idle_seconds: default_max_idle(),
        }
    }
}

// ============== TCP Keepalive Config ==============

#[derive(Debug, Deserialize, Clone)]
pub struct TcpKeepaliveConfig {
    #[serde(default = "default_tcp_keepalive_enabled")]
    pub enabled: bool,
    #[serde(default = "default_tcp_keepalive_time")]
    pub time_seconds: u64,
    #[serde(default = "default_tcp_keepalive_interval")]
    pub interval_seconds: u64,
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    #[serde(default = "default_tcp_keepalive_retries")]
    pub retries: u32,
}

fn default_tcp_keepalive_enabled() -> bool {
    true
}

fn default_tcp_keepalive_time() -> u64 {
    60
}

fn default_tcp_keepalive_interval() -> u64 {
    10
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn default_tcp_keepalive_retries() -> u32 {
    3
}

impl Default for TcpKeepaliveConfig {
    fn default() -> Self {
        TcpKeepaliveConfig {
            enabled: default_tcp_keepalive_enabled(),
            time_seconds: default_tcp_keepalive_time(),
            interval_seconds: default_tcp_keepalive_interval(),
            #[cfg(any(target_os = "linux", target_os = "macos"))]
            retries: default_tcp_keepalive_retries(),
        }
    }
}

// ============== Logging Config ==============

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_requests")]
    pub log_requests: bool,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_redact_sensitive")]
    pub redact_sensitive_headers: bool,
    #[serde(default = "default_sensitive_headers")]
    pub sensitive_headers: Vec<String>,
    #[serde(default)]
    pub file: Option<FileLoggingConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileLoggingConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
    #[serde(default)]
    pub rotation: LogRotation,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_file_prefix() -> String {
    "quotepool.log".to_string()
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        FileLoggingConfig {
            log_dir: default_log_dir(),
            file_prefix: default_log_file_prefix(),
            rotation: LogRotation::Daily,
        }
    }
}

fn default_log_requests() -> bool {
    true
}

fn default_redact_sensitive() -> bool {
    true
}

fn default_sensitive_headers() -> Vec<String> {
    vec![
        "authorization".to_string(),
        "proxy-authorization".to_string(),
        "cookie".to_string(),
        "set-cookie".to_string(),
        "x-api-key".to_string(),
        "x-auth-token".to_string(),
    ]
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_requests: default_log_requests(),
            format: LogFormat::Text,
            redact_sensitive_headers: default_redact_sensitive(),
            sensitive_headers: default_sensitive_headers(),
            file: None,
        }
    }
}

// ============== Default Values ==============

pub fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

pub fn default_upstream_url() -> String {
    "https://gturnquist-quoters.cfapps.io/api/random".to_string()
}

// ============== Config Loading ==============

/// Get the directory containing the executable
fn exe_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

/// Load configuration from file, falling back to defaults when none is found
pub fn load_config(path: Option<&str>) -> Result<Config, Box<dyn std::error::Error + Send + Sync>> {
    let config_paths = if let Some(p) = path {
        vec![PathBuf::from(p)]
    } else {
        let mut paths = vec![PathBuf::from("config.yaml")];
        if let Some(dir) = exe_dir() {
            paths.push(dir.join("config.yaml"));
        }
        paths
    };

    for config_path in config_paths {
        if config_path.exists() {
            println!("Loading config from: {}", config_path.display());
            let content = fs::read_to_string(&config_path)?;
            let config: Config = serde_yaml_ng::from_str(&content)?;
            return Ok(config);
        }
    }

    Ok(Config::default())
}
