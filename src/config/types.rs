use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub tokens: TokenConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// This server's base URL as seen from the outside, without a trailing slash
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Require HTTP Basic credentials for token issuance
    #[serde(default)]
    pub enabled: bool,

    /// Username for token issuance
    #[serde(default)]
    pub username: Option<String>,

    /// Bcrypt hash of the password (generate with `gifforge hash-password`)
    #[serde(default)]
    pub password_hash: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesConfig {
    /// Hostnames videos may be fetched from
    #[serde(default)]
    pub hostname_whitelist: Vec<String>,

    /// Timeout for downloading one source video
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

fn default_fetch_timeout() -> u64 {
    60
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            hostname_whitelist: Vec::new(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfig {
    /// Number of random bytes per token
    #[serde(default = "default_token_size")]
    pub size_bytes: usize,

    /// Token lifetime in milliseconds
    #[serde(default = "default_token_ttl")]
    pub ttl_ms: u64,

    /// Interval of the expired token sweep in milliseconds
    #[serde(default = "default_ttl_resolution")]
    pub ttl_resolution_ms: u64,

    /// Maximum generation attempts before giving up on a unique token
    #[serde(default = "default_attempt_limit")]
    pub attempt_limit: u32,
}

fn default_token_size() -> usize {
    48
}
fn default_token_ttl() -> u64 {
    5 * 60 * 1000
}
fn default_ttl_resolution() -> u64 {
    1000
}
fn default_attempt_limit() -> u32 {
    64
}

impl TokenConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn ttl_resolution(&self) -> Duration {
        Duration::from_millis(self.ttl_resolution_ms.max(1))
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            size_bytes: default_token_size(),
            ttl_ms: default_token_ttl(),
            ttl_resolution_ms: default_ttl_resolution(),
            attempt_limit: default_attempt_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Maximum number of cached artifacts
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Maximum total size of cached artifacts in bytes
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Artifact lifetime in milliseconds (0 disables expiry)
    #[serde(default = "default_cache_ttl")]
    pub ttl_ms: u64,

    /// Interval of the expired artifact sweep in milliseconds
    #[serde(default = "default_ttl_resolution")]
    pub ttl_resolution_ms: u64,

    /// Proactively dispose expired artifacts instead of on next read
    #[serde(default)]
    pub ttl_autopurge: bool,

    /// Serve an expired artifact while it is recomputed in the background
    #[serde(default)]
    pub allow_stale: bool,

    /// Size charged for an artifact whose size cannot be read
    /// (default: max_size_bytes / max_files)
    #[serde(default)]
    pub fallback_entry_bytes: Option<u64>,

    /// Directory for downloads and converted artifacts (default: system temp dir)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

fn default_max_files() -> usize {
    256
}
fn default_max_size_bytes() -> u64 {
    1024 * 1024 * 1024
}
fn default_cache_ttl() -> u64 {
    60 * 60 * 1000
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_ms > 0).then(|| Duration::from_millis(self.ttl_ms))
    }

    pub fn ttl_resolution(&self) -> Duration {
        Duration::from_millis(self.ttl_resolution_ms.max(1))
    }

    /// Average expected artifact size, charged when the real size is unknown.
    pub fn fallback_entry_bytes(&self) -> u64 {
        self.fallback_entry_bytes
            .unwrap_or_else(|| self.max_size_bytes / (self.max_files.max(1) as u64))
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("gifforge"))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_size_bytes: default_max_size_bytes(),
            ttl_ms: default_cache_ttl(),
            ttl_resolution_ms: default_ttl_resolution(),
            ttl_autopurge: false,
            allow_stale: false,
            fallback_entry_bytes: None,
            scratch_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Maximum width and height of converted output in pixels
    #[serde(default = "default_max_output_size")]
    pub max_size: u32,
}

fn default_max_output_size() -> u32 {
    480
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_output_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    /// Maximum run time of one transcode
    #[serde(default = "default_transcode_timeout")]
    pub transcode_timeout_secs: u64,
}

fn default_transcode_timeout() -> u64 {
    120
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            transcode_timeout_secs: default_transcode_timeout(),
        }
    }
}
