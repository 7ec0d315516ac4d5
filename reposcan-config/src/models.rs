use std::path::PathBuf;
use std::time::Duration;

/// Fully resolved configuration shared by every service role.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub channel: ChannelConfig,
    pub queue: QueueConfig,
    pub reaper: ReaperConfig,
    pub inspect: InspectConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Redis Streams settings for the request and result topics.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub redis_url: String,
    pub request_topic: String,
    pub result_topic: String,
    pub request_group: String,
    pub result_group: String,
    pub consumer_name: String,
    pub poll_interval_ms: u64,
    /// Approximate cap on stream length; `None` keeps everything.
    pub max_len: Option<usize>,
}

impl ChannelConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    pub concurrency: usize,
    pub max_attempts: u16,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub lease_ttl_secs: i64,
    pub poll_interval_ms: u64,
    pub housekeeping_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval_secs: u64,
    pub max_stale_minutes: i64,
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone)]
pub struct InspectConfig {
    pub working_dir: PathBuf,
    pub archive_base_url: String,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub github_token: Option<String>,
}

impl InspectConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
