use serde::Deserialize;
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub channel: FileChannelConfig,
    #[serde(default)]
    pub queue: FileQueueConfig,
    #[serde(default)]
    pub reaper: FileReaperConfig,
    #[serde(default)]
    pub inspect: FileInspectConfig,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileDatabaseConfig {
    pub url: Option<String>,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileChannelConfig {
    pub redis_url: Option<String>,
    pub request_topic: Option<String>,
    pub result_topic: Option<String>,
    pub request_group: Option<String>,
    pub result_group: Option<String>,
    pub consumer_name: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub max_len: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileQueueConfig {
    pub name: Option<String>,
    pub concurrency: Option<usize>,
    pub max_attempts: Option<u16>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub lease_ttl_secs: Option<i64>,
    pub poll_interval_ms: Option<u64>,
    pub housekeeping_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileReaperConfig {
    pub interval_secs: Option<u64>,
    pub max_stale_minutes: Option<i64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileInspectConfig {
    pub working_dir: Option<PathBuf>,
    pub archive_base_url: Option<String>,
    pub http_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    pub github_token: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub database_max_connections: Option<u32>,
    pub redis_url: Option<String>,
    pub request_topic: Option<String>,
    pub result_topic: Option<String>,
    pub request_group: Option<String>,
    pub result_group: Option<String>,
    pub consumer_name: Option<String>,
    pub queue_name: Option<String>,
    pub worker_concurrency: Option<usize>,
    pub queue_max_attempts: Option<u16>,
    pub reaper_interval_secs: Option<u64>,
    pub max_stale_minutes: Option<i64>,
    pub source_codes_dir: Option<PathBuf>,
    pub archive_base_url: Option<String>,
    pub github_token: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: var("REPOSCAN_CONFIG").map(PathBuf::from),
            server_host: var("SERVER_HOST"),
            server_port: parsed_var("SERVER_PORT"),
            database_url: var("DATABASE_URL"),
            database_max_connections: parsed_var("DATABASE_MAX_CONNECTIONS"),
            redis_url: var("REDIS_URL"),
            request_topic: var("REQUEST_TOPIC"),
            result_topic: var("RESULT_TOPIC"),
            request_group: var("REQUEST_GROUP"),
            result_group: var("RESULT_GROUP"),
            consumer_name: var("CONSUMER_NAME"),
            queue_name: var("QUEUE_NAME"),
            worker_concurrency: parsed_var("WORKER_CONCURRENCY"),
            queue_max_attempts: parsed_var("QUEUE_MAX_ATTEMPTS"),
            reaper_interval_secs: parsed_var("REAPER_INTERVAL_SECS"),
            max_stale_minutes: parsed_var("MAX_STALE_MINUTES"),
            source_codes_dir: var("SOURCE_CODES_DIR").map(PathBuf::from),
            archive_base_url: var("ARCHIVE_BASE_URL"),
            github_token: var("GITHUB_TOKEN"),
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    var(name).and_then(|raw| raw.parse().ok())
}
