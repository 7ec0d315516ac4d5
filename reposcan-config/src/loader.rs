use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use url::Url;

use crate::models::{
    ChannelConfig, Config, ConfigMetadata, DatabaseConfig, InspectConfig,
    QueueConfig, ReaperConfig, ServerConfig,
};
use crate::sources::{EnvConfig, FileConfig};

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] =
    ["reposcan.toml", "config/reposcan.toml"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

/// Loaded configuration plus non-fatal remarks for the log.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: Vec<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        let env = EnvConfig::gather();
        let (file, config_path) = self.load_file_config(&env)?;

        let mut warnings = Vec::new();
        if config_path.is_none() {
            warnings.push(
                "no reposcan.toml detected; using defaults and environment variables"
                    .to_string(),
            );
        }

        let metadata = ConfigMetadata {
            config_path,
            env_file_loaded,
        };
        let config = compose_config(file.unwrap_or_default(), env, metadata)?;

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigLoadError::MissingConfig { path });
                }
                path
            }
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
            {
                Some(path) => path,
                None => return Ok((None, None)),
            },
        };

        let file = read_file_config(&path)?;
        Ok((Some(file), Some(path)))
    }
}

pub fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merge file values with environment overrides and apply defaults.
pub fn compose_config(
    file: FileConfig,
    env: EnvConfig,
    metadata: ConfigMetadata,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        server: file_server,
        database: file_database,
        channel: file_channel,
        queue: file_queue,
        reaper: file_reaper,
        inspect: file_inspect,
    } = file;

    let server = ServerConfig {
        host: env
            .server_host
            .or(file_server.host)
            .unwrap_or_else(|| "0.0.0.0".to_string()),
        port: env.server_port.or(file_server.port).unwrap_or(8080),
    };

    let database = DatabaseConfig {
        url: required("database.url", env.database_url.or(file_database.url))?,
        max_connections: env
            .database_max_connections
            .or(file_database.max_connections)
            .unwrap_or(10),
    };

    let channel = ChannelConfig {
        redis_url: required(
            "channel.redis_url",
            env.redis_url.or(file_channel.redis_url),
        )?,
        request_topic: required(
            "channel.request_topic",
            env.request_topic
                .or(file_channel.request_topic)
                .or_else(|| Some("scan-requests".to_string())),
        )?,
        result_topic: required(
            "channel.result_topic",
            env.result_topic
                .or(file_channel.result_topic)
                .or_else(|| Some("scan-results".to_string())),
        )?,
        request_group: required(
            "channel.request_group",
            env.request_group
                .or(file_channel.request_group)
                .or_else(|| Some("execution".to_string())),
        )?,
        result_group: required(
            "channel.result_group",
            env.result_group
                .or(file_channel.result_group)
                .or_else(|| Some("api".to_string())),
        )?,
        consumer_name: env
            .consumer_name
            .or(file_channel.consumer_name)
            .unwrap_or_else(default_consumer_name),
        poll_interval_ms: file_channel.poll_interval_ms.unwrap_or(500),
        max_len: file_channel.max_len,
    };

    let queue = QueueConfig {
        name: env
            .queue_name
            .or(file_queue.name)
            .unwrap_or_else(|| "default".to_string()),
        concurrency: env
            .worker_concurrency
            .or(file_queue.concurrency)
            .unwrap_or(10),
        max_attempts: env
            .queue_max_attempts
            .or(file_queue.max_attempts)
            .unwrap_or(25),
        backoff_base_ms: file_queue.backoff_base_ms.unwrap_or(2_000),
        backoff_max_ms: file_queue.backoff_max_ms.unwrap_or(300_000),
        lease_ttl_secs: file_queue.lease_ttl_secs.unwrap_or(300),
        poll_interval_ms: file_queue.poll_interval_ms.unwrap_or(250),
        housekeeping_interval_secs: file_queue
            .housekeeping_interval_secs
            .unwrap_or(30),
    };
    if queue.concurrency == 0 {
        return Err(ConfigLoadError::Invalid {
            field: "queue.concurrency",
            reason: "must be at least 1".to_string(),
        });
    }
    check_range("queue.lease_ttl_secs", queue.lease_ttl_secs, MAX_LEASE_TTL_SECS)?;

    let reaper = ReaperConfig {
        interval_secs: env
            .reaper_interval_secs
            .or(file_reaper.interval_secs)
            .unwrap_or(60),
        max_stale_minutes: env
            .max_stale_minutes
            .or(file_reaper.max_stale_minutes)
            .unwrap_or(30),
    };
    if reaper.interval_secs == 0 {
        return Err(ConfigLoadError::Invalid {
            field: "reaper.interval_secs",
            reason: "must be at least 1".to_string(),
        });
    }
    check_range(
        "reaper.max_stale_minutes",
        reaper.max_stale_minutes,
        MAX_STALE_MINUTES,
    )?;

    let archive_base_url = env
        .archive_base_url
        .or(file_inspect.archive_base_url)
        .unwrap_or_else(|| "https://api.github.com".to_string());
    Url::parse(&archive_base_url).map_err(|source| {
        ConfigLoadError::InvalidUrl {
            field: "inspect.archive_base_url",
            source,
        }
    })?;

    let inspect = InspectConfig {
        working_dir: env
            .source_codes_dir
            .or(file_inspect.working_dir)
            .unwrap_or_else(|| PathBuf::from("./source_codes")),
        archive_base_url,
        http_timeout_secs: file_inspect.http_timeout_secs.unwrap_or(120),
        user_agent: file_inspect.user_agent.unwrap_or_else(|| {
            concat!("reposcan/", env!("CARGO_PKG_VERSION")).to_string()
        }),
        github_token: env.github_token.or(file_inspect.github_token),
    };

    Ok(Config {
        server,
        database,
        channel,
        queue,
        reaper,
        inspect,
        metadata,
    })
}

/// One day.
const MAX_LEASE_TTL_SECS: i64 = 24 * 60 * 60;
/// One year.
const MAX_STALE_MINUTES: i64 = 365 * 24 * 60;

fn check_range(
    field: &'static str,
    value: i64,
    max: i64,
) -> Result<(), ConfigLoadError> {
    if (1..=max).contains(&value) {
        return Ok(());
    }
    Err(ConfigLoadError::Invalid {
        field,
        reason: format!("must be between 1 and {max}, got {value}"),
    })
}

fn required(
    field: &'static str,
    value: Option<String>,
) -> Result<String, ConfigLoadError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigLoadError::Missing { field })
}

fn default_consumer_name() -> String {
    let host =
        std::env::var("HOSTNAME").unwrap_or_else(|_| "reposcan".to_string());
    format!("{host}-{}", std::process::id())
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("required setting `{field}` is missing")]
    Missing { field: &'static str },
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("invalid URL for `{field}`")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::FileQueueConfig;
    use std::io::Write;

    fn base_env() -> EnvConfig {
        EnvConfig {
            database_url: Some("postgres://localhost/reposcan".into()),
            redis_url: Some("redis://127.0.0.1:6379".into()),
            ..EnvConfig::default()
        }
    }

    #[test]
    fn defaults_fill_optional_settings() {
        let config = compose_config(
            FileConfig::default(),
            base_env(),
            ConfigMetadata::default(),
        )
        .expect("config");

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.channel.request_topic, "scan-requests");
        assert_eq!(config.channel.result_topic, "scan-results");
        assert_eq!(config.queue.concurrency, 10);
        assert_eq!(config.reaper.max_stale_minutes, 30);
        assert_eq!(config.inspect.archive_base_url, "https://api.github.com");
    }

    #[test]
    fn missing_database_url_is_rejected() {
        let env = EnvConfig {
            database_url: None,
            ..base_env()
        };
        let err =
            compose_config(FileConfig::default(), env, ConfigMetadata::default())
                .unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::Missing {
                field: "database.url"
            }
        ));
    }

    #[test]
    fn blank_redis_url_counts_as_missing() {
        let env = EnvConfig {
            redis_url: Some("   ".into()),
            ..base_env()
        };
        let err =
            compose_config(FileConfig::default(), env, ConfigMetadata::default())
                .unwrap_err();
        assert!(matches!(
            err,
            ConfigLoadError::Missing {
                field: "channel.redis_url"
            }
        ));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let env = EnvConfig {
            worker_concurrency: Some(0),
            ..base_env()
        };
        assert!(
            compose_config(FileConfig::default(), env, ConfigMetadata::default())
                .is_err()
        );
    }

    #[test]
    fn stale_window_must_be_positive_and_bounded() {
        for minutes in [0, -30, i64::MAX] {
            let env = EnvConfig {
                max_stale_minutes: Some(minutes),
                ..base_env()
            };
            let err =
                compose_config(FileConfig::default(), env, ConfigMetadata::default())
                    .unwrap_err();
            assert!(matches!(
                err,
                ConfigLoadError::Invalid {
                    field: "reaper.max_stale_minutes",
                    ..
                }
            ));
        }
    }

    #[test]
    fn lease_ttl_must_be_positive() {
        for secs in [0, -1] {
            let file = FileConfig {
                queue: FileQueueConfig {
                    lease_ttl_secs: Some(secs),
                    ..FileQueueConfig::default()
                },
                ..FileConfig::default()
            };
            let err = compose_config(file, base_env(), ConfigMetadata::default())
                .unwrap_err();
            assert!(matches!(
                err,
                ConfigLoadError::Invalid {
                    field: "queue.lease_ttl_secs",
                    ..
                }
            ));
        }
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [server]
            port = 9000

            [channel]
            request_topic = "from-file"

            [reaper]
            max_stale_minutes = 5
            "#
        )
        .unwrap();

        let parsed = read_file_config(file.path()).expect("parse");
        let env = EnvConfig {
            request_topic: Some("from-env".into()),
            ..base_env()
        };
        let config =
            compose_config(parsed, env, ConfigMetadata::default()).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.channel.request_topic, "from-env");
        assert_eq!(config.reaper.max_stale_minutes, 5);
    }
}
