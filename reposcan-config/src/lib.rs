//! Shared configuration library for reposcan.
//!
//! Every role (api, execution, migrate) loads the same [`Config`] through
//! [`ConfigLoader`]: built-in defaults, then an optional TOML file, then
//! environment variables, with a `.env` file read first when present.

pub mod loader;
pub mod models;
pub mod sources;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader};
pub use models::{
    ChannelConfig, Config, ConfigMetadata, DatabaseConfig, InspectConfig,
    QueueConfig, ReaperConfig, ServerConfig,
};
