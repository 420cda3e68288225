//! Configuration system for drover.
//!
//! Provides TOML-based configuration with:
//! - `[server]` scheduler settings (bind, auth token, lease and long-poll windows)
//! - `[agent]` runner settings (server URL, capacity, backend, filter labels)
//! - `[recovery]` crash-recovery store selection
//! - Config file layering (user config dir + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, Layer, LoadedConfig, load_config, load_config_file, load_config_with_options,
    xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
