//! Config file discovery and layered merging.
//!
//! Layers, lowest precedence first:
//! 1. `<config dir>/config.toml`, where the config dir is `$DROVER_CONFIG_DIR`
//!    or the platform config dir joined with `drover`
//! 2. `./drover.toml` in the project directory
//!
//! CLI flags and `DROVER_*` env vars are applied on top by the binary.

use std::path::{Path, PathBuf};

use crate::{ConfigError, DroverConfig, Result};

const PROJECT_CONFIG_FILE: &str = "drover.toml";
const USER_CONFIG_FILE: &str = "config.toml";
const APP_NAME: &str = "drover";
const CONFIG_DIR_ENV: &str = "DROVER_CONFIG_DIR";

/// Which discovery layer a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    User,
    Project,
}

/// One file consulted during discovery.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub layer: Layer,
    pub path: PathBuf,
    /// False when the file is absent or failed to parse.
    pub loaded: bool,
}

/// Merged configuration plus what discovery saw on the way.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: DroverConfig,
    /// Every file consulted, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Non-fatal problems: unparseable layers, committed tokens.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of the files that contributed to the config.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Discover and merge the user and project layers.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`], with `config_dir` replacing the user config dir.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let user = config_dir
        .map(|dir| dir.join(USER_CONFIG_FILE))
        .or_else(xdg_config_path);
    let project = project_dir
        .map(|dir| dir.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));

    let layers = user
        .map(|path| (Layer::User, path))
        .into_iter()
        .chain(std::iter::once((Layer::Project, project)));

    let mut loaded = LoadedConfig {
        config: DroverConfig::new(),
        sources: Vec::new(),
        warnings: Vec::new(),
    };
    for (layer, path) in layers {
        let source = merge_layer(&mut loaded, layer, path);
        loaded.sources.push(source);
    }
    Ok(loaded)
}

/// Load one file, bypassing discovery.
pub fn load_config_file(path: &Path) -> Result<DroverConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    DroverConfig::from_toml(&contents)
}

/// `<config dir>/config.toml`.
pub fn xdg_config_path() -> Option<PathBuf> {
    xdg_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// `$DROVER_CONFIG_DIR`, else the platform config dir joined with `drover`.
pub fn xdg_config_dir() -> Option<PathBuf> {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join(APP_NAME)),
    }
}

fn merge_layer(loaded: &mut LoadedConfig, layer: Layer, path: PathBuf) -> ConfigSource {
    let mut source = ConfigSource {
        layer,
        path,
        loaded: false,
    };
    if !source.path.is_file() {
        return source;
    }

    match load_config_file(&source.path) {
        Ok(config) => {
            if layer == Layer::Project && has_token(&config) {
                loaded.warnings.push(format!(
                    "{} contains a plaintext token; use DROVER_TOKEN or the user config instead",
                    source.path.display()
                ));
            }
            loaded.config.merge(config);
            source.loaded = true;
        }
        Err(e) => loaded
            .warnings
            .push(format!("Failed to load {}: {e}", source.path.display())),
    }
    source
}

/// Project files tend to be committed.
fn has_token(config: &DroverConfig) -> bool {
    config.server.as_ref().is_some_and(|s| s.token.is_some())
        || config.agent.as_ref().is_some_and(|a| a.token.is_some())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
