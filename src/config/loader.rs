// src/config/loader.rs

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization (including rejection of unknown
/// fields); it does **not** perform semantic validation. Use
/// [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    debug!(path = %path.display(), bytes = contents.len(), "read config file");

    load_from_str(&contents)
}

/// Parse TOML text into a `RawConfigFile`.
pub fn load_from_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` default functions).
/// - Checks for:
///   - unknown `after` references and self dependencies,
///   - DAG cycles,
///   - secret bindings that cannot be resolved,
///   - basic scheduler sanity.
///
/// The result can then be turned into a `DependencyGraph` with
/// [`ConfigFile::build_graph`].
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}
