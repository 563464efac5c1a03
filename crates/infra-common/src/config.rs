//! Layered settings loading
//!
//! Settings come from an optional TOML file, overridden by environment
//! variables of the form `PREFIX__KEY` or `PREFIX__SECTION__KEY`. Keys missing
//! from both layers fall back to the target type's serde defaults.

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::types::{Error, Result};

/// Separator between prefix, sections and keys in environment variables
const ENV_SEPARATOR: &str = "__";

/// Load settings of type `T` from `path` (if any) and the environment
pub fn load_settings<T: DeserializeOwned>(path: Option<&Path>, env_prefix: &str) -> Result<T> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(Error::Config(format!(
                "settings file not found: {}",
                path.display()
            )));
        }
        debug!("Loading settings from {}", path.display());
        builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(env_prefix)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let settings = builder.build()?;
    settings
        .try_deserialize::<T>()
        .map_err(|e| Error::Config(format!("invalid settings: {}", e)))
}
