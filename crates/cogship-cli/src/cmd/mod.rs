pub mod config;
pub mod models;
pub mod push;
pub mod select;

use anyhow::Context;
use cogship_core::config::Config;
use cogship_core::registry::ModelRegistry;
use cogship_core::CogshipError;
use std::path::Path;

/// Load `cogship.yaml` and build the registry from it.
pub fn load(root: &Path) -> anyhow::Result<(Config, ModelRegistry)> {
    let config = Config::load(root).context("failed to load config")?;
    let registry = config.registry(root).context("invalid model registry")?;
    Ok((config, registry))
}

/// Turn selection errors into a message that lists the valid ids.
pub fn selection_error(err: CogshipError, registry: &ModelRegistry) -> anyhow::Error {
    match err {
        CogshipError::UnknownModel(id) => anyhow::anyhow!(
            "invalid model '{}'\nvalid models: {}",
            id,
            registry.ids().join(", ")
        ),
        CogshipError::EmptySelection => anyhow::anyhow!(
            "no model selected\nvalid models: {} (or 'all')",
            registry.ids().join(", ")
        ),
        other => other.into(),
    }
}
