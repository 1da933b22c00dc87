//! The authoritative list of publishable models.
//!
//! Both `cogship select` and the push dispatcher resolve identifiers here, so
//! there is exactly one place a model has to be added.

use crate::error::{CogshipError, Result};
use crate::types::Model;

/// Selection token that expands to every registered model.
pub const ALL: &str = "all";

#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    /// Sorted by id.
    models: Vec<Model>,
}

impl ModelRegistry {
    /// Build a registry, rejecting duplicate ids.
    pub fn new(models: Vec<Model>) -> Result<Self> {
        let mut models = models;
        models.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(pair) = models.windows(2).find(|w| w[0].id == w[1].id) {
            return Err(CogshipError::DuplicateModel(pair[0].id.clone()));
        }
        Ok(Self { models })
    }

    pub fn list(&self) -> &[Model] {
        &self.models
    }

    pub fn ids(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.id.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn resolve(&self, id: &str) -> Result<&Model> {
        self.models
            .binary_search_by(|m| m.id.as_str().cmp(id))
            .map(|idx| &self.models[idx])
            .map_err(|_| CogshipError::UnknownModel(id.to_string()))
    }

    /// Resolve `all` or a comma-separated list of ids.
    ///
    /// Entries are trimmed, blanks are skipped and repeats keep their first
    /// position. The first unknown id aborts the whole selection.
    pub fn resolve_all(&self, selection: &str) -> Result<Vec<Model>> {
        if selection.trim() == ALL {
            return Ok(self.models.clone());
        }

        let mut resolved: Vec<Model> = Vec::new();
        for id in selection.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let model = self.resolve(id)?;
            if !resolved.iter().any(|m| m.id == model.id) {
                resolved.push(model.clone());
            }
        }

        if resolved.is_empty() {
            return Err(CogshipError::EmptySelection);
        }
        Ok(resolved)
    }
}
