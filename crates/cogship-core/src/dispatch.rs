//! Concurrent fan-out of the push pipeline across models.
//!
//! Selection is the only fail-fast point: once the model set is resolved,
//! every model runs in its own task and a failure (or panic) in one task is
//! captured as that model's entry without touching the others. `dispatch`
//! returns after every task has finished.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::error::Result;
use crate::orchestrator::{PushEvent, PushOrchestrator};
use crate::registry::ModelRegistry;
use crate::types::{reached_official, Model, PushResult};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("pipeline panicked: {0}")]
    Panicked(String),
}

pub type ModelOutcome = std::result::Result<Vec<PushResult>, DispatchError>;

// ---------------------------------------------------------------------------
// DispatchReport
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct DispatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Keyed by model id.
    pub results: BTreeMap<String, ModelOutcome>,
}

/// Flattened per-model view for printing.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub model: String,
    pub reached_official: bool,
    pub results: Vec<PushResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchReport {
    pub fn reached_official(&self, model: &str) -> bool {
        matches!(self.results.get(model), Some(Ok(r)) if reached_official(r))
    }

    /// True when every dispatched model finished its official push.
    pub fn all_succeeded(&self) -> bool {
        self.results.keys().all(|m| self.reached_official(m))
    }

    pub fn failed_models(&self) -> Vec<&str> {
        self.results
            .keys()
            .filter(|m| !self.reached_official(m))
            .map(String::as_str)
            .collect()
    }

    pub fn summaries(&self) -> Vec<ModelSummary> {
        self.results
            .iter()
            .map(|(model, outcome)| match outcome {
                Ok(results) => ModelSummary {
                    model: model.clone(),
                    reached_official: reached_official(results),
                    results: results.clone(),
                    error: None,
                },
                Err(e) => ModelSummary {
                    model: model.clone(),
                    reached_official: false,
                    results: Vec::new(),
                    error: Some(e.to_string()),
                },
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ParallelDispatcher
// ---------------------------------------------------------------------------

pub struct ParallelDispatcher {
    registry: Arc<ModelRegistry>,
    orchestrator: PushOrchestrator,
    max_parallel: Option<usize>,
}

impl ParallelDispatcher {
    pub fn new(registry: Arc<ModelRegistry>, orchestrator: PushOrchestrator) -> Self {
        Self {
            registry,
            orchestrator,
            max_parallel: None,
        }
    }

    /// Cap concurrent pipelines. `None` runs every model at once.
    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel = max_parallel.filter(|n| *n > 0);
        self
    }

    /// Resolve `selection` (`all`, an id, or a comma list) and push every
    /// selected model. Fails only when the selection cannot be resolved.
    pub async fn dispatch(&self, selection: &str) -> Result<DispatchReport> {
        let models = self.registry.resolve_all(selection)?;
        Ok(self.dispatch_models(models).await)
    }

    pub async fn dispatch_models(&self, models: Vec<Model>) -> DispatchReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let permits = self.max_parallel.unwrap_or(models.len()).max(1);
        tracing::info!(%run_id, models = models.len(), permits, "dispatching push pipelines");

        let semaphore = Arc::new(Semaphore::new(permits));
        let mut handles = Vec::with_capacity(models.len());

        for model in models {
            let sem = semaphore.clone();
            let orch = self.orchestrator.clone();
            let id = model.id.clone();
            let handle = tokio::spawn(async move {
                // The semaphore is never closed, so acquiring only waits.
                let _permit = sem.acquire_owned().await.ok();
                let results = orch.run(&model).await;
                orch.emit(PushEvent::ModelFinished {
                    model: model.id.clone(),
                    reached_official: reached_official(&results),
                });
                results
            });
            handles.push((id, handle));
        }

        let mut results = BTreeMap::new();
        for (id, handle) in handles {
            // Tasks are never aborted, so a join error is a panic.
            let outcome = handle.await.map_err(|e| {
                let reason = match e.try_into_panic() {
                    Ok(payload) => panic_message(payload),
                    Err(e) => e.to_string(),
                };
                tracing::error!(model = %id, %reason, "push pipeline panicked");
                DispatchError::Panicked(reason)
            });
            if let Err(e) = &outcome {
                self.orchestrator.emit(PushEvent::ModelFinished {
                    model: id.clone(),
                    reached_official: false,
                });
                tracing::warn!(model = %id, error = %e, "pipeline did not complete");
            }
            results.insert(id, outcome);
        }

        DispatchReport {
            run_id,
            started_at,
            results,
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
