use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// CredentialPolicy
// ---------------------------------------------------------------------------

/// Whether a model's candidate push needs an ephemeral credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialPolicy {
    #[default]
    None,
    ApiToken,
}

impl fmt::Display for CredentialPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialPolicy::None => write!(f, "none"),
            CredentialPolicy::ApiToken => write!(f, "api_token"),
        }
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// A publishable model as registered in `cogship.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    /// Template for the push tool's configuration, relative to the project root.
    pub config_path: PathBuf,
    /// Predictor entry point, e.g. `predict.py:Predictor`.
    pub predictor: String,
    #[serde(default)]
    pub credential: CredentialPolicy,
}

// ---------------------------------------------------------------------------
// PushPhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushPhase {
    Candidate,
    Official,
}

impl PushPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushPhase::Candidate => "candidate",
            PushPhase::Official => "official",
        }
    }
}

impl fmt::Display for PushPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure => write!(f, "failure"),
        }
    }
}

// ---------------------------------------------------------------------------
// PushResult
// ---------------------------------------------------------------------------

/// The record of one phase attempted for one model. Never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResult {
    pub model: String,
    pub phase: PushPhase,
    pub outcome: Outcome,
    pub detail: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl PushResult {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// True when `results` ends with a successful official push that follows a
/// successful candidate push.
pub fn reached_official(results: &[PushResult]) -> bool {
    let candidate_ok = results
        .iter()
        .any(|r| r.phase == PushPhase::Candidate && r.is_success());
    let official_ok = results
        .last()
        .is_some_and(|r| r.phase == PushPhase::Official && r.is_success());
    candidate_ok && official_ok
}
