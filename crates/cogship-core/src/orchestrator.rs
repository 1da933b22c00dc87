//! The two-phase push state machine for a single model.
//!
//! ```text
//! render ─▶ establish credential ─▶ candidate push ─▶ revoke credential ─▶ official push
//!    │               │                    │                   │
//!    └── failure ────┴──── failure ───────┴──── failure ──────┴──▶ stop, report
//! ```
//!
//! Every step that fails ends this model's run with a `Failure` result. The
//! official phase is only reachable after a successful candidate phase.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::credential::{Credential, CredentialManager};
use crate::error::CogshipError;
use crate::io;
use crate::push_tool::{PushRequest, PushTool};
use crate::render::{self, RenderContext, RenderedConfig, TemplateSource};
use crate::types::{Model, Outcome, PushPhase, PushResult};

/// Progress notifications emitted while pipelines run.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    PhaseStarted { model: String, phase: PushPhase },
    PhaseFinished(PushResult),
    ModelFinished { model: String, reached_official: bool },
}

#[derive(Clone)]
pub struct PushOrchestrator {
    tool: Arc<dyn PushTool>,
    credentials: Arc<dyn CredentialManager>,
    cancel: CancellationToken,
    events: Option<UnboundedSender<PushEvent>>,
}

impl PushOrchestrator {
    pub fn new(tool: Arc<dyn PushTool>, credentials: Arc<dyn CredentialManager>) -> Self {
        Self {
            tool,
            credentials,
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<PushEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub(crate) fn emit(&self, event: PushEvent) {
        if let Some(tx) = &self.events {
            // A closed receiver only means nobody is watching progress.
            let _ = tx.send(event);
        }
    }

    /// Drive `model` through candidate and official pushes.
    ///
    /// Returns one result per phase attempted, in order.
    pub async fn run(&self, model: &Model) -> Vec<PushResult> {
        let span = tracing::info_span!("push", model = %model.id);
        self.run_inner(model).instrument(span).await
    }

    async fn run_inner(&self, model: &Model) -> Vec<PushResult> {
        let mut results = Vec::new();

        if self.cancel.is_cancelled() {
            self.fail(
                &mut results,
                model,
                PushPhase::Candidate,
                &CogshipError::Cancelled,
                Instant::now(),
            );
            return results;
        }

        // 1. Render into a directory private to this run
        let started = Instant::now();
        let (_run_dir, rendered) = match self.render(model) {
            Ok(pair) => pair,
            Err(e) => {
                self.fail(&mut results, model, PushPhase::Candidate, &e, started);
                return results;
            }
        };
        tracing::info!(path = %rendered.path.display(), "config rendered");

        // 2. Credential per model policy
        let credential = match self.credentials.establish(model).await {
            Ok(c) => c,
            Err(e) => {
                self.fail(&mut results, model, PushPhase::Candidate, &e, started);
                return results;
            }
        };

        if self.cancel.is_cancelled() {
            self.revoke_quietly(credential.as_ref()).await;
            self.fail(
                &mut results,
                model,
                PushPhase::Candidate,
                &CogshipError::Cancelled,
                Instant::now(),
            );
            return results;
        }

        // 3. Candidate. A panicking tool still gets the credential revoked.
        let env = credential.iter().map(Credential::env).collect();
        let candidate = match AssertUnwindSafe(self.attempt(
            model,
            PushPhase::Candidate,
            &rendered,
            env,
        ))
        .catch_unwind()
        .await
        {
            Ok(result) => result,
            Err(panic) => {
                self.revoke_quietly(credential.as_ref()).await;
                std::panic::resume_unwind(panic);
            }
        };
        let candidate_ok = candidate.is_success();
        self.record(&mut results, candidate);

        if !candidate_ok {
            self.revoke_quietly(credential.as_ref()).await;
            return results;
        }

        // 4. Revoke before anything goes to production
        if let Some(c) = &credential {
            let revoked_at = Instant::now();
            if let Err(e) = self.credentials.revoke(c).await {
                self.fail(&mut results, model, PushPhase::Official, &e, revoked_at);
                return results;
            }
        }

        if self.cancel.is_cancelled() {
            self.fail(
                &mut results,
                model,
                PushPhase::Official,
                &CogshipError::Cancelled,
                Instant::now(),
            );
            return results;
        }

        // 5. Official, same rendered config, no credential
        let official = self
            .attempt(model, PushPhase::Official, &rendered, Vec::new())
            .await;
        self.record(&mut results, official);

        results
    }

    /// Revoke on a path that already failed; errors are only logged.
    async fn revoke_quietly(&self, credential: Option<&Credential>) {
        if let Some(c) = credential {
            if let Err(e) = self.credentials.revoke(c).await {
                tracing::warn!(error = %e, "credential revoke after aborted candidate");
            }
        }
    }

    fn render(&self, model: &Model) -> crate::Result<(tempfile::TempDir, RenderedConfig)> {
        let dir = io::run_dir(&model.id)?;
        let rendered = render::render_to(
            &RenderContext::for_model(model),
            &TemplateSource::File(model.config_path.clone()),
            dir.path(),
        )?;
        Ok((dir, rendered))
    }

    async fn attempt(
        &self,
        model: &Model,
        phase: PushPhase,
        rendered: &RenderedConfig,
        env: Vec<(String, String)>,
    ) -> PushResult {
        self.emit(PushEvent::PhaseStarted {
            model: model.id.clone(),
            phase,
        });
        tracing::info!(%phase, "push started");

        let started_at = Utc::now();
        let started = Instant::now();
        let output = self
            .tool
            .push(PushRequest {
                model,
                phase,
                rendered_config: &rendered.path,
                env,
            })
            .await;

        let (outcome, detail) = match output {
            Ok(out) if out.success => (Outcome::Success, out.detail),
            Ok(out) => (
                Outcome::Failure,
                CogshipError::PushFailure {
                    phase: phase.to_string(),
                    detail: out.detail,
                }
                .to_string(),
            ),
            Err(e) => (Outcome::Failure, e.to_string()),
        };

        PushResult {
            model: model.id.clone(),
            phase,
            outcome,
            detail,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn fail(
        &self,
        results: &mut Vec<PushResult>,
        model: &Model,
        phase: PushPhase,
        error: &CogshipError,
        started: Instant,
    ) {
        let elapsed = started.elapsed();
        let result = PushResult {
            model: model.id.clone(),
            phase,
            outcome: Outcome::Failure,
            detail: error.to_string(),
            started_at: Utc::now()
                - chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero()),
            duration_ms: elapsed.as_millis() as u64,
        };
        self.record(results, result);
    }

    fn record(&self, results: &mut Vec<PushResult>, result: PushResult) {
        match result.outcome {
            Outcome::Success => tracing::info!(phase = %result.phase, "push succeeded"),
            Outcome::Failure => {
                tracing::warn!(phase = %result.phase, detail = %result.detail, "push failed")
            }
        }
        self.emit(PushEvent::PhaseFinished(result.clone()));
        results.push(result);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::types::CredentialPolicy;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn orchestrator(tool: ScriptedTool, creds: ScriptedCredentials) -> (PushOrchestrator, Arc<ScriptedTool>) {
        let tool = Arc::new(tool);
        let orch = PushOrchestrator::new(tool.clone(), Arc::new(creds));
        (orch, tool)
    }

    fn phases(results: &[PushResult]) -> Vec<(PushPhase, Outcome)> {
        results.iter().map(|r| (r.phase, r.outcome)).collect()
    }

    #[tokio::test]
    async fn success_runs_candidate_then_official() {
        let dir = TempDir::new().unwrap();
        let model = model_in(dir.path(), "clip", CredentialPolicy::None);
        let (orch, tool) = orchestrator(ScriptedTool::default(), ScriptedCredentials::default());

        let results = orch.run(&model).await;

        assert_eq!(
            phases(&results),
            vec![
                (PushPhase::Candidate, Outcome::Success),
                (PushPhase::Official, Outcome::Success)
            ]
        );
        assert_eq!(
            tool.calls(),
            vec![
                ("clip".to_string(), PushPhase::Candidate),
                ("clip".to_string(), PushPhase::Official)
            ]
        );
    }

    #[tokio::test]
    async fn candidate_failure_stops_before_official() {
        let dir = TempDir::new().unwrap();
        let model = model_in(dir.path(), "clip", CredentialPolicy::None);
        let (orch, tool) = orchestrator(
            ScriptedTool::failing("clip", PushPhase::Candidate),
            ScriptedCredentials::default(),
        );

        let results = orch.run(&model).await;

        assert_eq!(phases(&results), vec![(PushPhase::Candidate, Outcome::Failure)]);
        assert!(results[0].detail.contains("safety check failed"));
        assert_eq!(tool.calls().len(), 1);
    }

    #[tokio::test]
    async fn official_failure_is_recorded() {
        let dir = TempDir::new().unwrap();
        let model = model_in(dir.path(), "clip", CredentialPolicy::None);
        let (orch, _) = orchestrator(
            ScriptedTool::failing("clip", PushPhase::Official),
            ScriptedCredentials::default(),
        );

        let results = orch.run(&model).await;

        assert_eq!(
            phases(&results),
            vec![
                (PushPhase::Candidate, Outcome::Success),
                (PushPhase::Official, Outcome::Failure)
            ]
        );
    }

    #[tokio::test]
    async fn template_error_short_circuits_as_candidate_failure() {
        let dir = TempDir::new().unwrap();
        let mut model = model_in(dir.path(), "clip", CredentialPolicy::None);
        std::fs::write(&model.config_path, "gpu: {{gpu}}\n").unwrap();
        let (orch, tool) = orchestrator(ScriptedTool::default(), ScriptedCredentials::default());

        let results = orch.run(&model).await;
        assert_eq!(phases(&results), vec![(PushPhase::Candidate, Outcome::Failure)]);
        assert!(results[0].detail.contains("template error"));
        assert!(tool.calls().is_empty());

        model.config_path = dir.path().join("missing.yaml");
        let results = orch.run(&model).await;
        assert_eq!(phases(&results), vec![(PushPhase::Candidate, Outcome::Failure)]);
    }

    #[tokio::test]
    async fn credential_lifecycle_brackets_candidate() {
        let dir = TempDir::new().unwrap();
        let model = model_in(dir.path(), "llava", CredentialPolicy::ApiToken);
        let log = Arc::new(Mutex::new(Vec::new()));
        let tool = ScriptedTool {
            log: Some(log.clone()),
            ..Default::default()
        };
        let creds = ScriptedCredentials {
            log: Some(log.clone()),
            ..Default::default()
        };
        let (orch, tool) = orchestrator(tool, creds);

        let results = orch.run(&model).await;

        assert_eq!(results.len(), 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "establish:llava",
                "push:llava:candidate",
                "revoke:llava",
                "push:llava:official"
            ]
        );
        let calls = tool.calls.lock().unwrap();
        assert_eq!(
            calls[0].2,
            vec![("MODEL_API_TOKEN".to_string(), "tok-llava".to_string())]
        );
        assert!(calls[1].2.is_empty(), "official push must not see the token");
    }

    #[tokio::test]
    async fn credential_is_revoked_after_failed_candidate() {
        let dir = TempDir::new().unwrap();
        let model = model_in(dir.path(), "llava", CredentialPolicy::ApiToken);
        let log = Arc::new(Mutex::new(Vec::new()));
        let creds = ScriptedCredentials {
            log: Some(log.clone()),
            ..Default::default()
        };
        let (orch, _) = orchestrator(ScriptedTool::failing("llava", PushPhase::Candidate), creds);

        let results = orch.run(&model).await;

        assert_eq!(phases(&results), vec![(PushPhase::Candidate, Outcome::Failure)]);
        assert!(log.lock().unwrap().contains(&"revoke:llava".to_string()));
    }

    #[tokio::test]
    async fn establish_failure_is_candidate_failure() {
        let dir = TempDir::new().unwrap();
        let model = model_in(dir.path(), "llava", CredentialPolicy::ApiToken);
        let creds = ScriptedCredentials {
            fail_establish: true,
            ..Default::default()
        };
        let (orch, tool) = orchestrator(ScriptedTool::default(), creds);

        let results = orch.run(&model).await;

        assert_eq!(phases(&results), vec![(PushPhase::Candidate, Outcome::Failure)]);
        assert!(results[0].detail.contains("credential error"));
        assert!(tool.calls().is_empty());
    }

    #[tokio::test]
    async fn revoke_failure_blocks_official() {
        let dir = TempDir::new().unwrap();
        let model = model_in(dir.path(), "llava", CredentialPolicy::ApiToken);
        let creds = ScriptedCredentials {
            fail_revoke: true,
            ..Default::default()
        };
        let (orch, tool) = orchestrator(ScriptedTool::default(), creds);

        let results = orch.run(&model).await;

        assert_eq!(
            phases(&results),
            vec![
                (PushPhase::Candidate, Outcome::Success),
                (PushPhase::Official, Outcome::Failure)
            ]
        );
        assert!(results[1].detail.contains("revoke rejected"));
        assert_eq!(tool.calls().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_attempts_nothing() {
        let dir = TempDir::new().unwrap();
        let model = model_in(dir.path(), "clip", CredentialPolicy::None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (orch, tool) = orchestrator(ScriptedTool::default(), ScriptedCredentials::default());
        let orch = orch.with_cancel(cancel);

        let results = orch.run(&model).await;

        assert_eq!(phases(&results), vec![(PushPhase::Candidate, Outcome::Failure)]);
        assert_eq!(results[0].detail, "cancelled");
        assert!(tool.calls().is_empty());
    }

    #[tokio::test]
    async fn cancel_during_candidate_finishes_it_but_skips_official() {
        let dir = TempDir::new().unwrap();
        let model = model_in(dir.path(), "clip", CredentialPolicy::None);
        let cancel = CancellationToken::new();
        let tool = ScriptedTool {
            cancel_after_candidate: Some(cancel.clone()),
            ..Default::default()
        };
        let (orch, tool) = orchestrator(tool, ScriptedCredentials::default());
        let orch = orch.with_cancel(cancel);

        let results = orch.run(&model).await;

        assert_eq!(
            phases(&results),
            vec![
                (PushPhase::Candidate, Outcome::Success),
                (PushPhase::Official, Outcome::Failure)
            ]
        );
        assert_eq!(results[1].detail, "cancelled");
        assert_eq!(tool.calls().len(), 1);
    }

    #[tokio::test]
    async fn cancel_during_establish_revokes_and_skips_candidate() {
        let dir = TempDir::new().unwrap();
        let model = model_in(dir.path(), "llava", CredentialPolicy::ApiToken);
        let cancel = CancellationToken::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let creds = ScriptedCredentials {
            log: Some(log.clone()),
            cancel_on_establish: Some(cancel.clone()),
            ..Default::default()
        };
        let (orch, tool) = orchestrator(ScriptedTool::default(), creds);
        let orch = orch.with_cancel(cancel);

        let results = orch.run(&model).await;

        assert_eq!(phases(&results), vec![(PushPhase::Candidate, Outcome::Failure)]);
        assert_eq!(results[0].detail, "cancelled");
        assert!(tool.calls().is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["establish:llava", "revoke:llava"]);
    }

    #[tokio::test]
    async fn credential_is_revoked_when_candidate_panics() {
        let dir = TempDir::new().unwrap();
        let model = model_in(dir.path(), "llava", CredentialPolicy::ApiToken);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut tool = ScriptedTool::default();
        tool.panic_on.insert("llava".to_string());
        let creds = ScriptedCredentials {
            log: Some(log.clone()),
            ..Default::default()
        };
        let (orch, _tool) = orchestrator(tool, creds);

        let handle = tokio::spawn(async move { orch.run(&model).await });
        let err = handle.await.unwrap_err();

        assert!(err.is_panic());
        assert_eq!(*log.lock().unwrap(), vec!["establish:llava", "revoke:llava"]);
    }

    #[tokio::test]
    async fn events_follow_phase_order() {
        let dir = TempDir::new().unwrap();
        let model = model_in(dir.path(), "clip", CredentialPolicy::None);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let (orch, _) = orchestrator(ScriptedTool::default(), ScriptedCredentials::default());
        let orch = orch.with_events(tx);

        orch.run(&model).await;
        drop(orch);

        let mut kinds = Vec::new();
        while let Some(ev) = rx.recv().await {
            kinds.push(match ev {
                PushEvent::PhaseStarted { phase, .. } => format!("start:{phase}"),
                PushEvent::PhaseFinished(r) => format!("done:{}:{}", r.phase, r.outcome),
                PushEvent::ModelFinished { .. } => "model".to_string(),
            });
        }
        assert_eq!(
            kinds,
            vec![
                "start:candidate",
                "done:candidate:success",
                "start:official",
                "done:official:success"
            ]
        );
    }

    #[tokio::test]
    async fn rendered_config_is_removed_after_run() {
        let dir = TempDir::new().unwrap();
        let model = model_in(dir.path(), "clip", CredentialPolicy::None);
        let seen = Arc::new(Mutex::new(None));

        struct PathGrabber(Arc<Mutex<Option<std::path::PathBuf>>>);

        #[async_trait::async_trait]
        impl PushTool for PathGrabber {
            async fn push(
                &self,
                request: PushRequest<'_>,
            ) -> crate::Result<crate::push_tool::PushOutput> {
                let content = std::fs::read_to_string(request.rendered_config).unwrap();
                assert!(content.contains("predict.py:clip"));
                assert!(render::placeholders(&content).is_empty());
                *self.0.lock().unwrap() = Some(request.rendered_config.to_path_buf());
                Ok(crate::push_tool::PushOutput {
                    success: true,
                    detail: String::new(),
                })
            }
        }

        let orch = PushOrchestrator::new(
            Arc::new(PathGrabber(seen.clone())),
            Arc::new(ScriptedCredentials::default()),
        );
        orch.run(&model).await;

        let path = seen.lock().unwrap().clone().unwrap();
        assert!(!path.exists());
    }
}
