//! Subprocess invocation of the external publishing tool.
//!
//! The tool is a black box: it is run once per phase with the rendered
//! configuration and its exit status decides the outcome.
//!
//! # Protocol
//! - candidate: `<command> <candidate_args…>` (default `cog-safe-push --config <rendered>`)
//! - official:  `<command> <official_args…>` (default adds `--push-official-model`)
//!
//! Exit status 0 is success. Stdout and stderr are captured; their tail is
//! kept as the phase detail.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::{PushToolConfig, RENDERED_CONFIG_FIELD};
use crate::error::{CogshipError, Result};
use crate::io;
use crate::render::{self, RenderContext};
use crate::types::{Model, PushPhase};

/// Characters of tool output kept in a [`crate::types::PushResult`] detail.
pub const DETAIL_CHARS: usize = 2000;

/// One call to the push tool.
#[derive(Debug)]
pub struct PushRequest<'a> {
    pub model: &'a Model,
    pub phase: PushPhase,
    pub rendered_config: &'a Path,
    /// Additional environment, e.g. the model's ephemeral API token.
    pub env: Vec<(String, String)>,
}

/// What the tool reported for one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutput {
    pub success: bool,
    pub detail: String,
}

#[async_trait]
pub trait PushTool: Send + Sync {
    /// Run one phase. `Err` means the tool could not be run at all; a tool
    /// that ran and failed returns `Ok` with `success == false`.
    async fn push(&self, request: PushRequest<'_>) -> Result<PushOutput>;
}

// ---------------------------------------------------------------------------
// CommandPushTool
// ---------------------------------------------------------------------------

/// Runs the configured command as a child process from the project root.
#[derive(Debug, Clone)]
pub struct CommandPushTool {
    config: PushToolConfig,
    root: PathBuf,
}

impl CommandPushTool {
    pub fn new(config: PushToolConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            root: root.into(),
        }
    }

    /// Render the argument templates for one phase.
    pub fn args_for(&self, request: &PushRequest<'_>) -> Result<Vec<String>> {
        let templates = match request.phase {
            PushPhase::Candidate => &self.config.candidate_args,
            PushPhase::Official => &self.config.official_args,
        };
        let ctx = RenderContext::for_model(request.model).with(
            RENDERED_CONFIG_FIELD,
            request.rendered_config.to_string_lossy(),
        );
        templates
            .iter()
            .map(|t| render::render_str(&ctx, t))
            .collect()
    }
}

#[async_trait]
impl PushTool for CommandPushTool {
    async fn push(&self, request: PushRequest<'_>) -> Result<PushOutput> {
        let args = self.args_for(&request)?;

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&args)
            .current_dir(&self.root)
            .env("COGSHIP_MODEL", &request.model.id)
            .env("COGSHIP_PHASE", request.phase.as_str())
            .envs(&self.config.env)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            model = %request.model.id,
            phase = %request.phase,
            command = %self.config.command,
            ?args,
            "spawning push tool"
        );

        let child = cmd
            .spawn()
            .map_err(|e| CogshipError::PushToolSpawn(format!("{}: {e}", self.config.command)))?;

        let waited = match self.config.timeout_seconds {
            Some(secs) => {
                match tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output()).await
                {
                    Ok(r) => r,
                    // The child future was dropped, which kills the process.
                    Err(_) => {
                        return Ok(PushOutput {
                            success: false,
                            detail: format!("timed out after {secs}s"),
                        })
                    }
                }
            }
            None => child.wait_with_output().await,
        };
        let output = waited.map_err(|e| CogshipError::PushToolSpawn(e.to_string()))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        tracing::debug!(model = %request.model.id, phase = %request.phase, output = %combined);

        let success = output.status.success();
        let detail = if combined.trim().is_empty() {
            format!("push tool exited with {}", output.status)
        } else {
            io::tail(&combined, DETAIL_CHARS)
        };
        Ok(PushOutput { success, detail })
    }
}
