//! Ephemeral per-model credentials for the candidate push.
//!
//! Minting and revoking tokens is delegated to shell commands configured in
//! `cogship.yaml`; this module only decides when to call them and keeps the
//! token out of logs.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::CredentialsConfig;
use crate::error::{CogshipError, Result};
use crate::io;
use crate::types::{CredentialPolicy, Model};

/// A short-lived token scoped to one model's run.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub model: String,
    /// Environment variable the push tool receives the token in.
    pub env_var: String,
    token: String,
}

impl Credential {
    pub fn new(model: impl Into<String>, env_var: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            env_var: env_var.into(),
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// `(name, value)` pair to hand to the push tool.
    pub fn env(&self) -> (String, String) {
        (self.env_var.clone(), self.token.clone())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("model", &self.model)
            .field("env_var", &self.env_var)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait CredentialManager: Send + Sync {
    /// Create the credential `model` needs, or `None` when its policy
    /// requires none.
    async fn establish(&self, model: &Model) -> Result<Option<Credential>>;

    /// Invalidate `credential`. Revoking a token that is already gone is not
    /// an error.
    async fn revoke(&self, credential: &Credential) -> Result<()>;
}

// ---------------------------------------------------------------------------
// CommandCredentials
// ---------------------------------------------------------------------------

/// Runs `credentials.create` / `credentials.revoke` through `sh -c`.
#[derive(Debug, Clone)]
pub struct CommandCredentials {
    config: CredentialsConfig,
    root: PathBuf,
}

impl CommandCredentials {
    pub fn new(config: CredentialsConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            root: root.into(),
        }
    }

    async fn run_shell(&self, script: &str, env: &[(&str, &str)]) -> Result<String> {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script])
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in env {
            cmd.env(k, v);
        }
        let output = cmd
            .output()
            .await
            .map_err(|e| CogshipError::Credential(format!("failed to run '{script}': {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CogshipError::Credential(format!(
                "'{script}' exited with {}: {}",
                output.status,
                io::tail(&stderr, 500)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl CredentialManager for CommandCredentials {
    async fn establish(&self, model: &Model) -> Result<Option<Credential>> {
        if model.credential == CredentialPolicy::None {
            return Ok(None);
        }
        let script = self.config.create.as_deref().ok_or_else(|| {
            CogshipError::Credential(format!(
                "model '{}' needs an api_token but credentials.create is not configured",
                model.id
            ))
        })?;
        let token = self
            .run_shell(script, &[("COGSHIP_MODEL", model.id.as_str())])
            .await?;
        if token.is_empty() {
            return Err(CogshipError::Credential(format!(
                "credentials.create printed no token for '{}'",
                model.id
            )));
        }
        tracing::info!(model = %model.id, env_var = %self.config.env_var, "credential established");
        Ok(Some(Credential::new(&model.id, &self.config.env_var, token)))
    }

    async fn revoke(&self, credential: &Credential) -> Result<()> {
        let Some(script) = self.config.revoke.as_deref() else {
            tracing::debug!(model = %credential.model, "no credentials.revoke configured");
            return Ok(());
        };
        self.run_shell(
            script,
            &[
                ("COGSHIP_MODEL", credential.model.as_str()),
                ("COGSHIP_CREDENTIAL", credential.token()),
            ],
        )
        .await?;
        tracing::info!(model = %credential.model, "credential revoked");
        Ok(())
    }
}
