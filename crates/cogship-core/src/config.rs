use crate::error::{CogshipError, Result};
use crate::paths;
use crate::registry::ModelRegistry;
use crate::render;
use crate::types::{CredentialPolicy, Model};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Fields a model template may reference.
pub const MODEL_FIELDS: &[&str] = &["id", "predictor", "config_path"];

/// Extra field available to push tool arguments.
pub const RENDERED_CONFIG_FIELD: &str = "rendered_config";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// PushToolConfig
// ---------------------------------------------------------------------------

/// How to invoke the external publishing tool.
///
/// Arguments are templates rendered per model; `{{rendered_config}}` expands
/// to the path of that run's rendered configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushToolConfig {
    #[serde(default = "default_push_command")]
    pub command: String,
    #[serde(default = "default_candidate_args")]
    pub candidate_args: Vec<String>,
    #[serde(default = "default_official_args")]
    pub official_args: Vec<String>,
    /// Kill a phase that runs longer than this. No limit when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Extra environment for every invocation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

fn default_push_command() -> String {
    "cog-safe-push".to_string()
}

fn default_candidate_args() -> Vec<String> {
    vec!["--config".to_string(), "{{rendered_config}}".to_string()]
}

fn default_official_args() -> Vec<String> {
    vec![
        "--config".to_string(),
        "{{rendered_config}}".to_string(),
        "--push-official-model".to_string(),
    ]
}

impl Default for PushToolConfig {
    fn default() -> Self {
        Self {
            command: default_push_command(),
            candidate_args: default_candidate_args(),
            official_args: default_official_args(),
            timeout_seconds: None,
            env: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// CredentialsConfig
// ---------------------------------------------------------------------------

/// Shell commands that mint and revoke per-model API tokens.
///
/// `create` prints the token on stdout. `revoke` receives it in
/// `COGSHIP_CREDENTIAL`. Both see the model id in `COGSHIP_MODEL`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoke: Option<String>,
    /// Variable the candidate push receives the token in.
    #[serde(default = "default_env_var")]
    pub env_var: String,
}

fn default_env_var() -> String {
    "MODEL_API_TOKEN".to_string()
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            create: None,
            revoke: None,
            env_var: default_env_var(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub models: Vec<Model>,
    #[serde(default)]
    pub push: PushToolConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Upper bound on concurrent model pipelines. Unbounded when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(CogshipError::NotInitialized(root.display().to_string()));
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    /// Build the model registry with template paths resolved against `root`.
    pub fn registry(&self, root: &Path) -> Result<ModelRegistry> {
        let models = self
            .models
            .iter()
            .map(|m| Model {
                config_path: paths::resolve(root, &m.config_path),
                ..m.clone()
            })
            .collect();
        ModelRegistry::new(models)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self, root: &Path) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let error = |message: String| ConfigWarning {
            level: WarnLevel::Error,
            message,
        };
        let warning = |message: String| ConfigWarning {
            level: WarnLevel::Warning,
            message,
        };

        if self.models.is_empty() {
            warnings.push(warning("no models registered".to_string()));
        }

        // 1. Model ids are unique and fields are present
        let mut seen = HashSet::new();
        for model in &self.models {
            if model.id.trim().is_empty() {
                warnings.push(error("model with empty id".to_string()));
            } else if model.id == crate::registry::ALL {
                warnings.push(error("'all' is reserved and cannot be a model id".to_string()));
            } else if model.id.contains(',') {
                warnings.push(error(format!("model id '{}' contains a comma", model.id)));
            }
            if !seen.insert(model.id.as_str()) {
                warnings.push(error(format!("duplicate model id '{}'", model.id)));
            }
            if model.predictor.trim().is_empty() {
                warnings.push(error(format!("model '{}' has an empty predictor", model.id)));
            }

            // 2. Template exists and only uses known placeholders
            let template = paths::resolve(root, &model.config_path);
            match std::fs::read_to_string(&template) {
                Err(_) => warnings.push(error(format!(
                    "model '{}': template {} not found",
                    model.id,
                    template.display()
                ))),
                Ok(text) => {
                    for name in render::placeholders(&text) {
                        if !MODEL_FIELDS.contains(&name.as_str()) {
                            warnings.push(error(format!(
                                "model '{}': unknown placeholder '{{{{{name}}}}}' in {}",
                                model.id,
                                template.display()
                            )));
                        }
                    }
                }
            }

            // 3. Credential policy has something to run
            if model.credential == CredentialPolicy::ApiToken && self.credentials.create.is_none() {
                warnings.push(error(format!(
                    "model '{}' requires an api_token but credentials.create is not set",
                    model.id
                )));
            }
        }

        // 4. Push tool
        if self.push.command.trim().is_empty() {
            warnings.push(error("push.command is empty".to_string()));
        } else if which::which(&self.push.command).is_err() {
            warnings.push(warning(format!(
                "push tool '{}' not found on PATH",
                self.push.command
            )));
        }
        for (key, args) in [
            ("candidate_args", &self.push.candidate_args),
            ("official_args", &self.push.official_args),
        ] {
            for name in args.iter().flat_map(|a| render::placeholders(a)) {
                if name != RENDERED_CONFIG_FIELD && !MODEL_FIELDS.contains(&name.as_str()) {
                    warnings.push(error(format!(
                        "unknown placeholder '{{{{{name}}}}}' in push.{key}"
                    )));
                }
            }
        }
        if self.push.timeout_seconds == Some(0) {
            warnings.push(error("push.timeout_seconds must be greater than 0".to_string()));
        }

        if self.max_parallel == Some(0) {
            warnings.push(error("max_parallel must be greater than 0".to_string()));
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
version: 1
models:
  - id: clip
    config_path: configs/clip.yaml
    predictor: predict.py:ClipPredictor
push:
  command: sh
"#;

    fn project(yaml: &str, template: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cogship.yaml"), yaml).unwrap();
        std::fs::create_dir_all(dir.path().join("configs")).unwrap();
        std::fs::write(dir.path().join("configs/clip.yaml"), template).unwrap();
        dir
    }

    #[test]
    fn load_missing_config_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()).unwrap_err(),
            CogshipError::NotInitialized(_)
        ));
    }

    #[test]
    fn push_defaults_target_cog_safe_push() {
        let cfg: Config = serde_yaml::from_str("models: []\n").unwrap();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.push.command, "cog-safe-push");
        assert_eq!(cfg.push.candidate_args, vec!["--config", "{{rendered_config}}"]);
        assert_eq!(
            cfg.push.official_args.last().map(String::as_str),
            Some("--push-official-model")
        );
        assert_eq!(cfg.credentials.env_var, "MODEL_API_TOKEN");
        assert!(cfg.max_parallel.is_none());
    }

    #[test]
    fn serialized_config_reloads_and_omits_unset_fields() {
        let dir = project(MINIMAL, "predict: {{predictor}}\n");
        let cfg = Config::load(dir.path()).unwrap();
        let out = serde_yaml::to_string(&cfg).unwrap();
        let reloaded: Config = serde_yaml::from_str(&out).unwrap();
        assert_eq!(reloaded.models, cfg.models);
        assert!(!out.contains("max_parallel"));
    }

    #[test]
    fn registry_resolves_paths_against_root() {
        let dir = project(MINIMAL, "predict: {{predictor}}\n");
        let cfg = Config::load(dir.path()).unwrap();
        let reg = cfg.registry(dir.path()).unwrap();
        assert_eq!(
            reg.resolve("clip").unwrap().config_path,
            dir.path().join("configs/clip.yaml")
        );
    }

    #[test]
    fn validate_clean_config_has_no_errors() {
        let dir = project(MINIMAL, "predict: {{predictor}}\nmodel: {{id}}\n");
        let cfg = Config::load(dir.path()).unwrap();
        let warnings = cfg.validate(dir.path());
        assert!(
            warnings.iter().all(|w| w.level != WarnLevel::Error),
            "{warnings:?}"
        );
    }

    #[test]
    fn validate_flags_unknown_template_placeholder() {
        let dir = project(MINIMAL, "gpu: {{gpu}}\n");
        let cfg = Config::load(dir.path()).unwrap();
        let warnings = cfg.validate(dir.path());
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("{{gpu}}")));
    }

    #[test]
    fn validate_flags_missing_template() {
        let dir = project(MINIMAL, "");
        std::fs::remove_file(dir.path().join("configs/clip.yaml")).unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        let warnings = cfg.validate(dir.path());
        assert!(warnings.iter().any(|w| w.message.contains("not found")));
    }

    #[test]
    fn validate_flags_duplicates_and_reserved_ids() {
        let yaml = r#"
models:
  - id: clip
    config_path: configs/clip.yaml
    predictor: a
  - id: clip
    config_path: configs/clip.yaml
    predictor: b
  - id: all
    config_path: configs/clip.yaml
    predictor: c
"#;
        let dir = project(yaml, "x");
        let cfg = Config::load(dir.path()).unwrap();
        let warnings = cfg.validate(dir.path());
        assert!(warnings.iter().any(|w| w.message.contains("duplicate model id 'clip'")));
        assert!(warnings.iter().any(|w| w.message.contains("'all' is reserved")));
    }

    #[test]
    fn validate_flags_api_token_without_create_command() {
        let yaml = r#"
models:
  - id: clip
    config_path: configs/clip.yaml
    predictor: predict.py:ClipPredictor
    credential: api_token
"#;
        let dir = project(yaml, "x");
        let cfg = Config::load(dir.path()).unwrap();
        let warnings = cfg.validate(dir.path());
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("credentials.create")));
    }

    #[test]
    fn validate_flags_zero_parallelism_and_bad_args() {
        let yaml = r#"
models: []
max_parallel: 0
push:
  command: sh
  candidate_args: ["--config", "{{rendered}}"]
"#;
        let dir = project(yaml, "x");
        let cfg = Config::load(dir.path()).unwrap();
        let warnings = cfg.validate(dir.path());
        assert!(warnings.iter().any(|w| w.message.contains("max_parallel")));
        assert!(warnings.iter().any(|w| w.message.contains("push.candidate_args")));
    }
}
