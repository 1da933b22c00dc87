//! Placeholder substitution for push-tool configuration templates.
//!
//! Placeholders are written `{{ name }}`. Every call reads its template
//! source again and renders from an explicit [`RenderContext`], so concurrent
//! runs for different models never see each other's values.

use crate::error::{CogshipError, Result};
use crate::io;
use crate::paths;
use crate::types::Model;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex is valid")
    })
}

// ---------------------------------------------------------------------------
// RenderContext
// ---------------------------------------------------------------------------

/// The values available to a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
    fields: BTreeMap<String, String>,
}

impl RenderContext {
    /// Context exposing `id`, `predictor` and `config_path` of `model`.
    pub fn for_model(model: &Model) -> Self {
        Self::default()
            .with("id", &model.id)
            .with("predictor", &model.predictor)
            .with("config_path", model.config_path.to_string_lossy())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// TemplateSource / RenderedConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    File(PathBuf),
    Inline(String),
}

impl TemplateSource {
    fn read(&self) -> Result<String> {
        match self {
            TemplateSource::File(path) => std::fs::read_to_string(path).map_err(|e| {
                CogshipError::Template(format!("cannot read {}: {e}", path.display()))
            }),
            TemplateSource::Inline(text) => Ok(text.clone()),
        }
    }
}

/// A fully rendered configuration written to disk for one push run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    pub path: PathBuf,
    pub content: String,
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Names of every placeholder in `text`, in order of first appearance.
pub fn placeholders(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for cap in placeholder_re().captures_iter(text) {
        let name = cap[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Substitute every placeholder in `text`.
pub fn render_str(ctx: &RenderContext, text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for cap in placeholder_re().captures_iter(text) {
        let whole = cap.get(0).expect("capture 0 always matches");
        let name = &cap[1];
        let value = ctx.get(name).ok_or_else(|| {
            CogshipError::Template(format!("placeholder '{{{{{name}}}}}' has no value"))
        })?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Read `source` and render it.
pub fn render(ctx: &RenderContext, source: &TemplateSource) -> Result<String> {
    render_str(ctx, &source.read()?)
}

/// Render `source` and write the result into `dir`.
pub fn render_to(ctx: &RenderContext, source: &TemplateSource, dir: &Path) -> Result<RenderedConfig> {
    let content = render(ctx, source)?;
    let name = match source {
        TemplateSource::File(path) => paths::rendered_file_name(path),
        TemplateSource::Inline(_) => paths::DEFAULT_RENDERED_NAME.to_string(),
    };
    let path = dir.join(name);
    io::atomic_write(&path, content.as_bytes())?;
    Ok(RenderedConfig { path, content })
}
