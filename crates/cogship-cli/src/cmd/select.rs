use crate::output::print_json;
use anyhow::Context;
use cogship_core::io;
use cogship_core::render::{self, RenderContext, TemplateSource};
use std::path::Path;

const USAGE: &str = "usage: cogship select <MODEL> [--out <PATH>]\n       cogship select --list";

pub fn run(
    root: &Path,
    model: Option<&str>,
    list: bool,
    out: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let (_, registry) = super::load(root)?;

    if list {
        if json {
            print_json(&registry.ids())?;
        } else {
            for id in registry.ids() {
                println!("{id}");
            }
        }
        return Ok(());
    }

    let Some(id) = model else {
        anyhow::bail!(
            "no model given\n{USAGE}\nvalid models: {}",
            registry.ids().join(", ")
        );
    };

    let model = registry
        .resolve(id)
        .map_err(|e| super::selection_error(e, &registry))?;

    let rendered = render::render(
        &RenderContext::for_model(model),
        &TemplateSource::File(model.config_path.clone()),
    )
    .with_context(|| format!("failed to render config for '{}'", model.id))?;

    if let Some(path) = out {
        io::atomic_write(path, rendered.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        if json {
            print_json(&serde_json::json!({
                "model": model.id,
                "predictor": model.predictor,
                "out": path,
            }))?;
        } else {
            eprintln!(
                "Selected {} (predictor {}) → {}",
                model.id,
                model.predictor,
                path.display()
            );
        }
        return Ok(());
    }

    if json {
        print_json(&serde_json::json!({
            "model": model.id,
            "predictor": model.predictor,
            "config": rendered,
        }))?;
    } else {
        print!("{rendered}");
    }
    Ok(())
}
