use crate::output::{print_json, print_table};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let (_, registry) = super::load(root)?;

    if json {
        print_json(&registry.list())?;
        return Ok(());
    }

    if registry.is_empty() {
        println!("No models registered. Add them under 'models:' in cogship.yaml.");
        return Ok(());
    }

    let rows = registry
        .list()
        .iter()
        .map(|m| {
            let config = m
                .config_path
                .strip_prefix(root)
                .unwrap_or(m.config_path.as_path())
                .display()
                .to_string();
            vec![
                m.id.clone(),
                m.predictor.clone(),
                m.credential.to_string(),
                config,
            ]
        })
        .collect();
    print_table(&["ID", "PREDICTOR", "CREDENTIAL", "CONFIG"], rows);
    Ok(())
}
