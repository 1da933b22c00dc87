use crate::output::{one_line, print_json, print_table};
use anyhow::Context;
use cogship_core::config::Config;
use cogship_core::credential::CommandCredentials;
use cogship_core::dispatch::{DispatchReport, ParallelDispatcher};
use cogship_core::orchestrator::{PushEvent, PushOrchestrator};
use cogship_core::push_tool::CommandPushTool;
use cogship_core::registry::ModelRegistry;
use cogship_core::types::Outcome;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn run(
    root: &Path,
    selection: &str,
    max_parallel: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let (config, registry) = super::load(root)?;

    let rt = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    let report = rt.block_on(dispatch(root, config, registry, selection, max_parallel))?;

    if json {
        print_json(&serde_json::json!({
            "run_id": report.run_id.to_string(),
            "started_at": report.started_at,
            "succeeded": report.all_succeeded(),
            "models": report.summaries(),
        }))?;
    } else {
        print_summary(&report);
    }

    let failed = report.failed_models();
    if !failed.is_empty() {
        anyhow::bail!(
            "{} of {} model(s) did not reach the official push: {}",
            failed.len(),
            report.results.len(),
            failed.join(", ")
        );
    }
    Ok(())
}

async fn dispatch(
    root: &Path,
    config: Config,
    registry: ModelRegistry,
    selection: &str,
    max_parallel: Option<usize>,
) -> anyhow::Result<DispatchReport> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupted: waiting for in-flight pushes, no new phases will start");
                cancel.cancel();
            }
        })
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_progress(rx));

    let orchestrator = PushOrchestrator::new(
        Arc::new(CommandPushTool::new(config.push.clone(), root)),
        Arc::new(CommandCredentials::new(config.credentials.clone(), root)),
    )
    .with_cancel(cancel)
    .with_events(tx);

    let registry = Arc::new(registry);
    let dispatcher = ParallelDispatcher::new(registry.clone(), orchestrator)
        .with_max_parallel(max_parallel.or(config.max_parallel));
    // A bad selection fails here, before any pipeline is spawned
    let report = dispatcher.dispatch(selection).await;

    // Closing the last sender lets the printer drain and exit
    drop(dispatcher);
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "progress printer failed");
    }
    watcher.abort();

    report.map_err(|e| super::selection_error(e, &registry))
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<PushEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PushEvent::PhaseStarted { model, phase } => {
                eprintln!("==> [{model}] {phase} push started");
            }
            PushEvent::PhaseFinished(result) => {
                let secs = result.duration_ms as f64 / 1000.0;
                match result.outcome {
                    Outcome::Success => {
                        eprintln!("  ✓ [{}] {} succeeded ({secs:.1}s)", result.model, result.phase)
                    }
                    Outcome::Failure => eprintln!(
                        "  ✗ [{}] {} failed ({secs:.1}s): {}",
                        result.model,
                        result.phase,
                        one_line(&result.detail, 120)
                    ),
                }
            }
            PushEvent::ModelFinished {
                model,
                reached_official,
            } => {
                let status = if reached_official {
                    "published"
                } else {
                    "stopped"
                };
                eprintln!("<== [{model}] {status}");
            }
        }
    }
}

fn print_summary(report: &DispatchReport) {
    let mut rows = Vec::new();
    for summary in report.summaries() {
        if let Some(error) = &summary.error {
            rows.push(vec![
                summary.model.clone(),
                "-".to_string(),
                "error".to_string(),
                "-".to_string(),
                one_line(error, 60),
            ]);
            continue;
        }
        for r in &summary.results {
            rows.push(vec![
                summary.model.clone(),
                r.phase.to_string(),
                r.outcome.to_string(),
                format!("{:.1}s", r.duration_ms as f64 / 1000.0),
                one_line(&r.detail, 60),
            ]);
        }
    }
    println!();
    print_table(&["MODEL", "PHASE", "OUTCOME", "DURATION", "DETAIL"], rows);

    let total = report.results.len();
    let published = total - report.failed_models().len();
    println!();
    println!("{published}/{total} model(s) published");
}
