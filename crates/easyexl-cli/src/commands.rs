//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use easyexl::{
    BatchDriver, Bpw, HuggingFaceHub, Pipeline, RunOutcome, RunReport, Settings,
    SystemProcessRunner,
};
use tracing::{error, info};

/// Run one quantization. Returns whether it succeeded.
pub async fn quantize(settings: Settings, model_path: &Path, bpw: Option<&Bpw>) -> Result<bool> {
    let pipeline = Pipeline::new(settings, Arc::new(SystemProcessRunner::new()));
    let report = pipeline.run(model_path, bpw).await?;
    log_report(&report);
    Ok(report.succeeded())
}

/// Run every bit-width, then wait for the upload if one was requested.
///
/// Returns whether every run and the upload succeeded.
pub async fn batch(settings: Settings, model_path: &Path, bpws: &[Bpw], upload: bool) -> Result<bool> {
    let runner = Arc::new(SystemProcessRunner::new());
    let mut driver = BatchDriver::new(Pipeline::new(settings, runner.clone()));
    if upload {
        driver = driver.with_hub(Arc::new(HuggingFaceHub::new(runner)?));
    }

    let outcome = driver.run(model_path, bpws, upload).await?;

    info!("Batch summary:");
    for report in &outcome.runs {
        log_report(report);
    }
    let mut all_ok = outcome.failed_runs().next().is_none();

    if let Some(handle) = outcome.upload {
        info!("Waiting for uploads to finish...");
        match handle.join().await {
            Ok(repos) => {
                for repo in repos {
                    info!("  published {}", repo);
                }
            }
            Err(e) => {
                error!("Upload failed: {}", e);
                all_ok = false;
            }
        }
    }

    Ok(all_ok)
}

fn log_report(report: &RunReport) {
    match &report.outcome {
        RunOutcome::Completed { elapsed, .. } => info!(
            "  {:>6} bpw  ok      {:>8.1}s  {}",
            report.bpw.as_str(),
            elapsed.as_secs_f64(),
            report.dirs.quant_dir.display()
        ),
        RunOutcome::Failed { reason } => error!(
            "  {:>6} bpw  failed  {}",
            report.bpw.as_str(),
            reason
        ),
    }
}
