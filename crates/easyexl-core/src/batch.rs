//! Multi-bit-width batches and the hub upload task.
//!
//! Runs are strictly sequential since each quantization expects exclusive
//! use of the GPU. Uploading happens afterwards in one background task that
//! pushes every finished variant to its own private repository.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Bpw;
use crate::hub::{variant_repo_id, HubClient};
use crate::pipeline::{Pipeline, RunReport};
use crate::{EasyExlError, Result};

/// Parse a comma-separated bit-width list such as `"8,6,5,4"`.
///
/// Entries are trimmed and blanks dropped; order is kept. An empty list or
/// an entry that is not a positive number is an error.
pub fn parse_bpw_list(list: &str) -> Result<Vec<Bpw>> {
    let values = list
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::parse)
        .collect::<Result<Vec<Bpw>>>()?;

    if values.is_empty() {
        return Err(EasyExlError::InvalidBpw {
            value: list.to_string(),
            reason: "no bit-width values given".to_string(),
        });
    }
    Ok(values)
}

/// One variant to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub repo_id: String,
    pub folder: PathBuf,
}

/// Upload targets for the successful runs of a batch, in run order.
pub fn upload_targets(user: &str, runs: &[RunReport]) -> Vec<UploadTarget> {
    runs.iter()
        .filter(|run| {
            if !run.succeeded() {
                warn!("Not uploading {} bpw: quantization failed", run.bpw);
            }
            run.succeeded()
        })
        .map(|run| UploadTarget {
            repo_id: variant_repo_id(user, &run.dirs.model_name(), &run.bpw),
            folder: run.dirs.quant_dir.clone(),
        })
        .collect()
}

/// Create and fill one private repository per target, in order.
///
/// Stops at the first failure. Returns the repository ids uploaded.
pub async fn upload_variants(hub: &dyn HubClient, targets: &[UploadTarget]) -> Result<Vec<String>> {
    let mut uploaded = Vec::with_capacity(targets.len());
    for target in targets {
        hub.create_repo(&target.repo_id, true).await?;
        hub.upload_folder(&target.repo_id, &target.folder).await?;
        uploaded.push(target.repo_id.clone());
    }
    Ok(uploaded)
}

/// Handle to the background upload task.
///
/// Await [`UploadHandle::join`] to observe the outcome, or drop the handle
/// to let the task run detached. A detached task is abandoned if the runtime
/// shuts down first.
#[derive(Debug)]
pub struct UploadHandle {
    inner: JoinHandle<Result<Vec<String>>>,
}

impl UploadHandle {
    /// Wait for the task and return the uploaded repository ids.
    pub async fn join(self) -> Result<Vec<String>> {
        self.inner
            .await
            .map_err(|e| EasyExlError::Other(format!("Upload task panicked: {e}")))?
    }
}

/// Start the upload of `targets` on a background task.
pub fn spawn_upload(hub: Arc<dyn HubClient>, targets: Vec<UploadTarget>) -> UploadHandle {
    let inner = tokio::spawn(async move {
        let result = upload_variants(hub.as_ref(), &targets).await;
        match &result {
            Ok(repos) => info!("Upload finished: {} repositories", repos.len()),
            Err(e) => error!("Upload failed: {}", e),
        }
        result
    });
    UploadHandle { inner }
}

/// Result of a batch: every run report plus the upload task, if started.
#[derive(Debug)]
pub struct BatchOutcome {
    pub runs: Vec<RunReport>,
    pub upload: Option<UploadHandle>,
}

impl BatchOutcome {
    pub fn failed_runs(&self) -> impl Iterator<Item = &RunReport> {
        self.runs.iter().filter(|run| !run.succeeded())
    }
}

/// Runs a model at several bit-widths, then optionally publishes the results.
#[derive(Clone)]
pub struct BatchDriver {
    pipeline: Pipeline,
    hub: Option<Arc<dyn HubClient>>,
}

impl BatchDriver {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            hub: None,
        }
    }

    pub fn with_hub(mut self, hub: Arc<dyn HubClient>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Quantize `model_path` once per bit-width, in order.
    ///
    /// A failed run does not stop the batch. With `upload` set, one upload
    /// task is spawned after the last run and returned unawaited.
    pub async fn run(&self, model_path: &Path, bpws: &[Bpw], upload: bool) -> Result<BatchOutcome> {
        let hub = match (upload, &self.hub) {
            (true, Some(hub)) => Some(Arc::clone(hub)),
            (true, None) => {
                return Err(EasyExlError::config(
                    "upload requested but no hub client configured",
                ))
            }
            (false, _) => None,
        };

        info!(
            "Batch for {}: {}",
            model_path.display(),
            bpws.iter()
                .map(Bpw::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut runs = Vec::with_capacity(bpws.len());
        for bpw in bpws {
            runs.push(self.pipeline.run(model_path, Some(bpw)).await?);
        }

        let upload = hub.map(|hub| {
            let targets = upload_targets(&self.pipeline.settings().userhf, &runs);
            spawn_upload(hub, targets)
        });

        Ok(BatchOutcome { runs, upload })
    }
}
