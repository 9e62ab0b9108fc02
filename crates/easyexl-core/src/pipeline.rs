//! Single quantization run: resolve, convert, quantize, post-process.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::{Bpw, Settings};
use crate::convert::{convert_legacy_weights, ConversionSummary};
use crate::layout::DirectorySet;
use crate::postprocess::{post_process, PostProcessSummary};
use crate::process::ProcessRunner;
use crate::quantize::run_quantization;
use crate::{EasyExlError, Result};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Quantization succeeded and the output directory was post-processed.
    Completed {
        elapsed: Duration,
        post: PostProcessSummary,
    },
    /// Quantization did not succeed; post-processing was skipped.
    Failed { reason: String },
}

/// Result of one model/bit-width run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub bpw: Bpw,
    pub dirs: DirectorySet,
    pub conversion: ConversionSummary,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }
}

/// Runs the conversion and quantization steps with one set of settings.
#[derive(Clone)]
pub struct Pipeline {
    settings: Settings,
    runner: Arc<dyn ProcessRunner>,
}

impl Pipeline {
    pub fn new(settings: Settings, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { settings, runner }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Quantize `model_path` once.
    ///
    /// `bpw_override` replaces the configured bit-width before the output
    /// directory is named. Anything that goes wrong after the paths are
    /// resolved is reported in the returned [`RunReport`]; only path
    /// resolution returns `Err`.
    pub async fn run(&self, model_path: &Path, bpw_override: Option<&Bpw>) -> Result<RunReport> {
        let settings = match bpw_override {
            Some(bpw) => self.settings.with_bpw(bpw.clone()),
            None => self.settings.clone(),
        };

        let dirs = DirectorySet::resolve(model_path, &settings)?;
        info!(
            "Starting {} bpw run for {}",
            settings.bits_per_weight,
            dirs.fp16_model_dir.display()
        );

        let conversion = convert_legacy_weights(&dirs, &settings, self.runner.as_ref()).await;
        if !conversion.failed.is_empty() {
            warn!(
                "{} weight file(s) failed to convert",
                conversion.failed.len()
            );
        }

        let outcome = match self.quantize_into(&dirs, &settings).await {
            Ok(elapsed) => RunOutcome::Completed {
                elapsed,
                post: post_process(&dirs),
            },
            Err(e) => {
                error!("{} bpw run failed: {}", settings.bits_per_weight, e);
                RunOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        Ok(RunReport {
            bpw: settings.bits_per_weight,
            dirs,
            conversion,
            outcome,
        })
    }

    async fn quantize_into(&self, dirs: &DirectorySet, settings: &Settings) -> Result<Duration> {
        std::fs::create_dir_all(&dirs.quant_dir)
            .map_err(|e| EasyExlError::io("creating quantization directory", &dirs.quant_dir, e))?;
        run_quantization(dirs, settings, self.runner.as_ref()).await
    }
}
