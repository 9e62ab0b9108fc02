//! Legacy weight conversion.
//!
//! Converts `*.bin` checkpoints in the source model directory to
//! `*.safetensors` siblings by running the toolchain's converter script once
//! per file. Files whose converted sibling already exists are left alone, and
//! a failing file does not stop the remaining ones.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::{Settings, ToolchainConfig};
use crate::layout::DirectorySet;
use crate::process::{ProcessRunner, ToolInvocation};
use crate::{EasyExlError, Result};

/// Outcome of the conversion step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    /// Files the converter ran on successfully.
    pub converted: Vec<PathBuf>,
    /// Files skipped because a converted sibling already existed.
    pub skipped: Vec<PathBuf>,
    /// Files the converter failed on.
    pub failed: Vec<PathBuf>,
}

/// A legacy weight file and the converted file it should produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyWeight {
    pub source: PathBuf,
    pub converted: PathBuf,
}

impl LegacyWeight {
    pub fn needs_conversion(&self) -> bool {
        !self.converted.exists()
    }
}

/// List legacy weight files in `model_dir`, sorted by name.
pub fn find_legacy_weights(model_dir: &Path) -> Result<Vec<LegacyWeight>> {
    let entries = std::fs::read_dir(model_dir)
        .map_err(|e| EasyExlError::io("reading model directory", model_dir, e))?;

    let mut weights: Vec<LegacyWeight> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.extension().and_then(|ext| ext.to_str())
                    == Some(ToolchainConfig::LEGACY_WEIGHT_EXTENSION)
        })
        .map(|source| LegacyWeight {
            converted: source.with_extension(ToolchainConfig::CONVERTED_WEIGHT_EXTENSION),
            source,
        })
        .collect();

    weights.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(weights)
}

/// Converter command for one legacy file.
pub fn converter_invocation(
    dirs: &DirectorySet,
    settings: &Settings,
    weight_file: &Path,
) -> ToolInvocation {
    ToolInvocation::new("convert_safetensors.py", &settings.python)
        .arg(dirs.converter_script())
        .arg(weight_file)
}

/// Convert every legacy weight file lacking a converted counterpart.
///
/// Best effort: an unreadable directory or a failing file is logged and
/// recorded in the summary, never returned as an error.
pub async fn convert_legacy_weights(
    dirs: &DirectorySet,
    settings: &Settings,
    runner: &dyn ProcessRunner,
) -> ConversionSummary {
    let mut summary = ConversionSummary::default();

    let weights = match find_legacy_weights(&dirs.fp16_model_dir) {
        Ok(weights) => weights,
        Err(e) => {
            warn!("Skipping weight conversion: {}", e);
            return summary;
        }
    };

    for weight in weights {
        if !weight.needs_conversion() {
            summary.skipped.push(weight.source);
            continue;
        }

        info!("Converting {}", weight.source.display());
        let invocation = converter_invocation(dirs, settings, &weight.source);
        let result = runner
            .run(&invocation)
            .await
            .and_then(|exit| exit.check(&invocation.tool));

        match result {
            Ok(()) => summary.converted.push(weight.source),
            Err(e) => {
                warn!("Error in converting {}: {}", weight.source.display(), e);
                summary.failed.push(weight.source);
            }
        }
    }

    summary
}
