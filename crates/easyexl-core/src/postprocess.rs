//! Output directory cleanup after a successful quantization.
//!
//! Each step is independent and best effort: a missing file or a failed
//! removal is logged and the remaining steps still run.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::ToolchainConfig;
use crate::layout::DirectorySet;

/// What happened to the toolchain's measurement cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementCache {
    /// The fresh measurement became the cache entry.
    Saved,
    /// An entry already existed and was left untouched.
    AlreadyCached,
    /// The quantizer produced no `measurement.json`.
    SourceMissing,
    /// Writing the cache entry failed.
    Failed,
}

/// Outcome of the post-processing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostProcessSummary {
    /// Transient files and directories that were deleted.
    pub removed: Vec<PathBuf>,
    pub measurement: MeasurementCache,
    /// Metadata and tokenizer files copied into the output directory.
    pub copied: Vec<PathBuf>,
}

/// Prune the output directory, cache the measurement and copy model metadata.
pub fn post_process(dirs: &DirectorySet) -> PostProcessSummary {
    let removed = remove_transient_artifacts(&dirs.quant_dir);
    let measurement = persist_measurement(dirs);
    let copied = copy_model_metadata(&dirs.fp16_model_dir, &dirs.quant_dir);

    info!(
        "Post-processing done: {} transient artifacts removed, {} files copied, measurement {:?}",
        removed.len(),
        copied.len(),
        measurement
    );

    PostProcessSummary {
        removed,
        measurement,
        copied,
    }
}

/// Delete the quantizer's working directory and intermediate files.
pub fn remove_transient_artifacts(quant_dir: &Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();

    let work_dir = quant_dir.join(ToolchainConfig::TRANSIENT_DIR);
    match fs::remove_dir_all(&work_dir) {
        Ok(()) => removed.push(work_dir),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", work_dir.display(), e),
    }

    for name in ToolchainConfig::TRANSIENT_FILES {
        let path = quant_dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }

    removed
}

/// Save the fresh measurement as this model's cache entry.
///
/// Never overwrites an existing entry: the destination is opened with
/// `create_new`, so a cache file that appears between runs is kept as is.
pub fn persist_measurement(dirs: &DirectorySet) -> MeasurementCache {
    let cache_path = dirs.measurement_cache_path();
    if cache_path.exists() {
        debug!("Measurement already cached at {}", cache_path.display());
        return MeasurementCache::AlreadyCached;
    }

    let source_path = dirs.measurement_output_path();
    let mut source = match File::open(&source_path) {
        Ok(file) => file,
        Err(_) => {
            warn!(
                "Failed to find '{}' in {}",
                ToolchainConfig::MEASUREMENT_FILENAME,
                dirs.quant_dir.display()
            );
            return MeasurementCache::SourceMissing;
        }
    };

    let mut dest = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&cache_path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return MeasurementCache::AlreadyCached;
        }
        Err(e) => {
            warn!("Failed to create {}: {}", cache_path.display(), e);
            return MeasurementCache::Failed;
        }
    };

    match io::copy(&mut source, &mut dest) {
        Ok(_) => {
            info!("Cached measurement at {}", cache_path.display());
            MeasurementCache::Saved
        }
        Err(e) => {
            warn!("Failed to write {}: {}", cache_path.display(), e);
            drop(dest);
            fs::remove_file(&cache_path).ok();
            MeasurementCache::Failed
        }
    }
}

/// Whether a source model file belongs in the quantized output.
pub fn is_model_metadata(file_name: &str) -> bool {
    let is_metadata = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        == Some(ToolchainConfig::METADATA_EXTENSION);
    is_metadata || file_name.starts_with(ToolchainConfig::TOKENIZER_PREFIX)
}

/// Copy config and tokenizer files so the output loads on its own.
pub fn copy_model_metadata(source_dir: &Path, quant_dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(source_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read {}: {}", source_dir.display(), e);
            return Vec::new();
        }
    };

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_model_metadata)
        })
        .collect();
    candidates.sort();

    let mut copied = Vec::new();
    for source in candidates {
        let Some(name) = source.file_name() else {
            continue;
        };
        let dest = quant_dir.join(name);
        match fs::copy(&source, &dest) {
            Ok(_) => copied.push(dest),
            Err(e) => warn!("Failed to copy {}: {}", source.display(), e),
        }
    }
    copied
}
