//! Directory resolution for a quantization run.

use std::path::{Component, Path, PathBuf};

use crate::config::{Bpw, Settings, ToolchainConfig};
use crate::{EasyExlError, Result};

/// The three paths a run works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectorySet {
    /// Full-precision source model. Only written to by the converter.
    pub fp16_model_dir: PathBuf,
    /// ExLlamaV2 checkout holding the scripts and the measurement cache.
    pub toolchain_dir: PathBuf,
    /// Output of this run: `<fp16_model_dir>/<model>-<bpw>bpw-exl2`.
    pub quant_dir: PathBuf,
}

impl DirectorySet {
    /// Derive the directory set for `model_path` at the settings' bit-width.
    pub fn resolve(model_path: &Path, settings: &Settings) -> Result<Self> {
        let fp16_model_dir = absolute_normalized(model_path)?;
        let model_name = model_name(&fp16_model_dir)?;
        let toolchain_dir = absolute_normalized(&settings.exllama_dir)?;
        let quant_dir = fp16_model_dir.join(quant_dir_name(&model_name, &settings.bits_per_weight));

        Ok(Self {
            fp16_model_dir,
            toolchain_dir,
            quant_dir,
        })
    }

    /// Basename of the source model directory.
    pub fn model_name(&self) -> String {
        self.fp16_model_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Cached measurement for this model inside the toolchain directory.
    pub fn measurement_cache_path(&self) -> PathBuf {
        self.toolchain_dir.join(format!(
            "{}{}.json",
            ToolchainConfig::MEASUREMENT_CACHE_PREFIX,
            self.model_name()
        ))
    }

    /// Measurement file the quantizer writes into the output directory.
    pub fn measurement_output_path(&self) -> PathBuf {
        self.quant_dir.join(ToolchainConfig::MEASUREMENT_FILENAME)
    }

    pub fn converter_script(&self) -> PathBuf {
        ToolchainConfig::CONVERTER_SCRIPT
            .iter()
            .fold(self.toolchain_dir.clone(), |path, part| path.join(part))
    }

    pub fn quantizer_script(&self) -> PathBuf {
        self.toolchain_dir.join(ToolchainConfig::QUANTIZER_SCRIPT)
    }
}

/// Output directory name: `<model>-<bpw>bpw-exl2`.
pub fn quant_dir_name(model_name: &str, bpw: &Bpw) -> String {
    format!("{model_name}-{bpw}{}", ToolchainConfig::OUTPUT_DIR_SUFFIX)
}

/// Basename of a model directory, ignoring trailing separators.
pub fn model_name(model_dir: &Path) -> Result<String> {
    model_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| EasyExlError::InvalidModelPath(model_dir.to_path_buf()))
}

/// Make `path` absolute, folding `.` and `..` components and dropping
/// trailing separators. Lexical only; symlinks are not followed.
pub fn absolute_normalized(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(EasyExlError::InvalidModelPath(path.to_path_buf()));
    }
    let absolute = std::path::absolute(path)
        .map_err(|e| EasyExlError::io("resolving absolute path", path, e))?;

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            // `..` at the root stays at the root.
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}
