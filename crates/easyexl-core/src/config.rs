//! Settings loading and fixed toolchain constants.
//!
//! `Settings` mirrors the `settings.json` sidecar read once per invocation.
//! It is never mutated after loading; a bit-width override produces a new
//! value via [`Settings::with_bpw`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::{EasyExlError, Result};

/// Locations and artifact names fixed by the ExLlamaV2 toolchain.
pub struct ToolchainConfig;

impl ToolchainConfig {
    /// Converter script, relative to the toolchain root.
    pub const CONVERTER_SCRIPT: [&'static str; 2] = ["util", "convert_safetensors.py"];
    /// Quantizer script, relative to the toolchain root.
    pub const QUANTIZER_SCRIPT: &'static str = "convert.py";
    pub const LEGACY_WEIGHT_EXTENSION: &'static str = "bin";
    pub const CONVERTED_WEIGHT_EXTENSION: &'static str = "safetensors";
    /// Measurement file the quantizer writes into the output directory.
    pub const MEASUREMENT_FILENAME: &'static str = "measurement.json";
    pub const MEASUREMENT_CACHE_PREFIX: &'static str = "measurement-";
    /// Working directory the quantizer leaves behind.
    pub const TRANSIENT_DIR: &'static str = "out_tensor";
    pub const TRANSIENT_FILES: [&'static str; 4] = [
        "cal_data.safetensors",
        "job.json",
        "input_states.safetensors",
        "output_states.safetensors",
    ];
    pub const METADATA_EXTENSION: &'static str = "json";
    pub const TOKENIZER_PREFIX: &'static str = "tokenizer.";
    pub const OUTPUT_DIR_SUFFIX: &'static str = "bpw-exl2";
}

/// Where the settings file is looked up.
pub struct SettingsConfig;

impl SettingsConfig {
    pub const FILENAME: &'static str = "settings.json";
    pub const ENV_VAR: &'static str = "EASYEXL_SETTINGS";
    pub const DEFAULT_PYTHON: &'static str = "python";
}

// ---------------------------------------------------------------------------
// Bits per weight
// ---------------------------------------------------------------------------

/// Target bits-per-weight for a quantization run.
///
/// Keeps the text the user supplied so `8` names a directory `-8bpw-exl2`
/// rather than `-8.0bpw-exl2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Bpw(String);

impl Bpw {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Bpw {
    type Err = EasyExlError;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let invalid = |reason: &str| EasyExlError::InvalidBpw {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        if text.is_empty() {
            return Err(invalid("empty value"));
        }
        let value: f64 = text.parse().map_err(|_| invalid("not a number"))?;
        if !value.is_finite() || value <= 0.0 {
            return Err(invalid("must be a positive number"));
        }
        Ok(Bpw(text.to_string()))
    }
}

impl fmt::Display for Bpw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Bpw {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = tool_arg(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Static settings for a quantization invocation.
///
/// Numeric tuning values are kept as the literal text handed to the quantizer,
/// so both `"gpu_rows": 0` and `"gpu_rows": "0"` are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the ExLlamaV2 checkout.
    pub exllama_dir: PathBuf,
    /// Default target bit-width.
    pub bits_per_weight: Bpw,
    #[serde(deserialize_with = "tool_arg")]
    pub head_bits: String,
    /// Calibration dataset (parquet) handed to the quantizer.
    pub cal_dataset: PathBuf,
    #[serde(deserialize_with = "tool_arg")]
    pub gpu_rows: String,
    #[serde(deserialize_with = "tool_arg")]
    pub token_length: String,
    #[serde(deserialize_with = "tool_arg")]
    pub measurement_length: String,
    #[serde(deserialize_with = "tool_arg")]
    pub rope_alpha: String,
    #[serde(default, deserialize_with = "optional_tool_arg")]
    pub dataset_rows: Option<String>,
    #[serde(default, deserialize_with = "optional_tool_arg")]
    pub measurement_rows: Option<String>,
    /// Hub user or organization that receives uploads.
    #[serde(default)]
    pub userhf: String,
    /// Interpreter used to run the toolchain scripts.
    #[serde(default = "default_python")]
    pub python: String,
}

fn default_python() -> String {
    SettingsConfig::DEFAULT_PYTHON.to_string()
}

impl Settings {
    /// Parse settings from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| EasyExlError::config(format!("Invalid settings: {e}")))
    }

    /// Load settings from a file. A missing file or field is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EasyExlError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
            EasyExlError::config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Resolve the settings file location and load it.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        let path = resolve_settings_path(explicit)?;
        Self::load(&path)
    }

    /// Copy of these settings with a different target bit-width.
    pub fn with_bpw(&self, bpw: Bpw) -> Self {
        Self {
            bits_per_weight: bpw,
            ..self.clone()
        }
    }
}

/// Find the settings file.
///
/// Checks in order:
/// 1. The explicitly supplied path
/// 2. `EASYEXL_SETTINGS` environment variable
/// 3. `settings.json` in the current directory
/// 4. `settings.json` beside the executable
pub fn resolve_settings_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(SettingsConfig::ENV_VAR) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    let mut candidates = vec![PathBuf::from(SettingsConfig::FILENAME)];
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join(SettingsConfig::FILENAME));
    }

    candidates
        .into_iter()
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            EasyExlError::config(format!(
                "{} not found in the current directory or beside the executable \
                 (set {} or pass --settings)",
                SettingsConfig::FILENAME,
                SettingsConfig::ENV_VAR
            ))
        })
}

/// Accept a JSON string or number and keep it as text.
fn tool_arg<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

fn optional_tool_arg<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}
