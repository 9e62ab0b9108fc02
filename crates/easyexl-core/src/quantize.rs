//! EXL2 quantization via the toolchain's `convert.py`.

use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::config::Settings;
use crate::layout::DirectorySet;
use crate::process::{ProcessRunner, ToolInvocation};
use crate::{EasyExlError, Result};

const QUANTIZER_TOOL: &str = "convert.py";

/// Quantizer command for a run.
///
/// The measurement reuse flag (`-m`) is appended only when a cached
/// measurement for this model exists in the toolchain directory.
pub fn quantizer_invocation(dirs: &DirectorySet, settings: &Settings) -> Result<ToolInvocation> {
    let cal_dataset = std::path::absolute(&settings.cal_dataset)
        .map_err(|e| EasyExlError::io("resolving calibration dataset", &settings.cal_dataset, e))?;

    let mut invocation = ToolInvocation::new(QUANTIZER_TOOL, &settings.python)
        .arg(dirs.quantizer_script())
        .arg("-i")
        .arg(&dirs.fp16_model_dir)
        .arg("-o")
        .arg(&dirs.quant_dir)
        .arg("-c")
        .arg(cal_dataset)
        .args(["-b", settings.bits_per_weight.as_str()])
        .args(["-hb", settings.head_bits.as_str()])
        .args(["-gr", settings.gpu_rows.as_str()])
        .args(["-l", settings.token_length.as_str()])
        .args(["-ml", settings.measurement_length.as_str()])
        .args(["-ra", settings.rope_alpha.as_str()]);

    if let Some(rows) = &settings.dataset_rows {
        invocation = invocation.args(["-r", rows.as_str()]);
    }
    if let Some(rows) = &settings.measurement_rows {
        invocation = invocation.args(["-mr", rows.as_str()]);
    }

    let cached_measurement = dirs.measurement_cache_path();
    if cached_measurement.is_file() {
        info!("Reusing measurement {}", cached_measurement.display());
        invocation = invocation.arg("-m").arg(cached_measurement);
    }

    Ok(invocation)
}

/// Run the quantizer and return the wall-clock time it took.
///
/// Fails with `ToolMissing` before launching anything if the quantizer script
/// is absent, with `ToolLaunch` if the interpreter cannot be started, and
/// with `ToolFailed` on a non-zero exit. No retries.
pub async fn run_quantization(
    dirs: &DirectorySet,
    settings: &Settings,
    runner: &dyn ProcessRunner,
) -> Result<Duration> {
    let script = dirs.quantizer_script();
    if !script.is_file() {
        error!("Quantization script not found: {}", script.display());
        return Err(EasyExlError::ToolMissing {
            tool: QUANTIZER_TOOL.to_string(),
            path: script,
        });
    }

    let invocation = quantizer_invocation(dirs, settings)?;
    info!(
        "Quantizing {} at {} bpw into {}",
        dirs.model_name(),
        settings.bits_per_weight,
        dirs.quant_dir.display()
    );

    let started = Instant::now();
    let result = runner
        .run(&invocation)
        .await
        .and_then(|exit| exit.check(QUANTIZER_TOOL));
    let elapsed = started.elapsed();

    match result {
        Ok(()) => {
            info!("Quantization finished in {:.1}s", elapsed.as_secs_f64());
            Ok(elapsed)
        }
        Err(e) => {
            error!("### ERROR ###");
            error!(
                "Quantization of {} failed after {:.1}s: {}",
                dirs.model_name(),
                elapsed.as_secs_f64(),
                e
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn settings_for(toolchain: &Path, extra: &str) -> Settings {
        Settings::from_json_str(&format!(
            r#"{{
                "exllama_dir": {toolchain:?},
                "bits_per_weight": "6",
                "head_bits": "8",
                "cal_dataset": "/data/cal.parquet",
                "gpu_rows": "0",
                "token_length": "2048",
                "measurement_length": "2048",
                "rope_alpha": "1.0"{extra}
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_invocation_without_cached_measurement() {
        let temp = TempDir::new().unwrap();
        let settings = settings_for(temp.path(), "");
        let dirs = DirectorySet::resolve(Path::new("/models/phi"), &settings).unwrap();

        let inv = quantizer_invocation(&dirs, &settings).unwrap();
        assert_eq!(inv.program, PathBuf::from("python"));
        assert_eq!(inv.args[0], dirs.quantizer_script().into_os_string());
        assert!(inv.has_flag_value("-i", "/models/phi"));
        assert!(inv.has_flag_value("-o", "/models/phi/phi-6bpw-exl2"));
        assert!(inv.has_flag_value("-c", "/data/cal.parquet"));
        assert!(inv.has_flag_value("-b", "6"));
        assert!(inv.has_flag_value("-hb", "8"));
        assert!(inv.has_flag_value("-gr", "0"));
        assert!(inv.has_flag_value("-l", "2048"));
        assert!(inv.has_flag_value("-ml", "2048"));
        assert!(inv.has_flag_value("-ra", "1.0"));
        assert!(!inv.has_flag("-m"));
        assert!(!inv.has_flag("-r"));
        assert!(!inv.has_flag("-mr"));
    }

    #[test]
    fn test_invocation_reuses_cached_measurement() {
        let temp = TempDir::new().unwrap();
        let settings = settings_for(temp.path(), "");
        let dirs = DirectorySet::resolve(Path::new("/models/phi"), &settings).unwrap();
        std::fs::write(dirs.measurement_cache_path(), b"{}").unwrap();

        let inv = quantizer_invocation(&dirs, &settings).unwrap();
        assert!(inv.has_flag_value("-m", dirs.measurement_cache_path()));
    }

    #[test]
    fn test_invocation_passes_row_counts() {
        let temp = TempDir::new().unwrap();
        let settings = settings_for(
            temp.path(),
            r#", "dataset_rows": 100, "measurement_rows": 16"#,
        );
        let dirs = DirectorySet::resolve(Path::new("/models/phi"), &settings).unwrap();

        let inv = quantizer_invocation(&dirs, &settings).unwrap();
        assert!(inv.has_flag_value("-r", "100"));
        assert!(inv.has_flag_value("-mr", "16"));
    }
}
