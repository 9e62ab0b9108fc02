//! Shared fixtures: a fake toolchain that simulates the converter and
//! quantizer on disk, and a recording hub.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use easyexl::{EasyExlError, HubClient, ProcessRunner, Result, Settings, ToolExit, ToolInvocation};
use tempfile::TempDir;

pub const CONVERTER_TOOL: &str = "convert_safetensors.py";
pub const QUANTIZER_TOOL: &str = "convert.py";

/// Records every invocation and mimics what the ExLlamaV2 scripts write.
#[derive(Default)]
pub struct FakeToolchain {
    invocations: Mutex<Vec<ToolInvocation>>,
    failing_conversions: HashSet<String>,
    quantizer_exit: Option<i32>,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the converter exit non-zero for this file name.
    pub fn fail_conversion_of(mut self, file_name: &str) -> Self {
        self.failing_conversions.insert(file_name.to_string());
        self
    }

    /// Make the quantizer exit with `code`.
    pub fn quantizer_exits_with(mut self, code: i32) -> Self {
        self.quantizer_exit = Some(code);
        self
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocations_of(&self, tool: &str) -> Vec<ToolInvocation> {
        self.invocations()
            .into_iter()
            .filter(|inv| inv.tool == tool)
            .collect()
    }

    fn simulate_conversion(&self, invocation: &ToolInvocation) -> ToolExit {
        let source = PathBuf::from(invocation.args.last().unwrap());
        let name = source.file_name().unwrap().to_string_lossy().into_owned();
        if self.failing_conversions.contains(&name) {
            return ToolExit::failure(1);
        }
        std::fs::write(source.with_extension("safetensors"), b"converted").unwrap();
        ToolExit::success()
    }

    fn simulate_quantization(&self, invocation: &ToolInvocation) -> ToolExit {
        let out_dir = PathBuf::from(flag_value(invocation, "-o"));
        let bpw = flag_value(invocation, "-b");

        std::fs::create_dir_all(out_dir.join("out_tensor")).unwrap();
        std::fs::write(out_dir.join("out_tensor").join("layer.0.safetensors"), b"t").unwrap();
        for transient in [
            "cal_data.safetensors",
            "job.json",
            "input_states.safetensors",
            "output_states.safetensors",
        ] {
            std::fs::write(out_dir.join(transient), b"tmp").unwrap();
        }
        std::fs::write(
            out_dir.join("measurement.json"),
            format!("{{\"measured_at_bpw\": \"{bpw}\"}}"),
        )
        .unwrap();

        match self.quantizer_exit {
            Some(code) if code != 0 => ToolExit::failure(code),
            _ => {
                std::fs::write(out_dir.join("output.safetensors"), b"quantized").unwrap();
                ToolExit::success()
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for FakeToolchain {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolExit> {
        self.invocations.lock().unwrap().push(invocation.clone());
        let exit = match invocation.tool.as_str() {
            CONVERTER_TOOL => self.simulate_conversion(invocation),
            QUANTIZER_TOOL => self.simulate_quantization(invocation),
            other => panic!("unexpected tool: {other}"),
        };
        Ok(exit)
    }
}

/// Value following `flag` in an invocation.
pub fn flag_value(invocation: &ToolInvocation, flag: &str) -> String {
    let args = invocation.args_lossy();
    let index = args
        .iter()
        .position(|a| a == flag)
        .unwrap_or_else(|| panic!("missing {flag}"));
    args[index + 1].clone()
}

/// Hub that records calls and can be told to reject repository creation.
#[derive(Default)]
pub struct RecordingHub {
    pub created: Mutex<Vec<(String, bool)>>,
    pub uploaded: Mutex<Vec<(String, PathBuf)>>,
    reject_create: Option<String>,
}

impl RecordingHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(repo_id: &str) -> Self {
        Self {
            reject_create: Some(repo_id.to_string()),
            ..Self::default()
        }
    }

    pub fn created(&self) -> Vec<(String, bool)> {
        self.created.lock().unwrap().clone()
    }

    pub fn uploaded(&self) -> Vec<(String, PathBuf)> {
        self.uploaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl HubClient for RecordingHub {
    async fn create_repo(&self, repo_id: &str, private: bool) -> Result<()> {
        if self.reject_create.as_deref() == Some(repo_id) {
            return Err(EasyExlError::Hub {
                message: format!("{repo_id} already exists"),
                status_code: Some(409),
            });
        }
        self.created
            .lock()
            .unwrap()
            .push((repo_id.to_string(), private));
        Ok(())
    }

    async fn upload_folder(&self, repo_id: &str, folder: &Path) -> Result<()> {
        self.uploaded
            .lock()
            .unwrap()
            .push((repo_id.to_string(), folder.to_path_buf()));
        Ok(())
    }
}

/// Temporary model and toolchain directories.
pub struct Workspace {
    pub temp: TempDir,
    pub model_dir: PathBuf,
    pub toolchain_dir: PathBuf,
}

impl Workspace {
    /// A model directory with `a.bin`, `config.json` and `tokenizer.model`,
    /// plus a toolchain directory holding both scripts.
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let model_dir = temp.path().join("models").join("tiny-llama");
        let toolchain_dir = temp.path().join("exllamav2");

        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::create_dir_all(toolchain_dir.join("util")).unwrap();
        std::fs::write(toolchain_dir.join("convert.py"), b"").unwrap();
        std::fs::write(toolchain_dir.join("util").join("convert_safetensors.py"), b"").unwrap();

        std::fs::write(model_dir.join("a.bin"), b"weights").unwrap();
        std::fs::write(model_dir.join("config.json"), b"{}").unwrap();
        std::fs::write(model_dir.join("tokenizer.model"), b"spm").unwrap();

        Self {
            temp,
            model_dir,
            toolchain_dir,
        }
    }

    pub fn settings(&self) -> Settings {
        self.settings_with_user("someone")
    }

    pub fn settings_with_user(&self, user: &str) -> Settings {
        let json = serde_json::json!({
            "exllama_dir": self.toolchain_dir,
            "bits_per_weight": "6",
            "head_bits": 8,
            "cal_dataset": self.temp.path().join("cal.parquet"),
            "gpu_rows": 0,
            "token_length": 2048,
            "measurement_length": 2048,
            "rope_alpha": 1.0,
            "userhf": user,
        });
        Settings::from_json_str(&json.to_string()).unwrap()
    }

    pub fn quant_dir(&self, bpw: &str) -> PathBuf {
        self.model_dir.join(format!("tiny-llama-{bpw}bpw-exl2"))
    }

    pub fn measurement_cache(&self) -> PathBuf {
        self.toolchain_dir.join("measurement-tiny-llama.json")
    }
}
