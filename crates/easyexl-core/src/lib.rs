//! EasyEXL - orchestration of ExLlamaV2 EXL2 quantization.
//!
//! Given a directory holding a full-precision model, this crate converts
//! legacy `.bin` weights to safetensors, runs the ExLlamaV2 quantizer at a
//! chosen bits-per-weight, prunes the output to a self-contained model
//! directory, and can publish several bit-width variants to the Hugging Face
//! Hub.
//!
//! The conversion and quantization tools are external programs reached
//! through [`ProcessRunner`]; hub access goes through [`HubClient`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use easyexl::{Pipeline, Settings, SystemProcessRunner};
//!
//! #[tokio::main]
//! async fn main() -> easyexl::Result<()> {
//!     let settings = Settings::discover(None)?;
//!     let pipeline = Pipeline::new(settings, Arc::new(SystemProcessRunner::new()));
//!
//!     let report = pipeline.run("/models/Llama-2-7b".as_ref(), None).await?;
//!     println!("{} -> {}", report.bpw, report.dirs.quant_dir.display());
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod convert;
pub mod error;
pub mod hub;
pub mod layout;
pub mod pipeline;
pub mod postprocess;
pub mod process;
pub mod quantize;

pub use batch::{parse_bpw_list, BatchDriver, BatchOutcome, UploadHandle, UploadTarget};
pub use config::{Bpw, Settings, SettingsConfig, ToolchainConfig};
pub use convert::ConversionSummary;
pub use error::{EasyExlError, Result};
pub use hub::{HubClient, HuggingFaceHub};
pub use layout::DirectorySet;
pub use pipeline::{Pipeline, RunOutcome, RunReport};
pub use postprocess::{MeasurementCache, PostProcessSummary};
pub use process::{ProcessRunner, SystemProcessRunner, ToolExit, ToolInvocation};
