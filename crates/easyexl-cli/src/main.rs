//! EasyEXL - command-line front end.
//!
//! `easyexl quantize` converts and quantizes one model at one bit-width;
//! `easyexl batch` repeats that for a list of bit-widths and can publish the
//! results to the Hugging Face Hub.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use easyexl::{parse_bpw_list, Bpw, EasyExlError, Settings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "easyexl")]
#[command(about = "Convert and quantize fp16 models to ExLlamaV2 EXL2")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Settings file (defaults to $EASYEXL_SETTINGS, ./settings.json, or settings.json beside the binary)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Quantize one model at one bit-width
    Quantize {
        /// Path to the FP16 model directory
        model_path: PathBuf,

        /// Bits per weight, overriding bits_per_weight from the settings
        #[arg(long)]
        bpw: Option<Bpw>,
    },

    /// Quantize one model at several bit-widths, one after another
    Batch {
        /// Path to the FP16 model directory
        model_path: PathBuf,

        /// Comma-separated bits per weight, e.g. "8,6,5,4"
        #[arg(long)]
        bpw: BpwList,

        /// Upload each variant to a private Hugging Face repository
        #[arg(long)]
        upload: bool,
    },
}

/// Bit-width list argument.
#[derive(Debug, Clone)]
struct BpwList(Vec<Bpw>);

impl FromStr for BpwList {
    type Err = EasyExlError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        parse_bpw_list(s).map(BpwList)
    }
}

fn init_logging(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.debug, args.json_logs);

    let settings = Settings::discover(args.settings.as_deref())?;
    info!("Toolchain: {}", settings.exllama_dir.display());

    let all_ok = match args.command {
        Command::Quantize { model_path, bpw } => {
            commands::quantize(settings, &model_path, bpw.as_ref()).await?
        }
        Command::Batch {
            model_path,
            bpw,
            upload,
        } => commands::batch(settings, &model_path, &bpw.0, upload).await?,
    };

    Ok(if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
