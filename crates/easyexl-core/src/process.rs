//! External tool invocation.
//!
//! Every subprocess the pipeline starts (converter, quantizer, hub upload
//! tool) goes through the [`ProcessRunner`] trait so the orchestration logic
//! can be exercised with a recording fake instead of real tools.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{EasyExlError, Result};

/// A fully specified external command.
#[derive(Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Short name used in logs and errors (e.g. `convert.py`).
    pub tool: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
}

impl ToolInvocation {
    pub fn new(tool: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Arguments as lossy strings, for logging and assertions.
    pub fn args_lossy(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    /// Whether `flag` is present and immediately followed by `value`.
    pub fn has_flag_value(&self, flag: &str, value: impl AsRef<OsStr>) -> bool {
        let value = value.as_ref();
        self.args
            .windows(2)
            .any(|pair| pair[0].as_os_str() == OsStr::new(flag) && pair[1].as_os_str() == value)
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a.as_os_str() == OsStr::new(flag))
    }
}

impl fmt::Debug for ToolInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ToolInvocation")
            .field("tool", &self.tool)
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env_keys)
            .finish()
    }
}

/// Exit of a finished external command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolExit {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ToolExit {
    pub fn success() -> Self {
        Self { code: Some(0) }
    }

    pub fn failure(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into a `ToolFailed` error.
    pub fn check(self, tool: &str) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(EasyExlError::ToolFailed {
                tool: tool.to_string(),
                code: self.code.unwrap_or(-1),
            })
        }
    }
}

/// Runs external commands to completion.
///
/// Implementations return `Err` only when the command could not be started;
/// a command that ran and exited non-zero is reported through [`ToolExit`].
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolExit>;
}

/// Spawns real subprocesses with `tokio::process`.
///
/// Output is streamed into the log while the child runs: stdout at info
/// level, stderr at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessRunner;

impl SystemProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolExit> {
        debug!("Running {:?}", invocation);

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EasyExlError::ToolLaunch {
                tool: invocation.tool.clone(),
                message: e.to_string(),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        tokio::join!(
            stream_lines(&invocation.tool, stdout, StreamKind::Stdout),
            stream_lines(&invocation.tool, stderr, StreamKind::Stderr),
        );

        let status = child.wait().await.map_err(|e| EasyExlError::ToolLaunch {
            tool: invocation.tool.clone(),
            message: format!("process error: {e}"),
        })?;

        Ok(ToolExit {
            code: status.code(),
        })
    }
}

#[derive(Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

/// Log each line of a child's output stream until EOF.
async fn stream_lines<R>(tool: &str, stream: Option<R>, kind: StreamKind)
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return;
    };
    let mut reader = BufReader::new(stream).lines();

    loop {
        match reader.next_line().await {
            Ok(Some(line)) => match kind {
                StreamKind::Stdout => info!("[{}] {}", tool, line),
                StreamKind::Stderr => debug!("[{}] stderr: {}", tool, line),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading {} output: {}", tool, e);
                break;
            }
        }
    }
}
