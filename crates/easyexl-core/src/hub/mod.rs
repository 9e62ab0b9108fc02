//! Model hub publishing.
//!
//! - [`HubClient`] - the two operations the batch uploader needs
//! - [`HuggingFaceHub`] - Hugging Face implementation: repository creation
//!   over the REST API, folder upload through `huggingface-cli`
//! - [`auth`] - token resolution

pub mod auth;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use crate::config::{Bpw, ToolchainConfig};
use crate::process::{ProcessRunner, ToolInvocation};
use crate::{EasyExlError, Result};

/// Hugging Face REST API root.
pub const HF_API_BASE: &str = "https://huggingface.co/api";

/// Upload tool shipped with `huggingface_hub`.
pub const HF_CLI_PROGRAM: &str = "huggingface-cli";

/// Remote model hub.
#[async_trait]
pub trait HubClient: Send + Sync {
    /// Create a model repository. Whether an existing repository is an error
    /// is up to the hub.
    async fn create_repo(&self, repo_id: &str, private: bool) -> Result<()>;

    /// Upload the full contents of `folder` as the repository payload.
    async fn upload_folder(&self, repo_id: &str, folder: &Path) -> Result<()>;
}

/// Repository id for one quantized variant: `<user>/<model>-<bpw>bpw-exl2`.
///
/// With an empty user the leading `/` is dropped and the hub places the
/// repository under the token owner's namespace.
pub fn variant_repo_id(user: &str, model_name: &str, bpw: &Bpw) -> String {
    format!(
        "{}/{}-{}{}",
        user,
        model_name,
        bpw,
        ToolchainConfig::OUTPUT_DIR_SUFFIX
    )
    .trim_start_matches('/')
    .to_string()
}

/// Body of `POST /api/repos/create`.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CreateRepoRequest<'a> {
    #[serde(rename = "type")]
    pub repo_type: &'static str,
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<&'a str>,
    pub private: bool,
}

impl<'a> CreateRepoRequest<'a> {
    pub fn model(repo_id: &'a str, private: bool) -> Self {
        let (organization, name) = match repo_id.split_once('/') {
            Some((org, name)) => (Some(org), name),
            None => (None, repo_id),
        };
        Self {
            repo_type: "model",
            name,
            organization,
            private,
        }
    }
}

/// Hugging Face Hub client.
pub struct HuggingFaceHub {
    client: Client,
    api_base: String,
    token: Option<String>,
    runner: Arc<dyn ProcessRunner>,
    cli_program: PathBuf,
}

impl fmt::Debug for HuggingFaceHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HuggingFaceHub")
            .field("api_base", &self.api_base)
            .field("cli_program", &self.cli_program)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

impl HuggingFaceHub {
    /// Create a client using the token from the environment or login cache.
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("easyexl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EasyExlError::Network {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        let token = auth::resolve_token().map(|(token, source)| {
            info!("Hugging Face token found from {}", source);
            token
        });

        Ok(Self {
            client,
            api_base: HF_API_BASE.to_string(),
            token,
            runner,
            cli_program: PathBuf::from(HF_CLI_PROGRAM),
        })
    }

    /// Use an explicit token instead of the resolved one.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_cli_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.cli_program = program.into();
        self
    }

    fn require_token(&self) -> Result<&str> {
        self.token.as_deref().ok_or_else(|| EasyExlError::Hub {
            message: format!(
                "No Hugging Face token found (set {} or run `huggingface-cli login`)",
                auth::HF_TOKEN_ENV_VAR
            ),
            status_code: None,
        })
    }

    /// Upload command for one folder.
    pub fn upload_invocation(&self, repo_id: &str, folder: &Path, token: &str) -> ToolInvocation {
        ToolInvocation::new(HF_CLI_PROGRAM, &self.cli_program)
            .arg("upload")
            .arg(repo_id)
            .arg(folder)
            .arg(".")
            .args(["--repo-type", "model"])
            .env(auth::HF_TOKEN_ENV_VAR, token)
    }
}

#[async_trait]
impl HubClient for HuggingFaceHub {
    async fn create_repo(&self, repo_id: &str, private: bool) -> Result<()> {
        let token = self.require_token()?;
        let url = format!("{}/repos/create", self.api_base);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .json(&CreateRepoRequest::model(repo_id, private))
            .send()
            .await
            .map_err(|e| EasyExlError::Network {
                message: format!("Hugging Face API request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EasyExlError::Hub {
                message: format!("Creating {repo_id} returned {status}: {body}"),
                status_code: Some(status.as_u16()),
            });
        }

        info!("Created repository {}", repo_id);
        Ok(())
    }

    async fn upload_folder(&self, repo_id: &str, folder: &Path) -> Result<()> {
        let token = self.require_token()?;
        if !folder.is_dir() {
            return Err(EasyExlError::Hub {
                message: format!("Upload folder does not exist: {}", folder.display()),
                status_code: None,
            });
        }

        info!("Uploading {} to {}", folder.display(), repo_id);
        let invocation = self.upload_invocation(repo_id, folder, token);
        self.runner
            .run(&invocation)
            .await?
            .check(&invocation.tool)?;
        info!("Uploaded {}", repo_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{SystemProcessRunner, ToolExit};

    #[test]
    fn test_variant_repo_id() {
        let bpw: Bpw = "6".parse().unwrap();
        assert_eq!(variant_repo_id("someone", "phi", &bpw), "someone/phi-6bpw-exl2");
        assert_eq!(variant_repo_id("", "phi", &bpw), "phi-6bpw-exl2");
    }

    #[test]
    fn test_create_repo_request_splits_namespace() {
        let req = CreateRepoRequest::model("someone/phi-6bpw-exl2", true);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "model");
        assert_eq!(json["name"], "phi-6bpw-exl2");
        assert_eq!(json["organization"], "someone");
        assert_eq!(json["private"], true);

        let req = CreateRepoRequest::model("phi-6bpw-exl2", true);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("organization").is_none());
    }

    #[test]
    fn test_upload_invocation() {
        let hub = HuggingFaceHub::new(Arc::new(SystemProcessRunner::new()))
            .unwrap()
            .with_cli_program("/usr/local/bin/huggingface-cli");
        let inv = hub.upload_invocation("someone/phi-6bpw-exl2", Path::new("/m/phi-6bpw-exl2"), "hf_x");

        assert_eq!(inv.program, PathBuf::from("/usr/local/bin/huggingface-cli"));
        assert_eq!(
            inv.args_lossy(),
            vec!["upload", "someone/phi-6bpw-exl2", "/m/phi-6bpw-exl2", ".", "--repo-type", "model"]
        );
        assert_eq!(inv.env, vec![("HF_TOKEN".to_string(), "hf_x".to_string())]);
    }

    /// Answer one HTTP request with `status_line` and return the raw request.
    async fn answer_once(listener: &tokio::net::TcpListener, status_line: &str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&request).into_owned();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let body_len = text[..head_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if request.len() >= head_end + 4 + body_len {
                    break;
                }
            }
        }

        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{{}}"
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        String::from_utf8_lossy(&request).into_owned()
    }

    #[tokio::test]
    async fn test_create_repo_over_http() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let created = answer_once(&listener, "200 OK").await;
            let conflict = answer_once(&listener, "409 Conflict").await;
            (created, conflict)
        });

        let hub = HuggingFaceHub {
            client: Client::builder().no_proxy().build().unwrap(),
            api_base: HF_API_BASE.to_string(),
            token: None,
            runner: Arc::new(NeverRun),
            cli_program: PathBuf::from(HF_CLI_PROGRAM),
        }
        .with_api_base(format!("http://{addr}/api/"))
        .with_token("hf_test");

        hub.create_repo("someone/phi-6bpw-exl2", true).await.unwrap();
        let err = hub
            .create_repo("someone/phi-6bpw-exl2", true)
            .await
            .unwrap_err();
        assert!(matches!(err, EasyExlError::Hub { status_code: Some(409), .. }));

        let (created, _) = server.await.unwrap();
        let (head, body) = created.split_once("\r\n\r\n").unwrap();
        assert!(head.starts_with("POST /api/repos/create "));
        assert!(head
            .lines()
            .any(|line| line.eq_ignore_ascii_case("authorization: Bearer hf_test")));

        let body: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(body["type"], "model");
        assert_eq!(body["name"], "phi-6bpw-exl2");
        assert_eq!(body["organization"], "someone");
        assert_eq!(body["private"], true);
    }

    #[tokio::test]
    async fn test_create_repo_without_token_fails() {
        let hub = HuggingFaceHub::new(Arc::new(NeverRun)).unwrap();
        let hub = HuggingFaceHub { token: None, ..hub };
        let err = hub.create_repo("someone/phi", true).await.unwrap_err();
        assert!(matches!(err, EasyExlError::Hub { status_code: None, .. }));
    }

    struct NeverRun;

    #[async_trait]
    impl ProcessRunner for NeverRun {
        async fn run(&self, _invocation: &ToolInvocation) -> Result<ToolExit> {
            panic!("upload tool must not run");
        }
    }

    #[tokio::test]
    async fn test_upload_missing_folder_fails_before_running_tool() {
        let hub = HuggingFaceHub::new(Arc::new(NeverRun)).unwrap().with_token("hf_x");
        let err = hub
            .upload_folder("someone/phi", Path::new("/nonexistent/phi-6bpw-exl2"))
            .await
            .unwrap_err();
        assert!(matches!(err, EasyExlError::Hub { .. }));
    }
}
