//! Hugging Face token resolution.

use std::path::PathBuf;

/// Hugging Face environment variable for authentication tokens.
pub(crate) const HF_TOKEN_ENV_VAR: &str = "HF_TOKEN";

/// Environment variable overriding the Hugging Face cache root.
const HF_HOME_ENV_VAR: &str = "HF_HOME";

/// Token filename inside the Hugging Face cache root.
const HF_TOKEN_FILENAME: &str = "token";

/// Resolve a Hub token from the environment or the CLI login cache.
///
/// Checks in order:
/// 1. `HF_TOKEN` environment variable
/// 2. `$HF_HOME/token`
/// 3. `~/.cache/huggingface/token` (written by `huggingface-cli login`)
///
/// Returns the token and a label identifying its source.
pub fn resolve_token() -> Option<(String, &'static str)> {
    if let Ok(token) = std::env::var(HF_TOKEN_ENV_VAR) {
        if let Some(token) = non_empty(&token) {
            return Some((token, "env_var"));
        }
    }

    token_file_candidates()
        .into_iter()
        .find_map(|path| std::fs::read_to_string(path).ok().and_then(|t| non_empty(&t)))
        .map(|token| (token, "hf_cache"))
}

fn token_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(hf_home) = std::env::var(HF_HOME_ENV_VAR) {
        candidates.push(PathBuf::from(hf_home).join(HF_TOKEN_FILENAME));
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(
            home.join(".cache")
                .join("huggingface")
                .join(HF_TOKEN_FILENAME),
        );
    }
    candidates
}

fn non_empty(token: &str) -> Option<String> {
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}
