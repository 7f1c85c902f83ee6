//! Where tokenizer and architecture configs come from.
//!
//! The only asynchronous boundary in the system: a one-shot fetch with no
//! retry. Retry and backoff belong to whatever downloads model files.

use ember_core::model::ModelConfig;
use ember_core::tokenizer::Tokenizer;
use ember_core::{EmberError, Result};
use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;

/// Settings for network loads.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Whole-request timeout.
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl FetchConfig {
    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A tokenizer definition in one of its accepted forms.
#[derive(Debug, Clone)]
pub enum TokenizerSource {
    /// `tokenizer.json` served over HTTP(S).
    Url(String),
    /// Already parsed JSON.
    Json(serde_json::Value),
    /// Raw UTF-8 JSON bytes.
    Bytes(Vec<u8>),
    /// File on disk.
    Path(PathBuf),
}

impl TokenizerSource {
    /// Resolve the source into a loaded tokenizer.
    pub async fn load(self, fetch: &FetchConfig) -> Result<Tokenizer> {
        match self {
            TokenizerSource::Url(url) => {
                let bytes = fetch_bytes(&url, fetch).await?;
                Tokenizer::from_slice(&bytes)
            }
            TokenizerSource::Json(value) => Tokenizer::from_value(value),
            TokenizerSource::Bytes(bytes) => Tokenizer::from_slice(&bytes),
            TokenizerSource::Path(path) => {
                let bytes = tokio::fs::read(&path).await?;
                Tokenizer::from_slice(&bytes)
            }
        }
    }
}

impl From<serde_json::Value> for TokenizerSource {
    fn from(value: serde_json::Value) -> Self {
        TokenizerSource::Json(value)
    }
}

impl From<Vec<u8>> for TokenizerSource {
    fn from(bytes: Vec<u8>) -> Self {
        TokenizerSource::Bytes(bytes)
    }
}

impl From<PathBuf> for TokenizerSource {
    fn from(path: PathBuf) -> Self {
        TokenizerSource::Path(path)
    }
}

/// Fetch a URL body.
pub async fn fetch_bytes(url: &str, fetch: &FetchConfig) -> Result<Vec<u8>> {
    let client = reqwest::Client::builder()
        .timeout(fetch.timeout)
        .build()
        .map_err(|e| fetch_error(url, e))?;

    tracing::debug!(url, "fetching");
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| fetch_error(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(status_error(url, status));
    }

    let bytes = response.bytes().await.map_err(|e| fetch_error(url, e))?;
    tracing::debug!(url, len = bytes.len(), "fetched");
    Ok(bytes.to_vec())
}

/// Fetch and parse a JSON document.
pub async fn fetch_json(url: &str, fetch: &FetchConfig) -> Result<serde_json::Value> {
    let bytes = fetch_bytes(url, fetch).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Fetch an architecture config and normalize it.
pub async fn load_model_config(url: &str, fetch: &FetchConfig) -> Result<ModelConfig> {
    let raw = fetch_json(url, fetch).await?;
    Ok(ModelConfig::from_value(&raw))
}

/// Map a non-success HTTP status to an error.
///
/// 404 gets its own variant: it almost always means the model was never
/// downloaded or deployed.
pub fn status_error(url: &str, status: StatusCode) -> EmberError {
    if status == StatusCode::NOT_FOUND {
        EmberError::NotFound {
            url: url.to_string(),
        }
    } else {
        EmberError::Fetch {
            url: url.to_string(),
            message: format!("HTTP {status}"),
        }
    }
}

fn fetch_error(url: &str, err: reqwest::Error) -> EmberError {
    EmberError::Fetch {
        url: url.to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_json() -> serde_json::Value {
        serde_json::json!({
            "model": { "vocab": { "h": 0, "i": 1, "hi": 2 }, "merges": ["h i"] }
        })
    }

    #[test]
    fn not_found_is_distinguished() {
        let err = status_error("http://x/config.json", StatusCode::NOT_FOUND);
        assert!(matches!(err, EmberError::NotFound { ref url } if url == "http://x/config.json"));

        let err = status_error("http://x/config.json", StatusCode::INTERNAL_SERVER_ERROR);
        match err {
            EmberError::Fetch { message, .. } => assert!(message.contains("500")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn loads_from_json_and_bytes() {
        let fetch = FetchConfig::default();

        let t = TokenizerSource::from(toy_json()).load(&fetch).await.unwrap();
        assert_eq!(t.encode("hi"), vec![2]);

        let bytes = serde_json::to_vec(&toy_json()).unwrap();
        let t = TokenizerSource::from(bytes).load(&fetch).await.unwrap();
        assert_eq!(t.encode("hi"), vec![2]);
    }

    #[tokio::test]
    async fn loads_from_path() {
        let path = std::env::temp_dir().join(format!("ember-source-{}.json", std::process::id()));
        tokio::fs::write(&path, serde_json::to_vec(&toy_json()).unwrap())
            .await
            .unwrap();

        let t = TokenizerSource::Path(path.clone())
            .load(&FetchConfig::default())
            .await
            .unwrap();
        assert_eq!(t.encode("ih"), vec![1, 0]);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn missing_model_section_fails_at_load() {
        let err = TokenizerSource::from(serde_json::json!({ "added_tokens": [] }))
            .load(&FetchConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EmberError::MalformedTokenizer(_)));
    }

    #[tokio::test]
    async fn bad_bytes_are_serde_errors() {
        let err = TokenizerSource::from(b"not json".to_vec())
            .load(&FetchConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EmberError::SerdeError(_)));
    }

    #[tokio::test]
    async fn unreachable_url_is_fetch_error() {
        let fetch = FetchConfig::default().timeout(Duration::from_millis(500));
        let err = fetch_json("http://127.0.0.1:9/config.json", &fetch)
            .await
            .unwrap_err();
        assert!(matches!(err, EmberError::Fetch { .. }));
    }
}
