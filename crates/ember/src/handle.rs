//! Shared tokenizer slot that may not be loaded yet.

use crate::source::{FetchConfig, TokenizerSource};
use ember_core::tokenizer::Tokenizer;
use ember_core::{EmberError, Result};
use parking_lot::RwLock;
use std::sync::Arc;

/// Cloneable handle to a tokenizer that is loaded asynchronously.
///
/// Every method fails with [`EmberError::NotInitialized`] until
/// [`load`](Self::load) has completed. A later `load` swaps the tokenizer
/// atomically; calls already in flight keep the previous one.
#[derive(Clone, Default)]
pub struct TokenizerHandle {
    inner: Arc<RwLock<Option<Arc<Tokenizer>>>>,
    fetch: FetchConfig,
}

impl TokenizerHandle {
    /// Create an empty handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty handle with network settings.
    pub fn with_fetch_config(fetch: FetchConfig) -> Self {
        Self {
            inner: Arc::default(),
            fetch,
        }
    }

    /// Load from `source` and install the result.
    ///
    /// On failure the handle keeps whatever it held before.
    pub async fn load(&self, source: impl Into<TokenizerSource>) -> Result<()> {
        let tokenizer = source.into().load(&self.fetch).await?;
        tracing::debug!(vocab_size = tokenizer.vocab_size(), "tokenizer installed");
        *self.inner.write() = Some(Arc::new(tokenizer));
        Ok(())
    }

    /// Install an already built tokenizer.
    pub fn set(&self, tokenizer: Tokenizer) {
        *self.inner.write() = Some(Arc::new(tokenizer));
    }

    /// Whether a tokenizer is installed.
    pub fn is_loaded(&self) -> bool {
        self.inner.read().is_some()
    }

    /// The installed tokenizer.
    pub fn get(&self) -> Result<Arc<Tokenizer>> {
        self.inner.read().clone().ok_or(EmberError::NotInitialized)
    }

    /// Encode `text` to ids.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(self.get()?.encode(text))
    }

    /// Decode ids to text.
    pub fn decode(&self, ids: &[u32], skip_special: bool) -> Result<String> {
        Ok(self.get()?.decode(ids, skip_special))
    }

    /// Look up a token id, vocabulary first then added tokens.
    pub fn token_to_id(&self, token: &str) -> Result<Option<u32>> {
        Ok(self.get()?.token_to_id(token))
    }
}

impl std::fmt::Debug for TokenizerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenizerHandle")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
