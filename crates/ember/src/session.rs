//! Autoregressive decoding against an external execution engine.
//!
//! A [`GenerationSession`] owns exactly one [`KvCache`] and drives the step
//! protocol: build feeds, run the backend, adopt the present tensors, pick
//! the next token. Steps take `&mut self`, so one session can never run two
//! steps at once and two sessions can never share a cache.

use crate::handle::TokenizerHandle;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use ember_core::model::{names, KvCache, KvCacheConfig, ModelConfig, TensorMap, TokenIds};
use ember_core::{EmberError, Result};
use std::sync::Arc;

/// Feed name of the token ids, shaped `[1, n]` as i64.
pub const INPUT_IDS: &str = "input_ids";
/// Output name of the logits, shaped `[1, n, vocab]`.
pub const LOGITS: &str = "logits";
/// Encoder output forwarded to every decoder step when present.
pub const ENCODER_HIDDEN_STATES: &str = "encoder_hidden_states";
/// Encoder output name of the hidden states.
pub const LAST_HIDDEN_STATE: &str = "last_hidden_state";

/// The engine that actually runs the model graph.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Run one decoder step.
    ///
    /// Must return `logits` and the full accumulated `present.*` tensors.
    async fn run(&self, feeds: TensorMap) -> Result<TensorMap>;

    /// Run the encoder once over the prompt.
    ///
    /// Only called for encoder-decoder models. The outputs should carry
    /// `present.{i}.encoder.key/value` for every layer.
    async fn run_encoder(&self, _feeds: TensorMap) -> Result<TensorMap> {
        Err(EmberError::CacheError(
            "backend does not provide an encoder".into(),
        ))
    }
}

/// Configuration for generation.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Maximum tokens produced per `generate` call.
    pub max_new_tokens: usize,
    /// Generation stops when one of these is picked; it is not returned.
    pub stop_token_ids: Vec<u32>,
    /// First decoder input for encoder-decoder models.
    pub decoder_start_token_id: Option<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 256,
            stop_token_ids: Vec::new(),
            decoder_start_token_id: None,
        }
    }
}

impl GenerationConfig {
    /// Defaults filled from a model config.
    ///
    /// Stop ids are all EOS ids. The decoder start falls back to the pad id,
    /// which is what Marian-style models use.
    pub fn from_model_config(config: &ModelConfig) -> Self {
        let decoder_start_token_id = config
            .decoder_start_token_id
            .as_ref()
            .and_then(TokenIds::first)
            .or_else(|| config.pad_token_id.as_ref().and_then(TokenIds::first));
        Self {
            stop_token_ids: config.eos_token_ids(),
            decoder_start_token_id,
            ..Default::default()
        }
    }

    /// Set the token budget.
    pub fn max_new_tokens(mut self, n: usize) -> Self {
        self.max_new_tokens = n;
        self
    }

    /// Set the stop ids.
    pub fn stop_token_ids(mut self, ids: impl Into<Vec<u32>>) -> Self {
        self.stop_token_ids = ids.into();
        self
    }

    /// Set the decoder start id.
    pub fn decoder_start_token_id(mut self, id: u32) -> Self {
        self.decoder_start_token_id = Some(id);
        self
    }
}

/// One generation request's worth of state.
pub struct GenerationSession {
    backend: Arc<dyn ExecutionBackend>,
    cache: KvCache,
    config: GenerationConfig,
    encoder_hidden: Option<Tensor>,
    device: Device,
}

impl GenerationSession {
    /// Create a session with a fresh cache.
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        cache_config: KvCacheConfig,
        config: GenerationConfig,
    ) -> Self {
        let device = Device::Cpu;
        Self {
            backend,
            cache: KvCache::new(cache_config, device.clone()),
            config,
            encoder_hidden: None,
            device,
        }
    }

    /// Create a session sized for `model`.
    pub fn for_model(backend: Arc<dyn ExecutionBackend>, model: &ModelConfig) -> Self {
        Self::new(
            backend,
            KvCacheConfig::from_model_config(model, DType::F32),
            GenerationConfig::from_model_config(model),
        )
    }

    /// Generation settings.
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// The session's cache.
    pub fn cache(&self) -> &KvCache {
        &self.cache
    }

    /// Whether the cache keeps cross-attention tensors.
    pub fn is_encoder_decoder(&self) -> bool {
        self.cache.config().has_cross_attention
    }

    /// Adopt the cross-attention tensors from an encoder pass.
    pub fn prime_encoder(&mut self, encoder_outputs: &TensorMap) -> Result<()> {
        for i in 0..self.cache.num_layers() {
            let key = encoder_outputs.get(&names::present_encoder_key(i));
            let value = encoder_outputs.get(&names::present_encoder_value(i));
            match (key, value) {
                (Some(k), Some(v)) => self.cache.set_encoder_cache(i, k.clone(), v.clone())?,
                _ => {
                    return Err(EmberError::CacheError(format!(
                        "encoder outputs lack cross-attention tensors for layer {i}"
                    )))
                }
            }
        }
        self.encoder_hidden = encoder_outputs.get(LAST_HIDDEN_STATE).cloned();
        tracing::debug!(layers = self.cache.num_layers(), "encoder cache primed");
        Ok(())
    }

    /// Run one decoder step over `ids` and return the greedy next token.
    pub async fn step(&mut self, ids: &[u32]) -> Result<u32> {
        let mut feeds = self.cache.feed_tensors()?;
        feeds.insert(INPUT_IDS.to_string(), input_ids(ids, &self.device)?);
        if let Some(hidden) = &self.encoder_hidden {
            feeds.insert(ENCODER_HIDDEN_STATES.to_string(), hidden.clone());
        }

        let outputs = self.backend.run(feeds).await?;
        self.cache.update_from_outputs(&outputs)?;

        let logits = outputs
            .get(LOGITS)
            .ok_or_else(|| EmberError::CacheError("backend returned no logits".into()))?;
        let token = greedy(logits)?;
        tracing::trace!(token, seq_len = self.cache.seq_len(), "step");
        Ok(token)
    }

    /// Generate from `prompt` until a stop id or the token budget.
    ///
    /// Resets the cache first, so a session can serve consecutive requests.
    pub async fn generate(&mut self, prompt: &[u32]) -> Result<Vec<u32>> {
        self.reset();

        let mut next: Vec<u32> = if self.is_encoder_decoder() {
            let mut feeds = TensorMap::new();
            feeds.insert(INPUT_IDS.to_string(), input_ids(prompt, &self.device)?);
            let outputs = self.backend.run_encoder(feeds).await?;
            self.prime_encoder(&outputs)?;
            let start = self.config.decoder_start_token_id.ok_or_else(|| {
                EmberError::CacheError("encoder-decoder model without a decoder start id".into())
            })?;
            vec![start]
        } else {
            prompt.to_vec()
        };

        let mut generated = Vec::new();
        while generated.len() < self.config.max_new_tokens {
            let token = self.step(&next).await?;
            if self.config.stop_token_ids.contains(&token) {
                break;
            }
            generated.push(token);
            next = vec![token];
        }

        tracing::debug!(
            prompt_len = prompt.len(),
            generated = generated.len(),
            "generation finished"
        );
        Ok(generated)
    }

    /// Encode `prompt`, generate, and decode the new tokens.
    pub async fn generate_text(&mut self, tokenizer: &TokenizerHandle, prompt: &str) -> Result<String> {
        let ids = tokenizer.encode(prompt)?;
        let generated = self.generate(&ids).await?;
        tokenizer.decode(&generated, true)
    }

    /// Drop all cached attention state.
    pub fn reset(&mut self) {
        self.cache.clear();
        self.encoder_hidden = None;
    }
}

impl std::fmt::Debug for GenerationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationSession")
            .field("config", &self.config)
            .field("seq_len", &self.cache.seq_len())
            .finish()
    }
}

fn input_ids(ids: &[u32], device: &Device) -> Result<Tensor> {
    if ids.is_empty() {
        return Err(EmberError::ShapeMismatch("empty input ids".into()));
    }
    let len = ids.len();
    let ids: Vec<i64> = ids.iter().map(|&id| i64::from(id)).collect();
    Ok(Tensor::from_vec(ids, (1, len), device)?)
}

/// Argmax over the last position.
fn greedy(logits: &Tensor) -> Result<u32> {
    let row = match logits.dims() {
        &[1, seq, _] if seq > 0 => logits.get(0)?.get(seq - 1)?,
        &[seq, _] if seq > 0 => logits.get(seq - 1)?,
        &[_] => logits.clone(),
        dims => {
            return Err(EmberError::ShapeMismatch(format!(
                "logits shaped {dims:?}, expected [1, seq, vocab]"
            )))
        }
    };
    Ok(row.to_dtype(DType::F32)?.argmax(0)?.to_scalar::<u32>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    const LAYERS: usize = 2;
    const HEADS: usize = 2;
    const HEAD_DIM: usize = 4;
    const VOCAB: usize = 128;

    #[derive(Debug, Clone, PartialEq)]
    struct Seen {
        past: usize,
        n: usize,
        cross: Option<usize>,
        has_hidden: bool,
    }

    /// Returns scripted tokens and grows the cache by the input length.
    struct ScriptedBackend {
        script: Mutex<VecDeque<u32>>,
        seen: Mutex<Vec<Seen>>,
        encoder_len: Option<usize>,
    }

    impl ScriptedBackend {
        fn new(script: &[u32]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                seen: Mutex::new(Vec::new()),
                encoder_len: None,
            })
        }

        fn with_encoder(script: &[u32], encoder_len: usize) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                seen: Mutex::new(Vec::new()),
                encoder_len: Some(encoder_len),
            })
        }

        fn seen(&self) -> Vec<Seen> {
            self.seen.lock().clone()
        }
    }

    fn kv(seq: usize) -> Tensor {
        Tensor::zeros((1, HEADS, seq, HEAD_DIM), DType::F32, &Device::Cpu).unwrap()
    }

    #[async_trait]
    impl ExecutionBackend for ScriptedBackend {
        async fn run(&self, feeds: TensorMap) -> Result<TensorMap> {
            let past = feeds[&names::past_key(0)].dims()[2];
            let n = feeds[INPUT_IDS].dims()[1];
            self.seen.lock().push(Seen {
                past,
                n,
                cross: feeds.get(&names::past_encoder_key(0)).map(|t| t.dims()[2]),
                has_hidden: feeds.contains_key(ENCODER_HIDDEN_STATES),
            });

            let next = self.script.lock().pop_front().unwrap_or(0) as usize;
            let mut out = TensorMap::new();
            for i in 0..LAYERS {
                out.insert(names::present_key(i), kv(past + n));
                out.insert(names::present_value(i), kv(past + n));
            }
            let mut logits = vec![0f32; n * VOCAB];
            logits[(n - 1) * VOCAB + next] = 1.0;
            out.insert(
                LOGITS.to_string(),
                Tensor::from_vec(logits, (1, n, VOCAB), &Device::Cpu)?,
            );
            Ok(out)
        }

        async fn run_encoder(&self, feeds: TensorMap) -> Result<TensorMap> {
            let Some(len) = self.encoder_len else {
                return Err(EmberError::CacheError("no encoder".into()));
            };
            let n = feeds[INPUT_IDS].dims()[1];
            let mut out = TensorMap::new();
            for i in 0..LAYERS {
                out.insert(names::present_encoder_key(i), kv(len));
                out.insert(names::present_encoder_value(i), kv(len));
            }
            out.insert(
                LAST_HIDDEN_STATE.to_string(),
                Tensor::zeros((1, n, 8), DType::F32, &Device::Cpu)?,
            );
            Ok(out)
        }
    }

    /// Backend without an encoder and without logits.
    struct SilentBackend;

    #[async_trait]
    impl ExecutionBackend for SilentBackend {
        async fn run(&self, _feeds: TensorMap) -> Result<TensorMap> {
            Ok(TensorMap::new())
        }
    }

    fn cache_config(cross: bool) -> KvCacheConfig {
        KvCacheConfig {
            num_layers: LAYERS,
            num_kv_heads: HEADS,
            head_dim: HEAD_DIM,
            has_cross_attention: cross,
            dtype: DType::F32,
        }
    }

    #[tokio::test]
    async fn decoder_only_generation() {
        let backend = ScriptedBackend::new(&[3, 4, 2, 9]);
        let mut session = GenerationSession::new(
            backend.clone(),
            cache_config(false),
            GenerationConfig::default().stop_token_ids(vec![2]),
        );

        let out = session.generate(&[5, 6, 7]).await.unwrap();
        assert_eq!(out, vec![3, 4]);

        let seen = backend.seen();
        let steps: Vec<(usize, usize)> = seen.iter().map(|s| (s.past, s.n)).collect();
        assert_eq!(steps, vec![(0, 3), (3, 1), (4, 1)]);
        assert!(seen.iter().all(|s| s.cross.is_none() && !s.has_hidden));
        assert_eq!(session.cache().seq_len(), 5);
    }

    #[tokio::test]
    async fn stops_at_token_budget() {
        let backend = ScriptedBackend::new(&[3, 4, 5, 6]);
        let mut session = GenerationSession::new(
            backend,
            cache_config(false),
            GenerationConfig::default().max_new_tokens(2),
        );
        assert_eq!(session.generate(&[1]).await.unwrap(), vec![3, 4]);
    }

    #[tokio::test]
    async fn generate_starts_from_empty_cache() {
        let backend = ScriptedBackend::new(&[3, 2, 4, 2]);
        let mut session = GenerationSession::new(
            backend.clone(),
            cache_config(false),
            GenerationConfig::default().stop_token_ids(vec![2]),
        );

        assert_eq!(session.generate(&[1, 1]).await.unwrap(), vec![3]);
        assert_eq!(session.generate(&[1]).await.unwrap(), vec![4]);

        let pasts: Vec<usize> = backend.seen().iter().map(|s| s.past).collect();
        assert_eq!(pasts, vec![0, 2, 0, 1]);
    }

    #[tokio::test]
    async fn encoder_decoder_generation() {
        let backend = ScriptedBackend::with_encoder(&[9, 10, 1], 7);
        let mut session = GenerationSession::new(
            backend.clone(),
            cache_config(true),
            GenerationConfig::default()
                .stop_token_ids(vec![1])
                .decoder_start_token_id(0),
        );

        let out = session.generate(&[5, 6, 7, 8]).await.unwrap();
        assert_eq!(out, vec![9, 10]);

        let seen = backend.seen();
        assert_eq!(seen[0].past, 0);
        assert_eq!(seen[0].n, 1);
        for s in &seen {
            assert_eq!(s.cross, Some(7));
            assert!(s.has_hidden);
        }
        assert!(session.cache().has_encoder_cache());
    }

    #[tokio::test]
    async fn encoder_decoder_needs_start_id() {
        let backend = ScriptedBackend::with_encoder(&[9], 3);
        let mut session =
            GenerationSession::new(backend, cache_config(true), GenerationConfig::default());
        let err = session.generate(&[5]).await.unwrap_err();
        assert!(matches!(err, EmberError::CacheError(_)));
    }

    #[tokio::test]
    async fn backend_without_encoder() {
        let mut session = GenerationSession::new(
            Arc::new(SilentBackend),
            cache_config(true),
            GenerationConfig::default().decoder_start_token_id(0),
        );
        let err = session.generate(&[5]).await.unwrap_err();
        assert!(matches!(err, EmberError::CacheError(_)));
    }

    #[tokio::test]
    async fn missing_logits_is_an_error() {
        let mut session = GenerationSession::new(
            Arc::new(SilentBackend),
            cache_config(false),
            GenerationConfig::default(),
        );
        let err = session.step(&[1]).await.unwrap_err();
        assert!(matches!(err, EmberError::CacheError(_)));
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected() {
        let backend = ScriptedBackend::new(&[3]);
        let mut session =
            GenerationSession::new(backend, cache_config(false), GenerationConfig::default());
        let err = session.generate(&[]).await.unwrap_err();
        assert!(matches!(err, EmberError::ShapeMismatch(_)));
    }

    #[test]
    fn prime_encoder_requires_every_layer() {
        let mut session = GenerationSession::new(
            Arc::new(SilentBackend),
            cache_config(true),
            GenerationConfig::default(),
        );
        let mut outputs = TensorMap::new();
        outputs.insert(names::present_encoder_key(0), kv(3));
        outputs.insert(names::present_encoder_value(0), kv(3));
        let err = session.prime_encoder(&outputs).unwrap_err();
        assert!(matches!(err, EmberError::CacheError(_)));
    }

    #[test]
    fn config_from_model() {
        let model = ModelConfig {
            eos_token_id: Some(TokenIds::Multiple(vec![1, 2])),
            pad_token_id: Some(TokenIds::Single(0)),
            ..Default::default()
        };
        let config = GenerationConfig::from_model_config(&model);
        assert_eq!(config.stop_token_ids, vec![1, 2]);
        assert_eq!(config.decoder_start_token_id, Some(0));

        let model = ModelConfig {
            decoder_start_token_id: Some(TokenIds::Single(5)),
            pad_token_id: Some(TokenIds::Single(0)),
            ..Default::default()
        };
        let config = GenerationConfig::from_model_config(&model);
        assert_eq!(config.decoder_start_token_id, Some(5));
        assert_eq!(config.max_new_tokens, 256);
    }

    #[test]
    fn greedy_picks_last_position() {
        let logits = Tensor::from_vec(
            vec![9f32, 0., 0., 0., 0., 7.],
            (1, 2, 3),
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(greedy(&logits).unwrap(), 2);

        let flat = Tensor::from_vec(vec![0f32, 3., 1.], 3, &Device::Cpu).unwrap();
        assert_eq!(greedy(&flat).unwrap(), 1);

        let bad = Tensor::zeros((2, 2, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(greedy(&bad), Err(EmberError::ShapeMismatch(_))));
    }

    #[tokio::test]
    async fn text_round_trip_through_handle() {
        let tokenizer = TokenizerHandle::new();
        let backend = ScriptedBackend::new(&[8, 13, 101]);
        let mut session = GenerationSession::new(
            backend,
            cache_config(false),
            GenerationConfig::default().stop_token_ids(vec![101]),
        );

        let err = session.generate_text(&tokenizer, "he").await.unwrap_err();
        assert!(matches!(err, EmberError::NotInitialized));

        tokenizer
            .load(serde_json::json!({
                "model": {
                    "vocab": { "h": 0, "e": 1, "l": 2, "he": 8, "hel": 13 },
                    "merges": ["h e", "he l"]
                },
                "added_tokens": [{ "id": 101, "content": "</s>", "special": true }]
            }))
            .await
            .unwrap();
        assert_eq!(session.generate_text(&tokenizer, "he").await.unwrap(), "hehel");
    }
}
