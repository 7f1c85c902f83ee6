//! KV cache for transformer inference.
//!
//! Holds per-layer key/value tensors between autoregressive decoding steps.
//! The execution engine returns the full accumulated cache on every step, so
//! updates replace tensors instead of concatenating.
//!
//! Lifecycle: empty (`seq_len == 0`) → populated by [`KvCache::update_from_outputs`]
//! → back to empty via [`KvCache::clear`]. A cache belongs to exactly one
//! generation session; all mutation goes through `&mut self`.
//!
//! Tensor names at the engine boundary:
//!
//! | direction | self-attention                 | cross-attention                        |
//! |-----------|--------------------------------|----------------------------------------|
//! | feed      | `past_key_values.{i}.key/value` | `past_key_values.{i}.encoder.key/value` |
//! | output    | `present.{i}.key/value`         | `present.{i}.encoder.key/value`         |
//!
//! All tensors are shaped `[1, num_kv_heads, seq_len, head_dim]`.

use super::ModelConfig;
use crate::error::{EmberError, Result};
use candle_core::{DType, Device, Tensor};
use std::collections::HashMap;

/// Tensors keyed by boundary name.
pub type TensorMap = HashMap<String, Tensor>;

/// Boundary tensor names.
pub mod names {
    /// Self-attention key fed for `layer`.
    pub fn past_key(layer: usize) -> String {
        format!("past_key_values.{layer}.key")
    }

    /// Self-attention value fed for `layer`.
    pub fn past_value(layer: usize) -> String {
        format!("past_key_values.{layer}.value")
    }

    /// Cross-attention key fed for `layer`.
    pub fn past_encoder_key(layer: usize) -> String {
        format!("past_key_values.{layer}.encoder.key")
    }

    /// Cross-attention value fed for `layer`.
    pub fn past_encoder_value(layer: usize) -> String {
        format!("past_key_values.{layer}.encoder.value")
    }

    /// Self-attention key returned for `layer`.
    pub fn present_key(layer: usize) -> String {
        format!("present.{layer}.key")
    }

    /// Self-attention value returned for `layer`.
    pub fn present_value(layer: usize) -> String {
        format!("present.{layer}.value")
    }

    /// Cross-attention key returned for `layer`.
    pub fn present_encoder_key(layer: usize) -> String {
        format!("present.{layer}.encoder.key")
    }

    /// Cross-attention value returned for `layer`.
    pub fn present_encoder_value(layer: usize) -> String {
        format!("present.{layer}.encoder.value")
    }
}

/// Cache dimensions, fixed for the lifetime of a loaded model.
#[derive(Debug, Clone, PartialEq)]
pub struct KvCacheConfig {
    /// Number of decoder layers.
    pub num_layers: usize,
    /// Number of KV heads.
    pub num_kv_heads: usize,
    /// Head dimension.
    pub head_dim: usize,
    /// Keep a cross-attention cache per layer.
    pub has_cross_attention: bool,
    /// Element type of placeholder tensors.
    pub dtype: DType,
}

impl KvCacheConfig {
    /// Derive cache dimensions from a model config.
    pub fn from_model_config(config: &ModelConfig, dtype: DType) -> Self {
        Self {
            num_layers: config.num_decoder_layers,
            num_kv_heads: config.num_key_value_heads,
            head_dim: config.head_dim(),
            has_cross_attention: config.is_encoder_decoder,
            dtype,
        }
    }
}

impl Default for KvCacheConfig {
    fn default() -> Self {
        Self {
            num_layers: 1,
            num_kv_heads: 1,
            head_dim: 64,
            has_cross_attention: false,
            dtype: DType::F32,
        }
    }
}

/// KV cache for a single layer.
#[derive(Debug, Clone, Default)]
pub struct LayerCache {
    /// Cached keys: [batch, num_kv_heads, seq_len, head_dim]
    key: Option<Tensor>,
    /// Cached values: [batch, num_kv_heads, seq_len, head_dim]
    value: Option<Tensor>,
}

impl LayerCache {
    /// Create a new empty layer cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.key.is_none()
    }

    /// Get the current sequence length in cache.
    pub fn seq_len(&self) -> usize {
        self.key.as_ref().map(|k| k.dims()[2]).unwrap_or(0)
    }

    /// Replace the cached pair.
    pub fn set(&mut self, key: Tensor, value: Tensor) {
        self.key = Some(key);
        self.value = Some(value);
    }

    /// Get cached KV without modification.
    pub fn get(&self) -> Option<(&Tensor, &Tensor)> {
        match (&self.key, &self.value) {
            (Some(k), Some(v)) => Some((k, v)),
            _ => None,
        }
    }

    /// Clear the cache.
    pub fn clear(&mut self) {
        self.key = None;
        self.value = None;
    }
}

/// Full KV cache for all layers.
///
/// Not `Clone`: one cache per generation session.
#[derive(Debug)]
pub struct KvCache {
    config: KvCacheConfig,
    /// Self-attention caches.
    layers: Vec<LayerCache>,
    /// Cross-attention caches; empty when cross-attention is off.
    cross: Vec<LayerCache>,
    /// Shared sequence length of all self-attention tensors.
    seq_len: usize,
    /// Device for placeholder tensors.
    device: Device,
}

impl KvCache {
    /// Create an empty cache.
    pub fn new(config: KvCacheConfig, device: Device) -> Self {
        let layers = (0..config.num_layers).map(|_| LayerCache::new()).collect();
        let cross = if config.has_cross_attention {
            (0..config.num_layers).map(|_| LayerCache::new()).collect()
        } else {
            Vec::new()
        };
        tracing::debug!(
            num_layers = config.num_layers,
            num_kv_heads = config.num_kv_heads,
            head_dim = config.head_dim,
            cross = config.has_cross_attention,
            "kv cache created"
        );
        Self {
            config,
            layers,
            cross,
            seq_len: 0,
            device,
        }
    }

    /// Cache dimensions.
    pub fn config(&self) -> &KvCacheConfig {
        &self.config
    }

    /// Get the current sequence length.
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.layers.first().map(|l| l.is_empty()).unwrap_or(true)
    }

    /// Get number of layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Get reference to layer cache.
    pub fn layer(&self, layer_idx: usize) -> Option<&LayerCache> {
        self.layers.get(layer_idx)
    }

    /// Cross-attention cache of a layer, if enabled.
    pub fn encoder_layer(&self, layer_idx: usize) -> Option<&LayerCache> {
        self.cross.get(layer_idx)
    }

    /// Whether every layer has its cross-attention cache set.
    pub fn has_encoder_cache(&self) -> bool {
        !self.cross.is_empty() && self.cross.iter().all(|l| !l.is_empty())
    }

    /// `[1, num_kv_heads, 0, head_dim]` tensor meaning "no history yet".
    fn placeholder(&self) -> Result<Tensor> {
        Ok(Tensor::zeros(
            (1, self.config.num_kv_heads, 0, self.config.head_dim),
            self.config.dtype,
            &self.device,
        )?)
    }

    /// Tensors to feed the next decoding step.
    ///
    /// Layers without history get placeholders with a zero-length sequence axis.
    pub fn feed_tensors(&self) -> Result<TensorMap> {
        let mut feeds = HashMap::with_capacity(self.layers.len() * 2 + self.cross.len() * 2);

        for (i, layer) in self.layers.iter().enumerate() {
            let (key, value) = match layer.get() {
                Some((k, v)) => (k.clone(), v.clone()),
                None => (self.placeholder()?, self.placeholder()?),
            };
            feeds.insert(names::past_key(i), key);
            feeds.insert(names::past_value(i), value);
        }

        for (i, layer) in self.cross.iter().enumerate() {
            let (key, value) = match layer.get() {
                Some((k, v)) => (k.clone(), v.clone()),
                None => (self.placeholder()?, self.placeholder()?),
            };
            feeds.insert(names::past_encoder_key(i), key);
            feeds.insert(names::past_encoder_value(i), value);
        }

        Ok(feeds)
    }

    /// Adopt the present tensors returned by one decoding step.
    ///
    /// Self-attention tensors replace the cached ones and set the sequence
    /// length. Cross-attention tensors are adopted only for layers that have
    /// none yet. Nothing is changed if any tensor fails validation.
    pub fn update_from_outputs(&mut self, outputs: &TensorMap) -> Result<()> {
        let mut self_updates = Vec::new();
        let mut new_seq_len: Option<usize> = None;

        for i in 0..self.layers.len() {
            let Some((key, value)) =
                take_pair(outputs, &names::present_key(i), &names::present_value(i))?
            else {
                continue;
            };
            let seq = self.check_pair(i, key, value)?;
            match new_seq_len {
                Some(expected) if expected != seq => {
                    return Err(EmberError::ShapeMismatch(format!(
                        "layer {i} has sequence length {seq}, expected {expected}"
                    )));
                }
                _ => new_seq_len = Some(seq),
            }
            self_updates.push((i, key.clone(), value.clone()));
        }

        let mut cross_updates = Vec::new();
        for i in 0..self.cross.len() {
            if !self.cross[i].is_empty() {
                continue;
            }
            let Some((key, value)) = take_pair(
                outputs,
                &names::present_encoder_key(i),
                &names::present_encoder_value(i),
            )?
            else {
                continue;
            };
            self.check_pair(i, key, value)?;
            cross_updates.push((i, key.clone(), value.clone()));
        }

        for (i, key, value) in self_updates {
            self.layers[i].set(key, value);
        }
        for (i, key, value) in cross_updates {
            self.cross[i].set(key, value);
        }
        if let Some(seq) = new_seq_len {
            self.seq_len = seq;
        }

        tracing::trace!(seq_len = self.seq_len, "kv cache updated");
        Ok(())
    }

    /// Set the cross-attention cache of one layer.
    ///
    /// Called once after the encoder pass, before the first decoder step.
    pub fn set_encoder_cache(&mut self, layer_idx: usize, key: Tensor, value: Tensor) -> Result<()> {
        if !self.config.has_cross_attention {
            return Err(EmberError::CacheError(
                "cross-attention is not enabled for this cache".into(),
            ));
        }
        if layer_idx >= self.cross.len() {
            return Err(EmberError::CacheError(format!(
                "layer {layer_idx} out of range ({} layers)",
                self.cross.len()
            )));
        }
        self.check_pair(layer_idx, &key, &value)?;
        self.cross[layer_idx].set(key, value);
        Ok(())
    }

    /// Clear all layer caches.
    pub fn clear(&mut self) {
        for layer in self.layers.iter_mut().chain(self.cross.iter_mut()) {
            layer.clear();
        }
        self.seq_len = 0;
    }

    /// Release all tensors. Same as [`clear`](Self::clear).
    pub fn dispose(&mut self) {
        self.clear();
    }

    /// Validate shape and return the sequence length.
    fn check_pair(&self, layer: usize, key: &Tensor, value: &Tensor) -> Result<usize> {
        let expected = |t: &Tensor, what: &str| -> Result<usize> {
            match t.dims() {
                &[1, heads, seq, dim]
                    if heads == self.config.num_kv_heads && dim == self.config.head_dim =>
                {
                    Ok(seq)
                }
                dims => Err(EmberError::ShapeMismatch(format!(
                    "layer {layer} {what}: got {dims:?}, expected [1, {}, seq, {}]",
                    self.config.num_kv_heads, self.config.head_dim
                ))),
            }
        };
        let k_seq = expected(key, "key")?;
        let v_seq = expected(value, "value")?;
        if k_seq != v_seq {
            return Err(EmberError::ShapeMismatch(format!(
                "layer {layer}: key length {k_seq} != value length {v_seq}"
            )));
        }
        Ok(k_seq)
    }
}

fn take_pair<'a>(
    outputs: &'a TensorMap,
    key_name: &str,
    value_name: &str,
) -> Result<Option<(&'a Tensor, &'a Tensor)>> {
    match (outputs.get(key_name), outputs.get(value_name)) {
        (Some(k), Some(v)) => Ok(Some((k, v))),
        (None, None) => Ok(None),
        _ => Err(EmberError::CacheError(format!(
            "{key_name} and {value_name} must be returned together"
        ))),
    }
}
