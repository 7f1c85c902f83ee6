//! Model configuration.
//!
//! Architecture configs name the same quantity differently depending on the
//! model family (`hidden_size` vs `d_model`, `num_hidden_layers` vs
//! `n_layers`, ...). [`ModelConfig::from_value`] resolves each canonical field
//! through an ordered fallback table; the first key present wins. Supporting a
//! new naming convention means adding a key to one table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fallback keys for the vocabulary size.
pub const VOCAB_SIZE_KEYS: &[&str] = &["vocab_size", "n_vocab"];
/// Fallback keys for the hidden size.
pub const HIDDEN_SIZE_KEYS: &[&str] = &["hidden_size", "d_model", "n_embd"];
/// Fallback keys for the layer count.
pub const NUM_LAYERS_KEYS: &[&str] = &[
    "num_hidden_layers",
    "n_layers",
    "num_layers",
    "decoder_layers",
    "n_layer",
];
/// Fallback keys for the decoder layer count; defaults to the layer count.
pub const NUM_DECODER_LAYERS_KEYS: &[&str] = &["decoder_layers", "num_decoder_layers"];
/// Fallback keys for the attention head count.
pub const NUM_HEADS_KEYS: &[&str] = &[
    "num_attention_heads",
    "n_heads",
    "num_heads",
    "decoder_attention_heads",
    "n_head",
];
/// Fallback keys for the KV head count; defaults to the attention head count.
pub const NUM_KV_HEADS_KEYS: &[&str] = &["num_key_value_heads", "n_kv_heads"];
/// Fallback keys for the FFN size.
pub const INTERMEDIATE_SIZE_KEYS: &[&str] = &[
    "intermediate_size",
    "d_ff",
    "ffn_dim",
    "decoder_ffn_dim",
    "n_inner",
];
/// Fallback keys for the context length.
pub const MAX_POSITIONS_KEYS: &[&str] = &[
    "max_position_embeddings",
    "max_seq_length",
    "n_positions",
    "n_ctx",
];
/// Fallback keys for an explicit head dimension.
pub const HEAD_DIM_KEYS: &[&str] = &["head_dim", "d_kv"];
/// Fallback keys for the norm epsilon.
pub const NORM_EPS_KEYS: &[&str] = &[
    "rms_norm_eps",
    "norm_eps",
    "layer_norm_epsilon",
    "layer_norm_eps",
];

/// Model families that are encoder-decoder when the config has no explicit flag.
pub const ENCODER_DECODER_MODEL_TYPES: &[&str] = &[
    "t5",
    "mt5",
    "umt5",
    "longt5",
    "bart",
    "mbart",
    "marian",
    "m2m_100",
    "nllb-moe",
    "pegasus",
    "blenderbot",
    "blenderbot-small",
    "fsmt",
    "led",
];

/// A token id field: one id or several (e.g. multiple valid EOS ids).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenIds {
    /// Single id.
    Single(u32),
    /// Several ids, in config order.
    Multiple(Vec<u32>),
}

impl TokenIds {
    /// First id.
    pub fn first(&self) -> Option<u32> {
        match self {
            TokenIds::Single(id) => Some(*id),
            TokenIds::Multiple(ids) => ids.first().copied(),
        }
    }

    /// All ids.
    pub fn to_vec(&self) -> Vec<u32> {
        match self {
            TokenIds::Single(id) => vec![*id],
            TokenIds::Multiple(ids) => ids.clone(),
        }
    }

    /// Whether `id` is one of these ids.
    pub fn contains(&self, id: u32) -> bool {
        match self {
            TokenIds::Single(single) => *single == id,
            TokenIds::Multiple(ids) => ids.contains(&id),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => {
                let ids: Vec<u32> = items
                    .iter()
                    .filter_map(|item| {
                        let id = coerce_u32(item);
                        if id.is_none() {
                            tracing::debug!(entry = %item, "dropping token id that is not an integer");
                        }
                        id
                    })
                    .collect();
                Some(TokenIds::Multiple(ids))
            }
            other => coerce_u32(other).map(TokenIds::Single),
        }
    }
}

/// Canonical configuration for a transformer model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Hidden dimension.
    pub hidden_size: usize,
    /// Intermediate dimension (FFN).
    pub intermediate_size: usize,
    /// Number of attention heads.
    pub num_attention_heads: usize,
    /// Number of KV heads (for GQA).
    pub num_key_value_heads: usize,
    /// Number of layers.
    pub num_hidden_layers: usize,
    /// Number of decoder layers; equals `num_hidden_layers` for decoder-only models.
    pub num_decoder_layers: usize,
    /// Maximum sequence length.
    pub max_position_embeddings: usize,
    /// Explicit head dimension, 0 when derived.
    #[serde(default)]
    pub head_dim: usize,
    /// Norm epsilon.
    pub rms_norm_eps: f64,
    /// Rope theta.
    pub rope_theta: f64,
    /// Model architecture type.
    #[serde(default)]
    pub model_type: String,
    /// Encoder-decoder architecture.
    pub is_encoder_decoder: bool,
    /// BOS token id.
    pub bos_token_id: Option<TokenIds>,
    /// EOS token id(s).
    pub eos_token_id: Option<TokenIds>,
    /// PAD token id.
    pub pad_token_id: Option<TokenIds>,
    /// First decoder input for encoder-decoder models.
    pub decoder_start_token_id: Option<TokenIds>,
    /// Token forced as the first generated token.
    pub forced_bos_token_id: Option<TokenIds>,
}

impl ModelConfig {
    /// Normalize a raw architecture config.
    pub fn from_value(raw: &Value) -> Self {
        let num_attention_heads = resolve_usize(raw, NUM_HEADS_KEYS).unwrap_or(0);
        let num_hidden_layers = resolve_usize(raw, NUM_LAYERS_KEYS).unwrap_or(0);
        let model_type = raw
            .get("model_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let is_encoder_decoder = raw
            .get("is_encoder_decoder")
            .and_then(Value::as_bool)
            .unwrap_or_else(|| ENCODER_DECODER_MODEL_TYPES.contains(&model_type.as_str()));

        Self {
            vocab_size: resolve_usize(raw, VOCAB_SIZE_KEYS).unwrap_or(0),
            hidden_size: resolve_usize(raw, HIDDEN_SIZE_KEYS).unwrap_or(0),
            intermediate_size: resolve_usize(raw, INTERMEDIATE_SIZE_KEYS).unwrap_or(0),
            num_attention_heads,
            num_key_value_heads: resolve_usize(raw, NUM_KV_HEADS_KEYS)
                .unwrap_or(num_attention_heads),
            num_hidden_layers,
            num_decoder_layers: resolve_usize(raw, NUM_DECODER_LAYERS_KEYS)
                .unwrap_or(num_hidden_layers),
            max_position_embeddings: resolve_usize(raw, MAX_POSITIONS_KEYS).unwrap_or(0),
            head_dim: resolve_usize(raw, HEAD_DIM_KEYS).unwrap_or(0),
            rms_norm_eps: resolve_f64(raw, NORM_EPS_KEYS).unwrap_or(1e-5),
            rope_theta: resolve_f64(raw, &["rope_theta"]).unwrap_or(10000.0),
            model_type,
            is_encoder_decoder,
            bos_token_id: token_ids(raw, "bos_token_id"),
            eos_token_id: token_ids(raw, "eos_token_id"),
            pad_token_id: token_ids(raw, "pad_token_id"),
            decoder_start_token_id: token_ids(raw, "decoder_start_token_id"),
            forced_bos_token_id: token_ids(raw, "forced_bos_token_id"),
        }
    }

    /// Normalize raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        let raw: Value = serde_json::from_slice(bytes)?;
        Ok(Self::from_value(&raw))
    }

    /// Load from JSON file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let contents = std::fs::read(path)?;
        Self::from_slice(&contents)
    }

    /// Calculate head dimension.
    pub fn head_dim(&self) -> usize {
        if self.head_dim > 0 {
            self.head_dim
        } else if self.num_attention_heads > 0 {
            self.hidden_size / self.num_attention_heads
        } else {
            0
        }
    }

    /// Get GQA ratio.
    pub fn gqa_ratio(&self) -> usize {
        if self.num_key_value_heads == 0 {
            return 1;
        }
        self.num_attention_heads / self.num_key_value_heads
    }

    /// First EOS id, for callers that need exactly one.
    pub fn first_eos_token_id(&self) -> Option<u32> {
        self.eos_token_id.as_ref().and_then(TokenIds::first)
    }

    /// All EOS ids.
    pub fn eos_token_ids(&self) -> Vec<u32> {
        self.eos_token_id
            .as_ref()
            .map(TokenIds::to_vec)
            .unwrap_or_default()
    }
}

/// First key in `keys` holding a non-negative integer (or numeric string).
pub fn resolve_usize(raw: &Value, keys: &[&str]) -> Option<usize> {
    keys.iter()
        .filter_map(|k| raw.get(*k))
        .find_map(|v| coerce_u64(v).and_then(|n| usize::try_from(n).ok()))
}

fn resolve_f64(raw: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().filter_map(|k| raw.get(*k)).find_map(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn token_ids(raw: &Value, key: &str) -> Option<TokenIds> {
    raw.get(key).and_then(TokenIds::from_value)
}

fn coerce_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_u32(value: &Value) -> Option<u32> {
    coerce_u64(value).and_then(|n| u32::try_from(n).ok())
}
