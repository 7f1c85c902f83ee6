//! # Ember Core
//!
//! Tokenization and KV cache protocol for running transformer models locally.
//!
//! This crate provides:
//! - **Tokenizer pipeline** reading the `tokenizer.json` interchange format:
//!   normalizers, pre-tokenizers, byte-level BPE, added tokens and decoders
//! - **KV cache** holding per-layer attention tensors across decoding steps,
//!   including a one-time cross-attention cache for encoder-decoder models
//! - **Model config normalization** from heterogeneous architecture configs
//!
//! Numeric kernels are out of scope: tensors are produced and consumed by an
//! external execution engine, this crate only manages names, shapes and
//! lifecycle around it.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod model;
pub mod tokenizer;

pub use error::{EmberError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{EmberError, Result};
    pub use crate::model::{KvCache, KvCacheConfig, ModelConfig, TokenIds};
    pub use crate::tokenizer::{AddedToken, Tokenizer};
}
