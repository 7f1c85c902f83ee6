//! Model-side plumbing around an external execution engine.
//!
//! Provides:
//! - Model configuration normalized across architecture families
//! - KV cache state and its tensor naming protocol

mod config;
mod kv_cache;

pub use config::{resolve_usize, ModelConfig, TokenIds};
pub use kv_cache::{names, KvCache, KvCacheConfig, LayerCache, TensorMap};
