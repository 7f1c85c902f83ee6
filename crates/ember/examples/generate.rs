//! Generation loop example.
//!
//! Drives a [`GenerationSession`] against a toy backend that always predicts
//! `previous token + 1`, to show the KV cache protocol without a real model.

use anyhow::Result;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use ember::model::{names, TensorMap};
use ember::prelude::*;
use ember::session::{INPUT_IDS, LOGITS};
use std::sync::Arc;

const VOCAB: usize = 32;

struct CountingBackend {
    config: KvCacheConfig,
}

#[async_trait]
impl ExecutionBackend for CountingBackend {
    async fn run(&self, feeds: TensorMap) -> ember::Result<TensorMap> {
        let ids = feeds
            .get(INPUT_IDS)
            .ok_or_else(|| EmberError::CacheError("missing input_ids".into()))?;
        let n = ids.dims()[1];
        let last = ids.get(0)?.get(n - 1)?.to_scalar::<i64>()? as usize;
        let past = feeds
            .get(&names::past_key(0))
            .map(|t| t.dims()[2])
            .unwrap_or(0);

        let mut out = TensorMap::new();
        let shape = (1, self.config.num_kv_heads, past + n, self.config.head_dim);
        for i in 0..self.config.num_layers {
            out.insert(names::present_key(i), Tensor::zeros(shape, DType::F32, &Device::Cpu)?);
            out.insert(names::present_value(i), Tensor::zeros(shape, DType::F32, &Device::Cpu)?);
        }

        let mut logits = vec![0f32; VOCAB];
        logits[(last + 1) % VOCAB] = 1.0;
        out.insert(
            LOGITS.to_string(),
            Tensor::from_vec(logits, (1, 1, VOCAB), &Device::Cpu)?,
        );
        Ok(out)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let model = ModelConfig::from_value(&serde_json::json!({
        "model_type": "llama",
        "vocab_size": VOCAB,
        "hidden_size": 64,
        "num_attention_heads": 4,
        "num_key_value_heads": 2,
        "num_hidden_layers": 2,
        "eos_token_id": [0, 20]
    }));
    let cache_config = KvCacheConfig::from_model_config(&model, DType::F32);
    println!("Cache: {cache_config:?}");

    let backend = Arc::new(CountingBackend {
        config: cache_config,
    });
    let mut session = GenerationSession::for_model(backend, &model);

    let out = session.generate(&[10, 11, 12]).await?;
    println!("Generated: {out:?}");
    println!("Cached sequence length: {}", session.cache().seq_len());

    Ok(())
}
