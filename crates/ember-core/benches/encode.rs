//! Benchmarks for the tokenizer hot path and cache feed assembly.
//!
//! Encoding cost should grow roughly linearly with input length. Feed
//! assembly should stay flat in sequence length since cached tensors are
//! reference counted, not copied.

use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ember_core::model::{names, KvCache, KvCacheConfig};
use ember_core::tokenizer::Tokenizer;
use std::collections::HashMap;

/// Byte-level tokenizer over printable ASCII with a handful of merges.
fn create_tokenizer() -> Tokenizer {
    let table = ember_core::tokenizer::byte_table();
    let mut vocab = serde_json::Map::new();
    let mut next = 0u32;
    for b in 0u8..=255 {
        vocab.insert(table.encode_byte(b).to_string(), next.into());
        next += 1;
    }
    let merges = ["Ġ t", "h e", "Ġt he", "i n", "Ġ a", "e r", "o n", "Ġ s"];
    for m in merges {
        vocab.insert(m.replace(' ', ""), next.into());
        next += 1;
    }

    let json = serde_json::json!({
        "model": { "type": "BPE", "vocab": vocab, "merges": merges },
        "added_tokens": [{ "id": next, "content": "<|endoftext|>", "special": true }],
        "pre_tokenizer": { "type": "ByteLevel", "add_prefix_space": false, "use_regex": true },
        "decoder": { "type": "ByteLevel" }
    });
    Tokenizer::from_value(json).unwrap()
}

fn bench_encode_vs_length(c: &mut Criterion) {
    let tokenizer = create_tokenizer();
    let mut group = c.benchmark_group("encode_vs_length");

    for words in [16, 128, 1024, 4096].iter() {
        let text = "the answer is in the other room ".repeat(*words / 8);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("words", words), &text, |b, text| {
            b.iter(|| black_box(tokenizer.encode(black_box(text))))
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let tokenizer = create_tokenizer();
    let ids = tokenizer.encode(&"the answer is in the other room<|endoftext|>".repeat(64));

    c.bench_function("decode_512", |b| {
        b.iter(|| black_box(tokenizer.decode(black_box(&ids), true)))
    });
}

/// Feed assembly should not depend on how much history is cached.
fn bench_feeds_vs_seq_len(c: &mut Criterion) {
    let mut group = c.benchmark_group("feeds_vs_seq_len");
    group.throughput(Throughput::Elements(1));

    for seq in [1, 64, 512, 2048].iter() {
        let config = KvCacheConfig {
            num_layers: 12,
            num_kv_heads: 4,
            head_dim: 64,
            ..Default::default()
        };
        let mut cache = KvCache::new(config, Device::Cpu);
        let mut present = HashMap::new();
        for i in 0..12 {
            let t = Tensor::zeros((1, 4, *seq, 64), DType::F32, &Device::Cpu).unwrap();
            present.insert(names::present_key(i), t.clone());
            present.insert(names::present_value(i), t);
        }
        cache.update_from_outputs(&present).unwrap();

        group.bench_with_input(BenchmarkId::new("seq", seq), seq, |b, _| {
            b.iter(|| black_box(cache.feed_tensors().unwrap()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_vs_length,
    bench_decode,
    bench_feeds_vs_seq_len,
);
criterion_main!(benches);
