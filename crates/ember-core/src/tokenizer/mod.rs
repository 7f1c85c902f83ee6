//! Tokenizer for text-to-token and token-to-text conversion.
//!
//! Reads the `tokenizer.json` interchange format and runs the pipeline:
//!
//! ```text
//! text → Normalizer → added-token split → PreTokenizer → BPE → ids
//! ids  → tokens → Decoder → text
//! ```
//!
//! # Example
//!
//! ```rust
//! use ember_core::tokenizer::Tokenizer;
//! use serde_json::json;
//!
//! let tokenizer = Tokenizer::from_value(json!({
//!     "model": {
//!         "vocab": { "h": 0, "e": 1, "he": 2 },
//!         "merges": ["h e"]
//!     },
//!     "added_tokens": [{ "id": 3, "content": "</s>", "special": true }]
//! }))
//! .unwrap();
//!
//! assert_eq!(tokenizer.encode("he</s>"), vec![2, 3]);
//! assert_eq!(tokenizer.decode(&[2, 3], true), "he");
//! ```

mod added;
mod bpe;
mod byte_level;
pub mod config;
mod decoder;
mod normalizer;
mod pattern;
mod pre_tokenizer;

pub use added::{AddedToken, AddedVocabulary, Segment};
pub use bpe::{MergeRule, MergeTable, Vocabulary};
pub use byte_level::{byte_table, ByteTable};
pub use decoder::{Decode, Decoder};
pub use normalizer::{Normalize, Normalizer};
pub use pattern::Pattern;
pub use pre_tokenizer::{PreTokenize, PreTokenizer, GPT2_PATTERN};

use crate::error::{EmberError, Result};
use config::TokenizerFile;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Contents recognized as BOS when inferring special ids.
pub const BOS_ALIASES: &[&str] = &["<s>", "<bos>", "<|begin|>", "<|startoftext|>", "<|begin_of_text|>"];
/// Contents recognized as EOS when inferring special ids.
pub const EOS_ALIASES: &[&str] = &["</s>", "<eos>", "<|end|>", "<|endoftext|>", "<|end_of_text|>"];
/// Contents recognized as PAD when inferring special ids.
pub const PAD_ALIASES: &[&str] = &["<pad>", "<|pad|>", "[PAD]", "<|padding|>"];

/// BPE tokenizer built from a `tokenizer.json` document.
#[derive(Clone)]
pub struct Tokenizer {
    vocab: Vocabulary,
    merges: MergeTable,
    added: AddedVocabulary,
    /// Reverse map for added tokens missing from `vocab`.
    added_by_id: HashMap<u32, String>,
    special_ids: HashSet<u32>,
    unk_token: Option<String>,
    unk_token_id: Option<u32>,
    byte_fallback: bool,
    normalizer: Normalizer,
    pre_tokenizer: PreTokenizer,
    decoder: Decoder,
    bos_token_id: Option<u32>,
    eos_token_id: Option<u32>,
    pad_token_id: Option<u32>,
}

impl Tokenizer {
    /// Load from a parsed JSON document.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let file: TokenizerFile = serde_json::from_value(value)?;
        Self::from_parsed(file)
    }

    /// Load from raw UTF-8 JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let file: TokenizerFile = serde_json::from_slice(bytes)?;
        Self::from_parsed(file)
    }

    /// Load from a tokenizer.json file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_slice(&bytes)
    }

    /// Load from a model directory.
    ///
    /// Looks for tokenizer.json in the directory.
    pub fn from_dir<P: AsRef<Path>>(model_dir: P) -> Result<Self> {
        let tokenizer_path = model_dir.as_ref().join("tokenizer.json");
        if !tokenizer_path.exists() {
            return Err(EmberError::MalformedTokenizer(format!(
                "tokenizer.json not found in {}",
                model_dir.as_ref().display()
            )));
        }
        Self::from_file(tokenizer_path)
    }

    /// Build from a deserialized document.
    pub fn from_parsed(file: TokenizerFile) -> Result<Self> {
        let model = file
            .model
            .ok_or_else(|| EmberError::MalformedTokenizer("missing `model` section".into()))?;

        let mut pairs = Vec::with_capacity(model.merges.len());
        for (i, entry) in model.merges.into_iter().enumerate() {
            let pair = entry.clone().into_pair().ok_or_else(|| {
                EmberError::MalformedTokenizer(format!("merge #{i} is not a pair: {entry:?}"))
            })?;
            pairs.push(pair);
        }

        let vocab = Vocabulary::new(model.vocab);
        let merges = MergeTable::new(pairs);

        let tokens: Vec<AddedToken> = file.added_tokens.into_iter().map(AddedToken::from).collect();
        let special_ids: HashSet<u32> = tokens.iter().filter(|t| t.special).map(|t| t.id).collect();
        let added_by_id: HashMap<u32, String> = tokens
            .iter()
            .map(|t| (t.id, t.content.clone()))
            .collect();
        let added = AddedVocabulary::new(tokens);

        let normalizer = Normalizer::from_config(file.normalizer.as_ref())?;
        let pre_tokenizer = PreTokenizer::from_config(file.pre_tokenizer.as_ref())?;
        let decoder = Decoder::from_config(file.decoder.as_ref())?;

        let mut tokenizer = Self {
            vocab,
            merges,
            added,
            added_by_id,
            special_ids,
            unk_token: model.unk_token,
            unk_token_id: None,
            byte_fallback: model.byte_fallback,
            normalizer,
            pre_tokenizer,
            decoder,
            bos_token_id: None,
            eos_token_id: None,
            pad_token_id: None,
        };

        tokenizer.unk_token_id = tokenizer
            .unk_token
            .as_deref()
            .and_then(|t| tokenizer.token_to_id(t));
        if tokenizer.unk_token.is_some() && tokenizer.unk_token_id.is_none() {
            tracing::debug!(unk = ?tokenizer.unk_token, "unk token not in vocabulary");
        }
        tokenizer.bos_token_id = tokenizer.first_alias(BOS_ALIASES);
        tokenizer.eos_token_id = tokenizer.first_alias(EOS_ALIASES);
        tokenizer.pad_token_id = tokenizer.first_alias(PAD_ALIASES);

        tracing::debug!(
            vocab = tokenizer.vocab.len(),
            merges = tokenizer.merges.len(),
            added = tokenizer.added.len(),
            bos = ?tokenizer.bos_token_id,
            eos = ?tokenizer.eos_token_id,
            "tokenizer loaded"
        );

        Ok(tokenizer)
    }

    fn first_alias(&self, aliases: &[&str]) -> Option<u32> {
        aliases.iter().find_map(|a| self.token_to_id(a))
    }

    /// Encode text to token IDs.
    ///
    /// Subwords missing from the vocabulary become byte tokens (when byte
    /// fallback is enabled), then the unk id, and are otherwise dropped.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        if text.is_empty() {
            return Vec::new();
        }

        let normalized = self.normalizer.normalize(text);
        let mut ids = Vec::new();

        for (i, segment) in self.added.split(&normalized).into_iter().enumerate() {
            if segment.is_special {
                match self.added.id(segment.text) {
                    Some(id) => ids.push(id),
                    None => tracing::debug!(segment = segment.text, "dropping unmatched special segment"),
                }
                continue;
            }

            // segments are contiguous, so only the first starts at offset 0
            for word in self.pre_tokenizer.pre_tokenize_at(segment.text, i == 0) {
                for piece in self.merges.merge_word(&word) {
                    self.push_piece(&piece, &mut ids);
                }
            }
        }

        ids
    }

    fn push_piece(&self, piece: &str, ids: &mut Vec<u32>) {
        if let Some(id) = self.vocab.id(piece) {
            ids.push(id);
            return;
        }

        if self.byte_fallback {
            let bytes: Option<Vec<u32>> = piece
                .bytes()
                .map(|b| self.vocab.id(&format!("<0x{b:02X}>")))
                .collect();
            if let Some(bytes) = bytes {
                ids.extend(bytes);
                return;
            }
        }

        match self.unk_token_id {
            Some(unk) => {
                tracing::trace!(piece, "subword not in vocabulary, using unk");
                ids.push(unk);
            }
            None => tracing::debug!(piece, "dropping subword not in vocabulary"),
        }
    }

    /// Decode token IDs to text.
    ///
    /// # Arguments
    ///
    /// * `ids` - Token IDs to decode
    /// * `skip_special` - Whether to skip special tokens
    ///
    /// Ids unknown to both the vocabulary and the added tokens are skipped.
    pub fn decode(&self, ids: &[u32], skip_special: bool) -> String {
        if ids.is_empty() {
            return String::new();
        }

        let tokens: Vec<String> = ids
            .iter()
            .filter(|&&id| !(skip_special && self.special_ids.contains(&id)))
            .filter_map(|&id| {
                let token = self.id_to_token(id);
                if token.is_none() {
                    tracing::debug!(id, "skipping unknown id");
                }
                token.map(str::to_string)
            })
            .collect();

        self.decoder.decode(&tokens)
    }

    /// Decode a single token to text.
    pub fn decode_token(&self, id: u32) -> String {
        self.decode(&[id], false)
    }

    /// String to token ID: vocabulary first, then added tokens.
    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.vocab.id(token).or_else(|| self.added.id(token))
    }

    /// Token ID to string: vocabulary first, then added tokens.
    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.vocab
            .token(id)
            .or_else(|| self.added_by_id.get(&id).map(String::as_str))
    }

    /// Get vocabulary size, counting added tokens outside the vocabulary.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
            + self
                .added_by_id
                .keys()
                .filter(|id| self.vocab.token(**id).is_none())
                .count()
    }

    /// Check if a token ID belongs to a special added token.
    pub fn is_special_token(&self, id: u32) -> bool {
        self.special_ids.contains(&id)
    }

    /// Added tokens, longest content first.
    pub fn added_tokens(&self) -> &[AddedToken] {
        self.added.tokens()
    }

    /// Merge rules in rank order.
    pub fn merges(&self) -> &MergeTable {
        &self.merges
    }

    /// Unknown token ID.
    pub fn unk_token_id(&self) -> Option<u32> {
        self.unk_token_id
    }

    /// Get BOS token ID.
    pub fn bos_token_id(&self) -> Option<u32> {
        self.bos_token_id
    }

    /// Get EOS token ID.
    pub fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }

    /// Get PAD token ID.
    pub fn pad_token_id(&self) -> Option<u32> {
        self.pad_token_id
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("vocab_size", &self.vocab_size())
            .field("merges", &self.merges.len())
            .field("bos_token_id", &self.bos_token_id)
            .field("eos_token_id", &self.eos_token_id)
            .field("pad_token_id", &self.pad_token_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn toy() -> Tokenizer {
        Tokenizer::from_value(json!({
            "model": {
                "vocab": {
                    "h": 0, "e": 1, "l": 2, "o": 3, "w": 4, "r": 5, "d": 6, " ": 7,
                    "he": 8, "ll": 9, "lo": 10, "wo": 11, "rl": 12, "hel": 13, "wor": 14
                },
                "merges": ["h e", "l l", "l o", "w o", "r l", "he l", "wo r"]
            },
            "added_tokens": [
                { "id": 100, "content": "<s>", "special": true },
                { "id": 101, "content": "</s>", "special": true }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn encode_merges() {
        let t = toy();
        assert_eq!(t.encode("he"), vec![8]);
        assert_eq!(t.encode("hel"), vec![13]);
        assert_eq!(t.encode("he d"), vec![8, 7, 6]);
    }

    #[test]
    fn encode_empty() {
        assert!(toy().encode("").is_empty());
        assert_eq!(toy().decode(&[], false), "");
    }

    #[test]
    fn special_tokens_literal() {
        let t = toy();
        assert_eq!(t.encode("<s>he</s>"), vec![100, 8, 101]);
        assert_eq!(t.decode(&[100, 8, 101], true), "he");
        assert_eq!(t.decode(&[100, 8, 101], false), "<s>he</s>");
    }

    #[test]
    fn inferred_special_ids() {
        let t = toy();
        assert_eq!(t.bos_token_id(), Some(100));
        assert_eq!(t.eos_token_id(), Some(101));
        assert_eq!(t.pad_token_id(), None);
        assert!(t.is_special_token(101));
        assert!(!t.is_special_token(8));
    }

    #[test]
    fn token_lookup_falls_back_to_added() {
        let t = toy();
        assert_eq!(t.token_to_id("wor"), Some(14));
        assert_eq!(t.token_to_id("</s>"), Some(101));
        assert_eq!(t.token_to_id("nope"), None);
        assert_eq!(t.id_to_token(100), Some("<s>"));
        assert_eq!(t.vocab_size(), 17);
    }

    #[test]
    fn unmapped_subwords_are_dropped_without_unk() {
        let t = toy();
        // "x" and "z" are not in the vocabulary
        assert_eq!(t.encode("hxez"), vec![0, 1]);
    }

    #[test]
    fn unmapped_subwords_use_unk() {
        let t = Tokenizer::from_value(json!({
            "model": {
                "vocab": { "<unk>": 0, "a": 1 },
                "merges": [],
                "unk_token": "<unk>"
            }
        }))
        .unwrap();
        assert_eq!(t.unk_token_id(), Some(0));
        assert_eq!(t.encode("abz"), vec![1, 0, 0]);
    }

    #[test]
    fn decode_skips_unknown_ids() {
        let t = toy();
        assert_eq!(t.decode(&[8, 999, 9, 3], false), "hello");
    }

    #[test]
    fn missing_model_is_malformed() {
        let err = Tokenizer::from_value(json!({ "added_tokens": [] })).unwrap_err();
        assert!(matches!(err, EmberError::MalformedTokenizer(_)));
    }

    #[test]
    fn bad_merge_is_malformed() {
        let err = Tokenizer::from_value(json!({
            "model": { "vocab": {}, "merges": ["nospace"] }
        }))
        .unwrap_err();
        assert!(matches!(err, EmberError::MalformedTokenizer(_)));
    }

    #[test]
    fn from_slice_parses_bytes() {
        let bytes = br#"{ "model": { "vocab": { "a": 0 }, "merges": [] } }"#;
        let t = Tokenizer::from_slice(bytes).unwrap();
        assert_eq!(t.encode("aa"), vec![0, 0]);
    }

    #[test]
    fn invalid_json_is_serde_error() {
        let err = Tokenizer::from_slice(b"{ not json").unwrap_err();
        assert!(matches!(err, EmberError::SerdeError(_)));
    }

    fn byte_level() -> Tokenizer {
        let table = byte_table();
        let mut vocab = serde_json::Map::new();
        for b in 0..=255u8 {
            vocab.insert(table.encode_byte(b).to_string(), json!(b as u32));
        }
        vocab.insert("Ġw".into(), json!(256));
        vocab.insert("Ġwo".into(), json!(257));
        vocab.insert("<|endoftext|>".into(), json!(258));
        Tokenizer::from_value(json!({
            "model": { "vocab": vocab, "merges": ["Ġ w", "Ġw o"] },
            "added_tokens": [{ "id": 258, "content": "<|endoftext|>", "special": true }],
            "normalizer": { "type": "NFC" },
            "pre_tokenizer": { "type": "ByteLevel", "add_prefix_space": false, "trim_offsets": true },
            "decoder": { "type": "ByteLevel" }
        }))
        .unwrap()
    }

    #[test]
    fn byte_level_pipeline() {
        let t = byte_level();
        let ids = t.encode("a wo<|endoftext|>");
        assert_eq!(ids, vec![b'a' as u32, 257, 258]);
        assert_eq!(t.decode(&ids, true), "a wo");
        assert_eq!(t.eos_token_id(), Some(258));
    }

    #[test]
    fn byte_level_round_trip_multibyte() {
        let t = byte_level();
        let text = "héllo wörld 中文\n\ttabs";
        assert_eq!(t.decode(&t.encode(text), true), text);
    }

    #[test]
    fn whitespace_round_trip_single_word() {
        let t = Tokenizer::from_value(json!({
            "model": { "vocab": { "a": 0, "b": 1, "ab": 2 }, "merges": ["a b"] },
            "pre_tokenizer": { "type": "Whitespace" }
        }))
        .unwrap();
        assert_eq!(t.encode("abba"), vec![2, 1, 0]);
        assert_eq!(t.decode(&t.encode("abba"), true), "abba");
    }

    #[test]
    fn byte_fallback_encodes_missing_chars() {
        let t = Tokenizer::from_value(json!({
            "model": {
                "vocab": { "<unk>": 0, "<0xC3>": 1, "<0xA9>": 2, "▁a": 3, "▁": 4, "a": 5 },
                "merges": ["▁ a"],
                "unk_token": "<unk>",
                "byte_fallback": true
            },
            "normalizer": { "type": "Sequence", "normalizers": [
                { "type": "Prepend", "prepend": "▁" },
                { "type": "Replace", "pattern": { "String": " " }, "content": "▁" }
            ] },
            "decoder": { "type": "Sequence", "decoders": [
                { "type": "ByteFallback" },
                { "type": "Replace", "pattern": { "String": "▁" }, "content": " " },
                { "type": "Fuse" },
                { "type": "Strip", "content": " ", "start": 1, "stop": 0 }
            ] }
        }))
        .unwrap();

        let ids = t.encode("a é");
        assert_eq!(ids, vec![3, 4, 1, 2]);
        assert_eq!(t.decode(&ids, true), "a é");
        // no byte token for 'z', so unk
        assert_eq!(t.encode("z"), vec![4, 0]);
    }

    fn metaspace_first(scheme: &str) -> Tokenizer {
        Tokenizer::from_value(json!({
            "model": {
                "vocab": { "▁hi": 0, "hi": 1, "▁": 2, "h": 3, "i": 4 },
                "merges": ["h i", "▁ hi"]
            },
            "added_tokens": [{ "id": 9, "content": "</s>", "special": true }],
            "pre_tokenizer": { "type": "Metaspace", "prepend_scheme": scheme }
        }))
        .unwrap()
    }

    #[test]
    fn metaspace_first_prefixes_only_input_start() {
        let t = metaspace_first("first");
        assert_eq!(t.encode("hi</s>hi"), vec![0, 9, 1]);
        assert_eq!(t.encode("</s>hi"), vec![9, 1]);
        assert_eq!(t.encode("hi"), vec![0]);

        let t = metaspace_first("always");
        assert_eq!(t.encode("hi</s>hi"), vec![0, 9, 0]);
    }

    #[test]
    fn normalization_happens_before_added_split() {
        let t = Tokenizer::from_value(json!({
            "model": { "vocab": { "a": 0 }, "merges": [] },
            "added_tokens": [{ "id": 9, "content": "<eos>", "special": true }],
            "normalizer": { "type": "Lowercase" }
        }))
        .unwrap();
        assert_eq!(t.encode("A<EOS>"), vec![0, 9]);
    }
}
