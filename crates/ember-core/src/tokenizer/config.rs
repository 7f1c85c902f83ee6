//! Typed view of the `tokenizer.json` interchange format.
//!
//! ```text
//! {
//!   "model": { "type": "BPE", "vocab": {...}, "merges": [...], "unk_token": ... },
//!   "added_tokens": [{ "id": 0, "content": "<s>", "special": true }, ...],
//!   "normalizer": { "type": "Sequence" | "NFC" | "Replace" | ..., ... },
//!   "pre_tokenizer": { "type": "Sequence" | "ByteLevel" | "Split" | ..., ... },
//!   "decoder": { "type": "Sequence" | "ByteLevel" | "Metaspace" | ..., ... }
//! }
//! ```
//!
//! The three pipeline sections are internally tagged on `type`. Unknown tags
//! deserialize to an `Unknown` variant that builds as identity.

use serde::Deserialize;
use std::collections::HashMap;

/// Root of `tokenizer.json`.
#[derive(Debug, Deserialize)]
pub struct TokenizerFile {
    /// Missing `model` is a load error, so it is optional here.
    #[serde(default)]
    pub model: Option<ModelSection>,
    /// Tokens matched literally before BPE.
    #[serde(default)]
    pub added_tokens: Vec<AddedTokenConfig>,
    /// Text normalization.
    #[serde(default)]
    pub normalizer: Option<NormalizerConfig>,
    /// Word splitting.
    #[serde(default)]
    pub pre_tokenizer: Option<PreTokenizerConfig>,
    /// Token strings back to text.
    #[serde(default)]
    pub decoder: Option<DecoderConfig>,
}

/// `model` section.
#[derive(Debug, Deserialize)]
pub struct ModelSection {
    /// Token string to id.
    #[serde(default)]
    pub vocab: HashMap<String, u32>,
    /// Ordered merge rules, either `"a b"` or `["a", "b"]`.
    #[serde(default)]
    pub merges: Vec<MergeEntry>,
    /// Unknown-token string, resolved against `vocab`.
    #[serde(default)]
    pub unk_token: Option<String>,
    /// Emit `<0xHH>` tokens for subwords missing from the vocabulary.
    #[serde(default)]
    pub byte_fallback: bool,
}

/// One entry of `model.merges`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MergeEntry {
    /// Legacy `"a b"` form.
    Joined(String),
    /// `["a", "b"]` form.
    Pair(String, String),
}

impl MergeEntry {
    /// Split into the left and right halves.
    pub fn into_pair(self) -> Option<(String, String)> {
        match self {
            MergeEntry::Joined(s) => s
                .split_once(' ')
                .map(|(a, b)| (a.to_string(), b.to_string())),
            MergeEntry::Pair(a, b) => Some((a, b)),
        }
    }
}

/// Entry of `added_tokens`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddedTokenConfig {
    /// Token id.
    pub id: u32,
    /// Literal text.
    pub content: String,
    /// Excluded from decode output by default.
    #[serde(default)]
    pub special: bool,
    /// Carried through, not used for matching.
    #[serde(default)]
    pub lstrip: bool,
    /// Carried through, not used for matching.
    #[serde(default)]
    pub rstrip: bool,
    /// Carried through, not used for matching.
    #[serde(default)]
    pub single_word: bool,
    /// Carried through, not used for matching.
    #[serde(default)]
    pub normalized: bool,
}

/// String or regex pattern used by `Replace` and `Split`.
#[derive(Debug, Clone, Deserialize)]
pub enum PatternConfig {
    /// Literal string.
    String(String),
    /// Regular expression.
    Regex(String),
}

/// `normalizer` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum NormalizerConfig {
    /// Unicode NFC.
    #[serde(rename = "NFC")]
    Nfc,
    /// Unicode NFKC.
    #[serde(rename = "NFKC")]
    Nfkc,
    /// Lowercase.
    Lowercase,
    /// Decompose and drop combining marks.
    StripAccents,
    /// Pattern replacement.
    Replace {
        /// What to look for.
        pattern: PatternConfig,
        /// Replacement text.
        #[serde(default)]
        content: String,
    },
    /// Prepend a fixed string.
    Prepend {
        /// Prefix.
        #[serde(default)]
        prepend: String,
    },
    /// Clean text, optionally lowercase and strip accents.
    BertNormalizer {
        /// Drop control characters and map whitespace to spaces.
        #[serde(default = "default_true")]
        clean_text: bool,
        /// Pad CJK ideographs with spaces.
        #[serde(default = "default_true")]
        handle_chinese_chars: bool,
        /// Defaults to `lowercase` when absent.
        #[serde(default)]
        strip_accents: Option<bool>,
        /// Lowercase.
        #[serde(default = "default_true")]
        lowercase: bool,
    },
    /// Apply children in order.
    Sequence {
        /// Children.
        #[serde(default)]
        normalizers: Vec<NormalizerConfig>,
    },
    /// Anything else.
    #[serde(other)]
    Unknown,
}

/// Separator handling for `Split`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum SplitBehavior {
    /// Drop separators.
    #[default]
    Removed,
    /// Keep separators as their own segments.
    Isolated,
    /// Append separators to the preceding segment.
    MergedWithPrevious,
    /// Prepend separators to the following segment.
    MergedWithNext,
    /// Like `Isolated`, with adjacent separators joined into one segment.
    Contiguous,
}

/// `pre_tokenizer` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PreTokenizerConfig {
    /// GPT-2 style split plus byte mapping.
    ByteLevel {
        /// Prefix a single space when the text does not start with one.
        #[serde(default = "default_true")]
        add_prefix_space: bool,
        /// Split with the GPT-2 pattern before mapping.
        #[serde(default = "default_true")]
        use_regex: bool,
    },
    /// Split on whitespace runs.
    Whitespace,
    /// Split on whitespace runs.
    WhitespaceSplit,
    /// Split on a pattern.
    Split {
        /// Separator pattern.
        pattern: PatternConfig,
        /// What happens to separators.
        #[serde(default)]
        behavior: SplitBehavior,
        /// Treat matches as the pieces and the gaps as separators.
        #[serde(default)]
        invert: bool,
    },
    /// Digit splitting.
    Digits {
        /// Every digit becomes its own segment.
        #[serde(default)]
        individual_digits: bool,
    },
    /// SentencePiece-style space marker.
    Metaspace {
        /// Marker replacing spaces.
        #[serde(default = "default_replacement")]
        replacement: String,
        /// Legacy prefix flag.
        #[serde(default)]
        add_prefix_space: Option<bool>,
        /// `always`, `first` or `never`.
        #[serde(default)]
        prepend_scheme: Option<String>,
        /// Split before each marker.
        #[serde(default = "default_true")]
        split: bool,
    },
    /// Apply children in order, flattening.
    Sequence {
        /// Children.
        #[serde(default)]
        pretokenizers: Vec<PreTokenizerConfig>,
    },
    /// Anything else.
    #[serde(other)]
    Unknown,
}

/// `decoder` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum DecoderConfig {
    /// Reverse the byte table.
    ByteLevel,
    /// Marker back to spaces.
    Metaspace {
        /// Marker.
        #[serde(default = "default_replacement")]
        replacement: String,
        /// Legacy prefix flag.
        #[serde(default)]
        add_prefix_space: Option<bool>,
        /// `always`, `first` or `never`.
        #[serde(default)]
        prepend_scheme: Option<String>,
    },
    /// Join continuation pieces.
    WordPiece {
        /// Continuation prefix.
        #[serde(default = "default_wordpiece_prefix")]
        prefix: String,
        /// Tidy spaces before punctuation and contractions.
        #[serde(default = "default_true")]
        cleanup: bool,
    },
    /// Pattern replacement.
    Replace {
        /// What to look for.
        pattern: PatternConfig,
        /// Replacement text.
        #[serde(default)]
        content: String,
    },
    /// Concatenate.
    Fuse,
    /// Bounded stripping of a leading/trailing string.
    Strip {
        /// What to strip.
        #[serde(default = "default_space")]
        content: String,
        /// Max occurrences removed from the start.
        #[serde(default)]
        start: usize,
        /// Max occurrences removed from the end.
        #[serde(default)]
        stop: usize,
    },
    /// `<0xHH>` tokens back to bytes.
    ByteFallback,
    /// Compose decoders.
    Sequence {
        /// Children.
        #[serde(default)]
        decoders: Vec<DecoderConfig>,
    },
    /// Anything else.
    #[serde(other)]
    Unknown,
}

fn default_true() -> bool {
    true
}

fn default_replacement() -> String {
    "\u{2581}".to_string()
}

fn default_wordpiece_prefix() -> String {
    "##".to_string()
}

fn default_space() -> String {
    " ".to_string()
}

/// Where a Metaspace node puts its prefix marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrependScheme {
    /// Every split.
    #[default]
    Always,
    /// Only the split at offset 0 of the input.
    First,
    /// Nowhere.
    Never,
}

impl PrependScheme {
    /// Resolve from the legacy `add_prefix_space` flag and `prepend_scheme`.
    pub fn resolve(add_prefix_space: Option<bool>, scheme: Option<&str>) -> Self {
        match (add_prefix_space, scheme) {
            (Some(false), _) | (_, Some("never")) => PrependScheme::Never,
            (_, Some("first")) => PrependScheme::First,
            _ => PrependScheme::Always,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_merge_forms() {
        let section: ModelSection = serde_json::from_str(
            r#"{ "vocab": {"a": 0}, "merges": ["a b", ["c", "d"]] }"#,
        )
        .unwrap();
        let pairs: Vec<_> = section
            .merges
            .into_iter()
            .filter_map(MergeEntry::into_pair)
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "b".to_string()),
                ("c".to_string(), "d".to_string())
            ]
        );
    }

    #[test]
    fn unknown_types_parse_as_unknown() {
        let n: NormalizerConfig =
            serde_json::from_str(r#"{ "type": "Precompiled", "precompiled_charsmap": "xx" }"#)
                .unwrap();
        assert!(matches!(n, NormalizerConfig::Unknown));

        let p: PreTokenizerConfig =
            serde_json::from_str(r#"{ "type": "Punctuation", "behavior": "Isolated" }"#).unwrap();
        assert!(matches!(p, PreTokenizerConfig::Unknown));

        let d: DecoderConfig = serde_json::from_str(r#"{ "type": "CTC" }"#).unwrap();
        assert!(matches!(d, DecoderConfig::Unknown));
    }

    #[test]
    fn nested_sequence() {
        let n: NormalizerConfig = serde_json::from_str(
            r#"{ "type": "Sequence", "normalizers": [
                { "type": "NFC" },
                { "type": "Replace", "pattern": { "String": " " }, "content": "▁" }
            ] }"#,
        )
        .unwrap();
        match n {
            NormalizerConfig::Sequence { normalizers } => assert_eq!(normalizers.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_model_is_none() {
        let file: TokenizerFile = serde_json::from_str(r#"{ "added_tokens": [] }"#).unwrap();
        assert!(file.model.is_none());
    }

    #[test]
    fn metaspace_prefix_rules() {
        assert_eq!(PrependScheme::resolve(None, None), PrependScheme::Always);
        assert_eq!(PrependScheme::resolve(Some(true), None), PrependScheme::Always);
        assert_eq!(
            PrependScheme::resolve(Some(true), Some("first")),
            PrependScheme::First
        );
        assert_eq!(
            PrependScheme::resolve(Some(false), Some("always")),
            PrependScheme::Never
        );
        assert_eq!(PrependScheme::resolve(None, Some("never")), PrependScheme::Never);
    }
}
