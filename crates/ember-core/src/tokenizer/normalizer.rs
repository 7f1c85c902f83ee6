//! Text normalizers applied before splitting.

use super::config::NormalizerConfig;
use super::pattern::Pattern;
use crate::error::Result;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Pure text-to-text transform.
pub trait Normalize {
    /// Normalize `text`.
    fn normalize(&self, text: &str) -> String;
}

/// Closed set of normalizers.
#[derive(Debug, Clone, Default)]
pub enum Normalizer {
    /// No-op.
    #[default]
    Identity,
    /// Unicode NFC.
    Nfc,
    /// Unicode NFKC.
    Nfkc,
    /// Lowercase.
    Lowercase,
    /// NFD, then drop combining marks.
    StripAccents,
    /// Replace every pattern match.
    Replace {
        /// Pattern.
        pattern: Pattern,
        /// Replacement.
        content: String,
    },
    /// Prepend a fixed string to non-empty text.
    Prepend(String),
    /// Clean, then optionally lowercase and strip accents.
    Bert {
        /// Drop control characters, map whitespace to a space.
        clean_text: bool,
        /// Pad CJK ideographs with spaces.
        handle_chinese_chars: bool,
        /// Strip accents.
        strip_accents: bool,
        /// Lowercase.
        lowercase: bool,
    },
    /// Children in order.
    Sequence(Vec<Normalizer>),
}

impl Normalizer {
    /// Build from an optional config. `None` and unknown types give identity.
    pub fn from_config(config: Option<&NormalizerConfig>) -> Result<Self> {
        let Some(config) = config else {
            return Ok(Normalizer::Identity);
        };

        Ok(match config {
            NormalizerConfig::Nfc => Normalizer::Nfc,
            NormalizerConfig::Nfkc => Normalizer::Nfkc,
            NormalizerConfig::Lowercase => Normalizer::Lowercase,
            NormalizerConfig::StripAccents => Normalizer::StripAccents,
            NormalizerConfig::Replace { pattern, content } => Normalizer::Replace {
                pattern: Pattern::from_config(pattern)?,
                content: content.clone(),
            },
            NormalizerConfig::Prepend { prepend } => Normalizer::Prepend(prepend.clone()),
            NormalizerConfig::BertNormalizer {
                clean_text,
                handle_chinese_chars,
                strip_accents,
                lowercase,
            } => Normalizer::Bert {
                clean_text: *clean_text,
                handle_chinese_chars: *handle_chinese_chars,
                strip_accents: strip_accents.unwrap_or(*lowercase),
                lowercase: *lowercase,
            },
            NormalizerConfig::Sequence { normalizers } => Normalizer::Sequence(
                normalizers
                    .iter()
                    .map(|n| Normalizer::from_config(Some(n)))
                    .collect::<Result<_>>()?,
            ),
            NormalizerConfig::Unknown => {
                tracing::debug!("unknown normalizer type, using identity");
                Normalizer::Identity
            }
        })
    }
}

impl Normalize for Normalizer {
    fn normalize(&self, text: &str) -> String {
        match self {
            Normalizer::Identity => text.to_string(),
            Normalizer::Nfc => text.nfc().collect(),
            Normalizer::Nfkc => text.nfkc().collect(),
            Normalizer::Lowercase => text.to_lowercase(),
            Normalizer::StripAccents => strip_accents(text),
            Normalizer::Replace { pattern, content } => pattern.replace_all(text, content),
            Normalizer::Prepend(prefix) => {
                if text.is_empty() {
                    String::new()
                } else {
                    format!("{prefix}{text}")
                }
            }
            Normalizer::Bert {
                clean_text,
                handle_chinese_chars,
                strip_accents: strip,
                lowercase,
            } => {
                let mut out = text.to_string();
                if *clean_text {
                    out = clean(&out);
                }
                if *handle_chinese_chars {
                    out = pad_chinese_chars(&out);
                }
                if *strip {
                    out = strip_accents(&out);
                }
                if *lowercase {
                    out = out.to_lowercase();
                }
                out
            }
            Normalizer::Sequence(children) => children
                .iter()
                .fold(text.to_string(), |acc, n| n.normalize(&acc)),
        }
    }
}

fn strip_accents(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

fn clean(text: &str) -> String {
    text.chars()
        .filter(|&c| c != '\0' && c != '\u{FFFD}' && !(c.is_control() && !c.is_whitespace()))
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect()
}

fn is_chinese_char(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF
        | 0x3400..=0x4DBF
        | 0x20000..=0x2A6DF
        | 0x2A700..=0x2B73F
        | 0x2B740..=0x2B81F
        | 0x2B820..=0x2CEAF
        | 0xF900..=0xFAFF
        | 0x2F800..=0x2FA1F)
}

fn pad_chinese_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if is_chinese_char(c) {
            out.push(' ');
            out.push(c);
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}
