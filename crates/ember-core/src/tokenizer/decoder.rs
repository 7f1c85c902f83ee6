//! Decoders: token strings back to text.
//!
//! In a [`Decoder::Sequence`] the first child consumes the token list and
//! every later child receives the previous output as a single-element list.

use super::byte_level::byte_table;
use super::config::{DecoderConfig, PrependScheme};
use super::pattern::Pattern;
use crate::error::Result;

/// Token strings to text.
pub trait Decode {
    /// Decode `tokens`.
    fn decode(&self, tokens: &[String]) -> String;
}

/// Closed set of decoders.
#[derive(Debug, Clone, Default)]
pub enum Decoder {
    /// Concatenate.
    #[default]
    Identity,
    /// Reverse the byte table.
    ByteLevel,
    /// Marker back to spaces.
    Metaspace {
        /// Marker.
        replacement: String,
        /// Strip one leading space.
        strip_prefix: bool,
    },
    /// Join continuation pieces.
    WordPiece {
        /// Continuation prefix.
        prefix: String,
        /// Tidy spaces before punctuation and contractions.
        cleanup: bool,
    },
    /// Replace every pattern match.
    Replace {
        /// Pattern.
        pattern: Pattern,
        /// Replacement.
        content: String,
    },
    /// Concatenate.
    Fuse,
    /// Remove up to `start` leading and `stop` trailing occurrences of `content`.
    Strip {
        /// What to strip.
        content: String,
        /// Max leading occurrences.
        start: usize,
        /// Max trailing occurrences.
        stop: usize,
    },
    /// `<0xHH>` runs back to UTF-8.
    ByteFallback,
    /// Compose over strings.
    Sequence(Vec<Decoder>),
}

impl Decoder {
    /// Build from an optional config. `None` and unknown types give identity.
    pub fn from_config(config: Option<&DecoderConfig>) -> Result<Self> {
        let Some(config) = config else {
            return Ok(Decoder::Identity);
        };

        Ok(match config {
            DecoderConfig::ByteLevel => Decoder::ByteLevel,
            DecoderConfig::Metaspace {
                replacement,
                add_prefix_space,
                prepend_scheme,
            } => Decoder::Metaspace {
                replacement: replacement.clone(),
                strip_prefix: PrependScheme::resolve(*add_prefix_space, prepend_scheme.as_deref())
                    != PrependScheme::Never,
            },
            DecoderConfig::WordPiece { prefix, cleanup } => Decoder::WordPiece {
                prefix: prefix.clone(),
                cleanup: *cleanup,
            },
            DecoderConfig::Replace { pattern, content } => Decoder::Replace {
                pattern: Pattern::from_config(pattern)?,
                content: content.clone(),
            },
            DecoderConfig::Fuse => Decoder::Fuse,
            DecoderConfig::Strip {
                content,
                start,
                stop,
            } => Decoder::Strip {
                content: content.clone(),
                start: *start,
                stop: *stop,
            },
            DecoderConfig::ByteFallback => Decoder::ByteFallback,
            DecoderConfig::Sequence { decoders } => Decoder::Sequence(
                decoders
                    .iter()
                    .map(|d| Decoder::from_config(Some(d)))
                    .collect::<Result<_>>()?,
            ),
            DecoderConfig::Unknown => {
                tracing::debug!("unknown decoder type, using identity");
                Decoder::Identity
            }
        })
    }
}

impl Decode for Decoder {
    fn decode(&self, tokens: &[String]) -> String {
        match self {
            Decoder::Identity | Decoder::Fuse => tokens.concat(),
            Decoder::ByteLevel => byte_table().decode_str(&tokens.concat()),
            Decoder::Metaspace {
                replacement,
                strip_prefix,
            } => {
                let mut text = tokens.concat();
                if !replacement.is_empty() {
                    text = text.replace(replacement.as_str(), " ");
                }
                match text.strip_prefix(' ') {
                    Some(rest) if *strip_prefix => rest.to_string(),
                    _ => text,
                }
            }
            Decoder::WordPiece { prefix, cleanup } => {
                let mut out = String::new();
                for (i, token) in tokens.iter().enumerate() {
                    if i == 0 {
                        out.push_str(token);
                    } else if let Some(rest) = token.strip_prefix(prefix.as_str()) {
                        out.push_str(rest);
                    } else {
                        out.push(' ');
                        out.push_str(token);
                    }
                }
                if *cleanup {
                    cleanup_spaces(&out)
                } else {
                    out
                }
            }
            Decoder::Replace { pattern, content } => pattern.replace_all(&tokens.concat(), content),
            Decoder::Strip {
                content,
                start,
                stop,
            } => tokens
                .iter()
                .map(|t| strip_bounded(t, content, *start, *stop))
                .collect(),
            Decoder::ByteFallback => byte_fallback(tokens),
            Decoder::Sequence(children) => {
                let Some((first, rest)) = children.split_first() else {
                    return tokens.concat();
                };
                rest.iter()
                    .fold(first.decode(tokens), |acc, d| d.decode(&[acc]))
            }
        }
    }
}

fn strip_bounded<'a>(token: &'a str, content: &str, start: usize, stop: usize) -> &'a str {
    if content.is_empty() {
        return token;
    }
    let mut s = token;
    for _ in 0..start {
        match s.strip_prefix(content) {
            Some(rest) => s = rest,
            None => break,
        }
    }
    for _ in 0..stop {
        match s.strip_suffix(content) {
            Some(rest) => s = rest,
            None => break,
        }
    }
    s
}

fn cleanup_spaces(text: &str) -> String {
    text.replace(" .", ".")
        .replace(" ?", "?")
        .replace(" !", "!")
        .replace(" ,", ",")
        .replace(" ' ", "'")
        .replace(" n't", "n't")
        .replace(" 'm", "'m")
        .replace(" 's", "'s")
        .replace(" 've", "'ve")
        .replace(" 're", "'re")
}

/// Parse `<0xHH>`.
pub(crate) fn parse_byte_token(token: &str) -> Option<u8> {
    let hex = token.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

fn byte_fallback(tokens: &[String]) -> String {
    let mut out = String::new();
    let mut pending: Vec<u8> = Vec::new();
    for token in tokens {
        match parse_byte_token(token) {
            Some(b) => pending.push(b),
            None => {
                if !pending.is_empty() {
                    out.push_str(&String::from_utf8_lossy(&pending));
                    pending.clear();
                }
                out.push_str(token);
            }
        }
    }
    if !pending.is_empty() {
        out.push_str(&String::from_utf8_lossy(&pending));
    }
    out
}
