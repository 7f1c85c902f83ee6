//! Pre-tokenizers: split normalized text into word-level segments.
//!
//! Segment order is significant; it becomes the order of emitted ids.

use super::byte_level::byte_table;
use super::config::{PreTokenizerConfig, PrependScheme, SplitBehavior};
use super::pattern::Pattern;
use crate::error::Result;
use fancy_regex::Regex;

/// GPT-2 word boundary pattern.
pub const GPT2_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Text to ordered word segments.
pub trait PreTokenize {
    /// Split `text` into segments. `first` is set when `text` starts at
    /// offset 0 of the encoded input.
    fn pre_tokenize_at(&self, text: &str, first: bool) -> Vec<String>;

    /// Split `text` as the start of the input.
    fn pre_tokenize(&self, text: &str) -> Vec<String> {
        self.pre_tokenize_at(text, true)
    }
}

/// Closed set of pre-tokenizers.
#[derive(Debug, Clone, Default)]
pub enum PreTokenizer {
    /// Whole non-empty input as one segment.
    #[default]
    Identity,
    /// GPT-2 split, then byte-to-unicode mapping.
    ByteLevel {
        /// Prefix a single space.
        add_prefix_space: bool,
        /// Split pattern; `None` keeps the whole text as one segment.
        splitter: Option<Regex>,
    },
    /// Split on whitespace runs.
    Whitespace,
    /// Split on a pattern.
    Split {
        /// Separator pattern.
        pattern: Pattern,
        /// Separator handling.
        behavior: SplitBehavior,
        /// Matches are pieces, gaps are separators.
        invert: bool,
    },
    /// Digit splitting.
    Digits {
        /// Every digit on its own.
        individual_digits: bool,
    },
    /// Space marker with split before each marker.
    Metaspace {
        /// Marker character.
        replacement: char,
        /// Which splits get the marker prepended when missing.
        prepend_scheme: PrependScheme,
        /// Split before markers.
        split: bool,
    },
    /// Each child applied to every output of the previous one.
    Sequence(Vec<PreTokenizer>),
}

impl PreTokenizer {
    /// Build from an optional config. `None` and unknown types give identity.
    pub fn from_config(config: Option<&PreTokenizerConfig>) -> Result<Self> {
        let Some(config) = config else {
            return Ok(PreTokenizer::Identity);
        };

        Ok(match config {
            PreTokenizerConfig::ByteLevel {
                add_prefix_space,
                use_regex,
            } => PreTokenizer::ByteLevel {
                add_prefix_space: *add_prefix_space,
                splitter: if *use_regex {
                    Some(Regex::new(GPT2_PATTERN)?)
                } else {
                    None
                },
            },
            PreTokenizerConfig::Whitespace | PreTokenizerConfig::WhitespaceSplit => {
                PreTokenizer::Whitespace
            }
            PreTokenizerConfig::Split {
                pattern,
                behavior,
                invert,
            } => PreTokenizer::Split {
                pattern: Pattern::from_config(pattern)?,
                behavior: *behavior,
                invert: *invert,
            },
            PreTokenizerConfig::Digits { individual_digits } => PreTokenizer::Digits {
                individual_digits: *individual_digits,
            },
            PreTokenizerConfig::Metaspace {
                replacement,
                add_prefix_space,
                prepend_scheme,
                split,
            } => PreTokenizer::Metaspace {
                replacement: replacement.chars().next().unwrap_or('\u{2581}'),
                prepend_scheme: PrependScheme::resolve(
                    *add_prefix_space,
                    prepend_scheme.as_deref(),
                ),
                split: *split,
            },
            PreTokenizerConfig::Sequence { pretokenizers } => PreTokenizer::Sequence(
                pretokenizers
                    .iter()
                    .map(|p| PreTokenizer::from_config(Some(p)))
                    .collect::<Result<_>>()?,
            ),
            PreTokenizerConfig::Unknown => {
                tracing::debug!("unknown pre-tokenizer type, using identity");
                PreTokenizer::Identity
            }
        })
    }

    /// GPT-2 style byte-level pre-tokenizer.
    pub fn byte_level(add_prefix_space: bool) -> Result<Self> {
        Ok(PreTokenizer::ByteLevel {
            add_prefix_space,
            splitter: Some(Regex::new(GPT2_PATTERN)?),
        })
    }
}

impl PreTokenize for PreTokenizer {
    fn pre_tokenize_at(&self, text: &str, first: bool) -> Vec<String> {
        match self {
            PreTokenizer::Identity => non_empty(text),
            PreTokenizer::ByteLevel {
                add_prefix_space,
                splitter,
            } => byte_level_split(text, *add_prefix_space, splitter.as_ref()),
            PreTokenizer::Whitespace => text.split_whitespace().map(str::to_string).collect(),
            PreTokenizer::Split {
                pattern,
                behavior,
                invert,
            } => split_on(text, pattern, *behavior, *invert),
            PreTokenizer::Digits { individual_digits } => {
                if *individual_digits {
                    split_digits(text)
                } else {
                    non_empty(text)
                }
            }
            PreTokenizer::Metaspace {
                replacement,
                prepend_scheme,
                split,
            } => {
                let prepend = match prepend_scheme {
                    PrependScheme::Always => true,
                    PrependScheme::First => first,
                    PrependScheme::Never => false,
                };
                metaspace_split(text, *replacement, prepend, *split)
            }
            PreTokenizer::Sequence(children) => {
                // only the leading segment can still sit at offset 0
                children.iter().fold(non_empty(text), |segments, child| {
                    segments
                        .iter()
                        .enumerate()
                        .flat_map(|(i, s)| child.pre_tokenize_at(s, first && i == 0))
                        .collect()
                })
            }
        }
    }
}

fn non_empty(text: &str) -> Vec<String> {
    if text.is_empty() {
        Vec::new()
    } else {
        vec![text.to_string()]
    }
}

fn byte_level_split(text: &str, add_prefix_space: bool, splitter: Option<&Regex>) -> Vec<String> {
    let table = byte_table();
    let prefixed;
    let text = if add_prefix_space && !text.is_empty() && !text.starts_with(' ') {
        prefixed = format!(" {text}");
        prefixed.as_str()
    } else {
        text
    };

    let Some(re) = splitter else {
        return non_empty(text)
            .iter()
            .map(|s| table.encode_str(s))
            .collect();
    };

    let mut words = Vec::new();
    for m in re.find_iter(text) {
        match m {
            Ok(m) if !m.as_str().is_empty() => words.push(table.encode_str(m.as_str())),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "byte-level split aborted");
                break;
            }
        }
    }
    words
}

fn split_on(text: &str, pattern: &Pattern, behavior: SplitBehavior, invert: bool) -> Vec<String> {
    // (range, is_separator) covering the whole text
    let mut spans = Vec::new();
    let mut last = 0;
    for (start, end) in pattern.find_ranges(text) {
        if last < start {
            spans.push((last, start, invert));
        }
        spans.push((start, end, !invert));
        last = end;
    }
    if last < text.len() {
        spans.push((last, text.len(), invert));
    }

    let mut out: Vec<String> = Vec::new();
    let mut pending_prefix = String::new();
    let mut prev_sep = false;
    for (start, end, is_sep) in spans {
        let piece = &text[start..end];
        match (is_sep, behavior) {
            (true, SplitBehavior::Removed) => {}
            (true, SplitBehavior::Isolated) => out.push(piece.to_string()),
            (true, SplitBehavior::Contiguous) => match out.last_mut() {
                Some(last) if prev_sep => last.push_str(piece),
                _ => out.push(piece.to_string()),
            },
            (true, SplitBehavior::MergedWithPrevious) => match out.last_mut() {
                Some(prev) => prev.push_str(piece),
                None => out.push(piece.to_string()),
            },
            (true, SplitBehavior::MergedWithNext) => pending_prefix.push_str(piece),
            (false, _) => {
                let mut segment = std::mem::take(&mut pending_prefix);
                segment.push_str(piece);
                out.push(segment);
            }
        }
        prev_sep = is_sep;
    }
    if !pending_prefix.is_empty() {
        out.push(pending_prefix);
    }
    out.retain(|s| !s.is_empty());
    out
}

fn split_digits(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            out.push(c.to_string());
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn metaspace_split(text: &str, replacement: char, prepend: bool, split: bool) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut replaced: String = text
        .chars()
        .map(|c| if c == ' ' { replacement } else { c })
        .collect();
    if prepend && !replaced.starts_with(replacement) {
        replaced.insert(0, replacement);
    }
    if !split {
        return vec![replaced];
    }

    let mut out = Vec::new();
    let mut current = String::new();
    for c in replaced.chars() {
        if c == replacement && !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
