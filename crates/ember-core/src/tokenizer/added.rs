//! Added tokens and the literal split that runs before BPE.

use super::config::AddedTokenConfig;
use std::collections::HashMap;

/// A token matched literally in the input, outside BPE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedToken {
    /// Token id.
    pub id: u32,
    /// Literal text.
    pub content: String,
    /// Excluded from decode output by default.
    pub special: bool,
    /// Carried through from the source, not used for matching.
    pub lstrip: bool,
    /// Carried through from the source, not used for matching.
    pub rstrip: bool,
    /// Carried through from the source, not used for matching.
    pub single_word: bool,
}

impl AddedToken {
    /// Create a token with default flags.
    pub fn new(id: u32, content: impl Into<String>, special: bool) -> Self {
        Self {
            id,
            content: content.into(),
            special,
            lstrip: false,
            rstrip: false,
            single_word: false,
        }
    }
}

impl From<AddedTokenConfig> for AddedToken {
    fn from(c: AddedTokenConfig) -> Self {
        Self {
            id: c.id,
            content: c.content,
            special: c.special,
            lstrip: c.lstrip,
            rstrip: c.rstrip,
            single_word: c.single_word,
        }
    }
}

/// A piece of input after the added-token split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    /// Slice of the input.
    pub text: &'a str,
    /// Whether `text` is an added token's content.
    pub is_special: bool,
}

/// Added tokens indexed for matching.
#[derive(Debug, Clone, Default)]
pub struct AddedVocabulary {
    /// Longest content first.
    by_length: Vec<AddedToken>,
    by_content: HashMap<String, u32>,
}

impl AddedVocabulary {
    /// Index `tokens`. Tokens with empty content are ignored.
    pub fn new(tokens: Vec<AddedToken>) -> Self {
        let mut by_length: Vec<AddedToken> =
            tokens.into_iter().filter(|t| !t.content.is_empty()).collect();
        // stable: equal lengths keep source order
        by_length.sort_by(|a, b| b.content.len().cmp(&a.content.len()));

        let mut by_content = HashMap::with_capacity(by_length.len());
        for t in &by_length {
            by_content.entry(t.content.clone()).or_insert(t.id);
        }

        Self {
            by_length,
            by_content,
        }
    }

    /// Id of an added token with exactly this content.
    pub fn id(&self, content: &str) -> Option<u32> {
        self.by_content.get(content).copied()
    }

    /// Tokens, longest content first.
    pub fn tokens(&self) -> &[AddedToken] {
        &self.by_length
    }

    /// Number of added tokens.
    pub fn len(&self) -> usize {
        self.by_length.len()
    }

    /// Whether there are no added tokens.
    pub fn is_empty(&self) -> bool {
        self.by_length.is_empty()
    }

    /// Split `text` around literal added-token occurrences.
    ///
    /// At each position the longest matching content wins. The segments cover
    /// the input in order with no gaps or overlaps.
    pub fn split<'a>(&self, text: &'a str) -> Vec<Segment<'a>> {
        if self.by_length.is_empty() {
            return if text.is_empty() {
                Vec::new()
            } else {
                vec![Segment {
                    text,
                    is_special: false,
                }]
            };
        }

        let mut segments = Vec::new();
        let mut plain_start = 0;
        let mut pos = 0;

        while pos < text.len() {
            let rest = &text[pos..];
            let hit = self
                .by_length
                .iter()
                .find(|t| rest.starts_with(t.content.as_str()));

            match hit {
                Some(token) => {
                    if plain_start < pos {
                        segments.push(Segment {
                            text: &text[plain_start..pos],
                            is_special: false,
                        });
                    }
                    let end = pos + token.content.len();
                    segments.push(Segment {
                        text: &text[pos..end],
                        is_special: true,
                    });
                    pos = end;
                    plain_start = end;
                }
                None => {
                    pos += rest.chars().next().map_or(1, char::len_utf8);
                }
            }
        }

        if plain_start < text.len() {
            segments.push(Segment {
                text: &text[plain_start..],
                is_special: false,
            });
        }

        segments
    }
}
