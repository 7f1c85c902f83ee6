//! Vocabulary, merge ranks and the greedy BPE merge loop.

use std::collections::HashMap;

/// Bidirectional token <-> id map. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    token_to_id: HashMap<String, u32>,
    id_to_token: HashMap<u32, String>,
}

impl Vocabulary {
    /// Build from a token -> id map.
    ///
    /// If two tokens share an id, the lexicographically smallest one becomes
    /// the canonical string for that id.
    pub fn new(token_to_id: HashMap<String, u32>) -> Self {
        let mut id_to_token: HashMap<u32, String> = HashMap::with_capacity(token_to_id.len());
        for (token, &id) in &token_to_id {
            match id_to_token.get(&id) {
                Some(existing) if existing <= token => {}
                _ => {
                    id_to_token.insert(id, token.clone());
                }
            }
        }
        Self {
            token_to_id,
            id_to_token,
        }
    }

    /// Id of `token`.
    pub fn id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    /// Canonical string of `id`.
    pub fn token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.token_to_id.len()
    }

    /// Whether the vocabulary is empty.
    pub fn is_empty(&self) -> bool {
        self.token_to_id.is_empty()
    }
}

/// A merge rule; lower rank merges first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRule {
    /// Left symbol.
    pub left: String,
    /// Right symbol.
    pub right: String,
    /// Position in the merge list.
    pub rank: usize,
}

impl MergeRule {
    /// Concatenated result.
    pub fn merged(&self) -> String {
        format!("{}{}", self.left, self.right)
    }
}

/// Ordered merge rules plus a `"left right"` -> rank index.
#[derive(Debug, Clone, Default)]
pub struct MergeTable {
    rules: Vec<MergeRule>,
    ranks: HashMap<String, usize>,
}

impl MergeTable {
    /// Build from ordered pairs. The first occurrence of a pair keeps its rank.
    pub fn new<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut table = Self::default();
        for (left, right) in pairs {
            let rank = table.rules.len();
            table.ranks.entry(pair_key(&left, &right)).or_insert(rank);
            table.rules.push(MergeRule { left, right, rank });
        }
        table
    }

    /// Rank of the pair, if registered.
    pub fn rank(&self, left: &str, right: &str) -> Option<usize> {
        self.ranks.get(&pair_key(left, right)).copied()
    }

    /// Rules in rank order.
    pub fn rules(&self) -> &[MergeRule] {
        &self.rules
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply merges to one word.
    ///
    /// Starts from the word's code points. Each round picks the adjacent pair
    /// with the lowest rank; among equal ranks the leftmost window wins. Stops
    /// when no adjacent pair is registered.
    pub fn merge_word(&self, word: &str) -> Vec<String> {
        let mut symbols: Vec<String> = word.chars().map(String::from).collect();
        if symbols.len() < 2 {
            return symbols;
        }

        loop {
            let mut best: Option<(usize, usize)> = None;
            for i in 0..symbols.len() - 1 {
                if let Some(rank) = self.rank(&symbols[i], &symbols[i + 1]) {
                    // strict < keeps the first minimum
                    if best.map_or(true, |(best_rank, _)| rank < best_rank) {
                        best = Some((rank, i));
                    }
                }
            }

            let Some((_, i)) = best else {
                break;
            };

            let mut merged = Vec::with_capacity(symbols.len() - 1);
            let mut iter = symbols.into_iter().enumerate();
            while let Some((j, sym)) = iter.next() {
                if j == i {
                    if let Some((_, right)) = iter.next() {
                        merged.push(sym + &right);
                        continue;
                    }
                }
                merged.push(sym);
            }
            symbols = merged;

            if symbols.len() < 2 {
                break;
            }
        }

        symbols
    }
}

fn pair_key(left: &str, right: &str) -> String {
    let mut key = String::with_capacity(left.len() + right.len() + 1);
    key.push_str(left);
    key.push(' ');
    key.push_str(right);
    key
}
