//! Literal or regex patterns shared by replace and split rules.

use super::config::PatternConfig;
use crate::error::Result;
use fancy_regex::Regex;

/// Compiled pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Literal substring.
    Literal(String),
    /// Regular expression.
    Regex(Regex),
}

impl Pattern {
    /// Compile a pattern from its config form.
    pub fn from_config(config: &PatternConfig) -> Result<Self> {
        Ok(match config {
            PatternConfig::String(s) => Pattern::Literal(s.clone()),
            PatternConfig::Regex(r) => Pattern::Regex(Regex::new(r)?),
        })
    }

    /// Byte ranges of all non-overlapping matches, left to right.
    ///
    /// Empty matches are skipped. A regex engine failure ends the scan early.
    pub fn find_ranges(&self, text: &str) -> Vec<(usize, usize)> {
        match self {
            Pattern::Literal(lit) if lit.is_empty() => Vec::new(),
            Pattern::Literal(lit) => text
                .match_indices(lit.as_str())
                .map(|(start, m)| (start, start + m.len()))
                .collect(),
            Pattern::Regex(re) => {
                let mut ranges = Vec::new();
                for m in re.find_iter(text) {
                    match m {
                        Ok(m) if m.start() < m.end() => ranges.push((m.start(), m.end())),
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "regex scan aborted");
                            break;
                        }
                    }
                }
                ranges
            }
        }
    }

    /// Replace every match with `content` (no capture expansion).
    pub fn replace_all(&self, text: &str, content: &str) -> String {
        if let Pattern::Literal(lit) = self {
            if lit.is_empty() {
                return text.to_string();
            }
            return text.replace(lit.as_str(), content);
        }

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for (start, end) in self.find_ranges(text) {
            out.push_str(&text[last..start]);
            out.push_str(content);
            last = end;
        }
        out.push_str(&text[last..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_replace() {
        let p = Pattern::Literal(" ".into());
        assert_eq!(p.replace_all("a b c", "▁"), "a▁b▁c");
    }

    #[test]
    fn regex_replace_does_not_expand_captures() {
        let p = Pattern::from_config(&PatternConfig::Regex(r"(\d+)".into())).unwrap();
        assert_eq!(p.replace_all("a12b3", "$1"), "a$1b$1");
    }

    #[test]
    fn ranges_skip_empty_matches() {
        let p = Pattern::from_config(&PatternConfig::Regex(r"x*".into())).unwrap();
        assert_eq!(p.find_ranges("axxb"), vec![(1, 3)]);
    }

    #[test]
    fn invalid_regex_is_an_error() {
        assert!(Pattern::from_config(&PatternConfig::Regex("(".into())).is_err());
    }
}
