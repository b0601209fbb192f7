//! Line-based regex pattern lists.
//!
//! Every classification decision in this crate — which headers to ignore,
//! which variable names look swappable, which values look like identifiers —
//! bottoms out in one of these lists. A pattern file holds one regex per
//! non-empty, non-`!`-prefixed line; order is significant for
//! [`PatternList::matching_rule`], which returns the earliest match.

use regex::Regex;
use tracing::{debug, warn};

use crate::error::Result;

/// Whether a pattern must match starting at the beginning of the text
/// (`Match`, mirroring Python's `re.match`) or anywhere within it
/// (`Search`, mirroring `re.search`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Match,
    Search,
}

/// An ordered list of compiled regexes loaded from a pattern file.
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    rules: Vec<Regex>,
}

impl PatternList {
    /// Build a pattern list from in-memory lines. Lines that are blank or
    /// start with `!` are comments and are skipped; lines that fail to
    /// compile as regexes are skipped with a warning rather than aborting
    /// the whole list, matching how the teacher's WAF pattern loader treats
    /// a bad custom rule.
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut rules = Vec::new();

        for raw in lines {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('!') {
                continue;
            }

            match Regex::new(line) {
                Ok(re) => rules.push(re),
                Err(e) => warn!(pattern = line, error = %e, "failed to compile pattern, skipping"),
            }
        }

        debug!(count = rules.len(), "loaded pattern list");
        Ok(Self { rules })
    }

    /// Load a pattern list from a file on disk.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_lines(content.lines())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Does any rule match `text` under the given mode?
    pub fn matches(&self, text: &str, mode: Mode) -> bool {
        self.rules.iter().any(|re| match mode {
            Mode::Search => re.is_match(text),
            Mode::Match => re
                .find(text)
                .map(|m| m.start() == 0)
                .unwrap_or(false),
        })
    }

    /// The source of the first matching rule, in file order. `full` requires
    /// the match to span the entire text (Python's `re.fullmatch`);
    /// otherwise any match anywhere in the text counts (`re.search`).
    pub fn matching_rule(&self, text: &str, full: bool) -> Option<&str> {
        for re in &self.rules {
            let hit = if full {
                re.find(text)
                    .map(|m| m.start() == 0 && m.end() == text.len())
                    .unwrap_or(false)
            } else {
                re.is_match(text)
            };

            if hit {
                return Some(re.as_str());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_comments_and_blanks() {
        let list = PatternList::from_lines(["!comment", "", "foo.*"]).unwrap();
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn match_mode_anchors_at_start() {
        let list = PatternList::from_lines(["abc"]).unwrap();
        assert!(list.matches("abcdef", Mode::Match));
        assert!(!list.matches("xabc", Mode::Match));
        assert!(list.matches("xabc", Mode::Search));
    }

    #[test]
    fn matching_rule_returns_first_in_file_order() {
        let list = PatternList::from_lines(["session.*", "token.*"]).unwrap();
        assert_eq!(list.matching_rule("session_id", false), Some("session.*"));
        assert_eq!(list.matching_rule("token_value", false), Some("token.*"));
        assert_eq!(list.matching_rule("nothing", false), None);
    }

    #[test]
    fn full_match_requires_whole_string() {
        let list = PatternList::from_lines(["id"]).unwrap();
        assert_eq!(list.matching_rule("id", true), Some("id"));
        assert_eq!(list.matching_rule("identity", true), None);
        assert_eq!(list.matching_rule("identity", false), Some("id"));
    }

    #[test]
    fn invalid_regex_is_skipped_not_fatal() {
        let list = PatternList::from_lines(["valid", "(unterminated"]).unwrap();
        assert_eq!(list.len(), 1);
    }
}
