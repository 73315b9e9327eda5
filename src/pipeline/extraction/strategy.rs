//! Ordered, named extraction strategies.
//!
//! Each field keeps a list of `(name, pattern, extractor)` entries tried in
//! order; the first one that yields a value wins. New templates are added as
//! new entries, never as branching logic.

use regex::{Captures, Regex};

/// One way of finding a field in document text.
pub struct Strategy<T> {
    pub name: &'static str,
    pub regex: Regex,
    /// Turns a regex match into a value, or rejects it.
    pub extract: fn(&Captures<'_>) -> Option<T>,
}

impl<T> Strategy<T> {
    pub fn new(name: &'static str, pattern: &str, extract: fn(&Captures<'_>) -> Option<T>) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("Invalid extraction regex pattern"),
            extract,
        }
    }
}

/// A strategy hit: the value and the strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyHit<T> {
    pub strategy: &'static str,
    pub value: T,
}

/// Try strategies in order. Within a strategy every match is tried in reading
/// order before moving on, so a rejected first match does not hide a valid one.
pub fn first_hit<T>(strategies: &[Strategy<T>], text: &str) -> Option<StrategyHit<T>> {
    all_hits(strategies, text).next()
}

/// Every accepted value, strategy order first, then reading order.
/// Lazy: callers that stop early never run the later patterns.
pub fn all_hits<'a, T>(
    strategies: &'a [Strategy<T>],
    text: &'a str,
) -> impl Iterator<Item = StrategyHit<T>> + 'a {
    strategies.iter().flat_map(move |s| {
        s.regex.captures_iter(text).filter_map(move |caps| {
            (s.extract)(&caps).map(|value| StrategyHit {
                strategy: s.name,
                value,
            })
        })
    })
}

/// Capture group 1, trimmed, if non-empty.
pub fn group1(caps: &Captures<'_>) -> Option<String> {
    caps.get(1)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}
