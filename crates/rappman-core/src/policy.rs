//! [`WhitelistPolicy`] and the pluggable [`PatternMatcher`] abstraction.
//!
//! The authorization gate never interprets pattern syntax itself; it asks a
//! [`PatternMatcher`] whether a pattern matches a candidate hub identity.
//! That keeps the evaluation-order logic (top-to-bottom, first match wins)
//! independent of whether patterns are globs, regexes or something else.
//!
//! The default [`GlobMatcher`] supports `*` (any run of characters) and `?`
//! (any single character), compiled to anchored regular expressions and
//! cached per pattern.  An invalid pattern never panics: it matches nothing
//! and is logged once when first compiled.

use std::collections::HashMap;
use std::sync::Mutex;

use regex::Regex;
use tracing::warn;

/// Ordered set of hub-identity patterns plus the local-only switch.
///
/// Replaceable wholesale at runtime via
/// [`AuthGate::set_policy`][crate::gate::AuthGate::set_policy].  An empty
/// pattern list with `local_only == false` is the open policy: every remote
/// hub is allowed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhitelistPolicy {
    /// Evaluated top-to-bottom; the first matching pattern allows.
    pub patterns: Vec<String>,
    /// When set, every remote request is denied regardless of patterns.
    pub local_only: bool,
}

impl WhitelistPolicy {
    pub fn new(patterns: Vec<String>, local_only: bool) -> Self {
        Self {
            patterns,
            local_only,
        }
    }

    /// The open policy: remote requests from any hub are allowed.
    pub fn open() -> Self {
        Self::default()
    }

    /// Deny every remote request.
    pub fn local_only() -> Self {
        Self {
            patterns: Vec::new(),
            local_only: true,
        }
    }
}

/// Capability a pattern backend must provide.  Implementations must be
/// cheap to call per request; cache compiled forms internally if needed.
pub trait PatternMatcher: Send + Sync {
    fn matches(&self, pattern: &str, candidate: &str) -> bool;
}

/// Glob-style matcher: `*` and `?` wildcards, everything else literal.
#[derive(Default)]
pub struct GlobMatcher {
    /// pattern → compiled regex, `None` for patterns that failed to compile.
    cache: Mutex<HashMap<String, Option<Regex>>>,
}

impl GlobMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(pattern: &str) -> Option<Regex> {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for c in pattern.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                c => expr.push_str(&regex::escape(&c.to_string())),
            }
        }
        expr.push('$');
        match Regex::new(&expr) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "whitelist pattern failed to compile, it will match nothing");
                None
            }
        }
    }
}

impl PatternMatcher for GlobMatcher {
    fn matches(&self, pattern: &str, candidate: &str) -> bool {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let compiled = cache
            .entry(pattern.to_string())
            .or_insert_with(|| Self::compile(pattern));
        match compiled {
            Some(re) => re.is_match(candidate),
            None => false,
        }
    }
}
