//! `LIKE` pattern matching backed by cached regular expressions.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use regex::Regex;

/// Thread-safe cache of compiled `LIKE` patterns.
///
/// Patterns are compiled on first use and kept for the lifetime of the
/// program.
struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compile(&self, like: &str) -> Result<Regex, regex::Error> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(regex) = cache.get(like) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(&like_to_regex(like))?;
        {
            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            cache.insert(like.to_string(), regex.clone());
        }
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(RegexCache::new)
}

/// Translate a SQL `LIKE` pattern into an anchored regular expression.
///
/// `%` matches any run of characters, `_` exactly one, and `\` escapes the
/// next character.
pub fn like_to_regex(like: &str) -> String {
    let mut out = String::with_capacity(like.len() + 8);
    out.push_str("(?s)^");
    let mut chars = like.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

/// Check whether `value` matches the `LIKE` pattern.
///
/// An uncompilable pattern is logged and treated as a non-match.
pub fn like_matches(value: &str, like: &str) -> bool {
    match regex_cache().get_or_compile(like) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = like,
                error = %e,
                "Invalid LIKE pattern, treating as non-match"
            );
            false
        }
    }
}
