//! Compiled regex cache.
//!
//! Parsers across the workspace (type strings, sort specs, filter keys)
//! share this cache so each pattern is compiled once per process.

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn get_or_compile(&self, pattern: &str) -> std::result::Result<Regex, regex::Error> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(pattern)?;
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(|| RegexCache {
        cache: RwLock::new(HashMap::new()),
    })
}

/// Get a compiled regex for `pattern`, compiling it on first use.
pub fn regex(pattern: &str) -> Result<Regex> {
    regex_cache()
        .get_or_compile(pattern)
        .map_err(|e| Error::Logic(format!("invalid pattern '{}': {}", pattern, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_once_and_reuses() {
        let a = regex(r"^\d+$").unwrap();
        let b = regex(r"^\d+$").unwrap();
        assert!(a.is_match("42"));
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn bad_pattern_is_logic_error() {
        assert!(matches!(regex("("), Err(Error::Logic(_))));
    }
}
