//! URL pattern compilation and first-match routing.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::PatternError;

use super::types::HandlerId;

const WILDCARD: char = '*';
const REGEX_DELIMITER: char = '/';

/// One compiled URL pattern.
#[derive(Debug, Clone)]
pub enum UrlPattern {
    /// `https://example.com/page`
    Exact(String),
    /// `https://example.com/api/*`
    Prefix(String),
    /// `/^https://[^/]+\.example\.com//`
    Regex(Regex),
}

impl UrlPattern {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlPattern::Exact(exact) => url == exact,
            UrlPattern::Prefix(prefix) => url.starts_with(prefix.as_str()),
            UrlPattern::Regex(regex) => regex.is_match(url),
        }
    }
}

impl FromStr for UrlPattern {
    type Err = PatternError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }

        let delimited = raw.len() >= 2
            && raw.starts_with(REGEX_DELIMITER)
            && raw.ends_with(REGEX_DELIMITER);
        if delimited {
            let body = &raw[1..raw.len() - 1];
            if body.is_empty() {
                return Err(PatternError::EmptyRegex);
            }
            return Ok(UrlPattern::Regex(Regex::new(body)?));
        }

        match raw.strip_suffix(WILDCARD) {
            Some(prefix) => Ok(UrlPattern::Prefix(prefix.to_string())),
            None => Ok(UrlPattern::Exact(raw.to_string())),
        }
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlPattern::Exact(exact) => f.write_str(exact),
            UrlPattern::Prefix(prefix) => write!(f, "{prefix}{WILDCARD}"),
            UrlPattern::Regex(regex) => write!(f, "{REGEX_DELIMITER}{}{REGEX_DELIMITER}", regex.as_str()),
        }
    }
}

/// A compiled pattern and the handler that declared it.
#[derive(Debug, Clone)]
pub struct PatternEntry {
    pub pattern: UrlPattern,
    pub handler: HandlerId,
}

/// Flat, ordered list of every handler's patterns.
///
/// Resolution is first match wins, in handler registration order and then
/// declaration order. There is no specificity ranking: a broad pattern
/// registered early shadows a narrower one registered later.
#[derive(Debug, Clone, Default)]
pub struct PatternRouter {
    entries: Vec<PatternEntry>,
}

impl PatternRouter {
    pub fn build<'a, I>(handlers: I) -> Self
    where
        I: IntoIterator<Item = (HandlerId, &'a [UrlPattern])>,
    {
        let entries = handlers
            .into_iter()
            .flat_map(|(handler, patterns)| {
                patterns.iter().map(move |pattern| PatternEntry {
                    pattern: pattern.clone(),
                    handler,
                })
            })
            .collect();
        Self { entries }
    }

    /// Handler owning the first pattern matching `url`. With `restrict_to`,
    /// only that handler's patterns are eligible.
    pub fn resolve(&self, url: &str, restrict_to: Option<HandlerId>) -> Option<HandlerId> {
        self.entries
            .iter()
            .filter(|entry| restrict_to.is_none_or(|only| entry.handler == only))
            .find(|entry| entry.pattern.matches(url))
            .map(|entry| entry.handler)
    }

    pub fn entries(&self) -> &[PatternEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
