//! URL pattern policy for selective caching.
//!
//! Patterns are shell globs (`*`, `?`, `[abc]`) translated to anchored
//! regular expressions at construction. Excludes always win; an empty
//! include list means every URL is eligible.

use regex::Regex;

use crate::error::{Error, Result};

/// Decides cache eligibility for a URL from include/exclude glob lists.
#[derive(Debug, Clone, Default)]
pub struct UrlMatcher {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl UrlMatcher {
    /// Compiles include and exclude patterns.
    ///
    /// Fails with [`Error::Configuration`] on a pattern that does not
    /// translate into a valid regular expression, so bad policies are
    /// caught at construction.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: compile_all(include)?,
            exclude: compile_all(exclude)?,
        })
    }

    /// Whether a URL should be cached.
    ///
    /// Any exclude match wins. With no includes configured everything
    /// else is cached; otherwise some include must match.
    #[must_use]
    pub fn should_cache(&self, url: &str) -> bool {
        if self.exclude.iter().any(|pattern| pattern.is_match(url)) {
            return false;
        }
        if self.include.is_empty() {
            return true;
        }
        self.include.iter().any(|pattern| pattern.is_match(url))
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(&glob_to_regex(pattern)).map_err(|err| {
                Error::Configuration(format!(
                    "invalid URL pattern '{pattern}': {err}"
                ))
            })
        })
        .collect()
}

/// Translates a shell glob into an anchored regular expression matching
/// the whole URL.
fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' || inner == '^' {
                        class.push('\\');
                    }
                    class.push(inner);
                }
                if closed && !class.is_empty() && class != "^" {
                    regex.push('[');
                    regex.push_str(&class);
                    regex.push(']');
                } else {
                    // Unterminated or empty class matches literally.
                    regex.push_str(&regex::escape("["));
                    regex.push_str(&regex::escape(&class.replace('\\', "")));
                    if closed {
                        regex.push_str(&regex::escape("]"));
                    }
                }
            }
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    regex
}
