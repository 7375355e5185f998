//! Glob matching for path scoping.
//!
//! Patterns support `*` (any run of characters, `/` included) and `?`
//! (exactly one character). Everything else matches literally.

use regex::Regex;

/// Compiled set of glob patterns.
#[derive(Debug, Clone, Default)]
pub struct PathPatterns {
    patterns: Vec<(String, Regex)>,
}

impl PathPatterns {
    /// Compiles a list of glob patterns.
    #[must_use]
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .filter_map(|p| {
                let p = p.as_ref();
                compile_glob(p).map(|re| (p.to_string(), re))
            })
            .collect();
        Self { patterns }
    }

    /// Returns `true` if no patterns are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns `true` if any pattern matches the path.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|(_, re)| re.is_match(path))
    }

    /// Source patterns, in configuration order.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|(p, _)| p.as_str())
    }
}

fn compile_glob(pattern: &str) -> Option<Regex> {
    let mut regex_pattern = String::with_capacity(pattern.len() + 8);
    regex_pattern.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex_pattern.push_str(".*"),
            '?' => regex_pattern.push('.'),
            other => regex_pattern.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    regex_pattern.push('$');

    match Regex::new(&regex_pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(pattern = %pattern, error = %e, "Ignoring invalid path pattern");
            None
        }
    }
}

/// Path scoping for a single strategy.
///
/// `only` takes precedence over `skip` when both are configured; empty
/// lists mean no restriction.
#[derive(Debug, Clone, Default)]
pub struct PathScope {
    only: PathPatterns,
    skip: PathPatterns,
}

impl PathScope {
    /// Builds a scope from `only_paths` and `skip_paths`.
    #[must_use]
    pub fn new(only: &[String], skip: &[String]) -> Self {
        Self {
            only: PathPatterns::new(only),
            skip: PathPatterns::new(skip),
        }
    }

    /// Returns `true` if the path is in scope.
    #[must_use]
    pub fn allows(&self, path: &str) -> bool {
        if !self.only.is_empty() {
            return self.only.matches(path);
        }
        !self.skip.matches(path)
    }
}
