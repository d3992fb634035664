//! Include/exclude name filter built from `name` / `!name` patterns.

use std::collections::HashSet;

/// Exact-match filter. A pattern with an odd number of leading `!` excludes the
/// stripped name, an even number (including zero) includes it.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    include: HashSet<String>,
    exclude: HashSet<String>,
}

impl NameFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let stripped = pattern.trim_start_matches('!');
            let negations = pattern.len() - stripped.len();
            if negations % 2 == 0 {
                filter.include.insert(stripped.to_string());
            } else {
                filter.exclude.insert(stripped.to_string());
            }
        }
        filter
    }

    pub fn matches(&self, name: &str) -> bool {
        if !self.include.is_empty() && !self.include.contains(name) {
            return false;
        }
        !self.exclude.contains(name)
    }
}
