//! Path rule matching for sync scopes
//!
//! Rules are glob patterns by default; a rule starting with `@` is a regular
//! expression matched against the entire path. Paths are `/`-separated
//! relative paths; a backslash anywhere is a caller bug and fails fast.

use globset::{Glob, GlobMatcher};
use regex::Regex;

use crate::error::{Result, UpdateError};

#[derive(Debug)]
enum CompiledRule {
    Glob(GlobMatcher),
    Regex(Regex),
}

/// A compiled set of scope rules, OR-ed together
#[derive(Debug)]
pub struct PathMatcher {
    rules: Vec<CompiledRule>,
}

impl PathMatcher {
    /// Compile a rule list; pattern errors surface here, not at match time.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut rules = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let rule = if let Some(expr) = pattern.strip_prefix('@') {
                // anchored both ends, like a full-path match
                let anchored = format!("^(?:{expr})$");
                let regex = Regex::new(&anchored)
                    .map_err(|e| UpdateError::pattern_error(pattern, e.to_string()))?;
                CompiledRule::Regex(regex)
            } else {
                let glob = Glob::new(pattern)
                    .map_err(|e| UpdateError::pattern_error(pattern, e.to_string()))?;
                CompiledRule::Glob(glob.compile_matcher())
            };
            rules.push(rule);
        }

        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Test a `/`-separated relative path against the rule set.
    ///
    /// An empty rule set matches nothing.
    pub fn matches(&self, path: &str) -> Result<bool> {
        if path.contains('\\') {
            return Err(UpdateError::SeparatorStyle {
                path: path.to_string(),
            });
        }

        for rule in &self.rules {
            let hit = match rule {
                CompiledRule::Glob(glob) => glob.is_match(path),
                CompiledRule::Regex(regex) => regex.is_match(path),
            };
            if hit {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> PathMatcher {
        let patterns: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        PathMatcher::new(&patterns).unwrap()
    }

    #[test]
    fn test_empty_rules_match_nothing() {
        let m = matcher(&[]);
        assert!(!m.matches("anything.txt").unwrap());
    }

    #[test]
    fn test_glob_rules() {
        let m = matcher(&["mods/*.jar"]);
        assert!(m.matches("mods/optifine.jar").unwrap());
        assert!(!m.matches("mods/readme.txt").unwrap());

        let m = matcher(&["config/**"]);
        assert!(m.matches("config/server/options.yml").unwrap());
    }

    #[test]
    fn test_star_crosses_separators() {
        // a bare `*` takes the whole tree, nested paths included
        let m = matcher(&["*"]);
        assert!(m.matches("top.txt").unwrap());
        assert!(m.matches("a/b/c.txt").unwrap());
    }

    #[test]
    fn test_regex_rules_are_anchored() {
        let m = matcher(&["@mods/.+\\.jar"]);
        assert!(m.matches("mods/optifine.jar").unwrap());
        // anchored: a prefix or suffix alone must not match
        assert!(!m.matches("extra/mods/optifine.jar").unwrap());
        assert!(!m.matches("mods/optifine.jar.disabled").unwrap());
    }

    #[test]
    fn test_rules_or_together() {
        let m = matcher(&["a.txt", "@b\\.(yml|yaml)"]);
        assert!(m.matches("a.txt").unwrap());
        assert!(m.matches("b.yaml").unwrap());
        assert!(!m.matches("c.txt").unwrap());
    }

    #[test]
    fn test_backslash_is_fatal() {
        let m = matcher(&["*"]);
        let err = m.matches("a\\b.txt").unwrap_err();
        assert!(matches!(err, UpdateError::SeparatorStyle { .. }));
    }

    #[test]
    fn test_bad_regex_fails_at_compile() {
        let err = PathMatcher::new(&["@[".to_string()]).unwrap_err();
        assert!(matches!(err, UpdateError::Pattern { .. }));
    }
}
