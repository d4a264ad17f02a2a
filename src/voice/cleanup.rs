use tracing::debug;

/// Ordered literal substitutions applied to text before synthesis.
///
/// Each rule replaces every occurrence of its pattern before the next rule
/// runs, so rule order matters. Patterns are plain substrings, not regexes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupRuleSet {
    rules: Vec<(String, String)>,
}

impl CleanupRuleSet {
    pub fn new(rules: Vec<(String, String)>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[(String, String)] {
        &self.rules
    }

    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (pattern, replacement) in &self.rules {
            // An empty pattern would match between every character.
            if pattern.is_empty() {
                continue;
            }
            if out.contains(pattern.as_str()) {
                out = out.replace(pattern.as_str(), replacement);
            }
        }
        debug!(cleaned = %out, "Cleanup applied");
        out
    }
}

impl From<Vec<(String, String)>> for CleanupRuleSet {
    fn from(rules: Vec<(String, String)>) -> Self {
        Self::new(rules)
    }
}
