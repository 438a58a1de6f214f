//! URL patterns identifying traffic that must never be cached.

use serde::{Deserialize, Serialize};
use tracing::trace;
use url::Url;

/// URL pattern for matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPattern {
    /// Pattern type.
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    /// Pattern string.
    pub pattern: String,
}

/// Type of URL pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    /// Exact URL match.
    Exact,
    /// Prefix match.
    Prefix,
    /// Suffix match.
    Suffix,
    /// Contains substring anywhere in the URL.
    Contains,
    /// Hostname equals the pattern or is a subdomain of it.
    Host,
}

impl UrlPattern {
    /// Create an exact match pattern.
    pub fn exact(url: &str) -> Self {
        Self::new(PatternType::Exact, url)
    }

    /// Create a prefix match pattern.
    pub fn prefix(prefix: &str) -> Self {
        Self::new(PatternType::Prefix, prefix)
    }

    /// Create a suffix match pattern.
    pub fn suffix(suffix: &str) -> Self {
        Self::new(PatternType::Suffix, suffix)
    }

    /// Create a contains pattern.
    pub fn contains(substring: &str) -> Self {
        Self::new(PatternType::Contains, substring)
    }

    /// Create a host pattern.
    pub fn host(host: &str) -> Self {
        Self::new(PatternType::Host, host)
    }

    fn new(pattern_type: PatternType, pattern: &str) -> Self {
        Self {
            pattern_type,
            pattern: pattern.to_string(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let url_str = url.as_str();
        match self.pattern_type {
            PatternType::Exact => url_str == self.pattern,
            PatternType::Prefix => url_str.starts_with(&self.pattern),
            PatternType::Suffix => url_str.ends_with(&self.pattern),
            PatternType::Contains => url_str.contains(&self.pattern),
            PatternType::Host => url.host_str().is_some_and(|host| {
                host == self.pattern
                    || host
                        .strip_suffix(self.pattern.as_str())
                        .is_some_and(|rest| rest.ends_with('.'))
            }),
        }
    }
}

/// Requests matching any rule bypass the controller entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusionRules {
    patterns: Vec<UrlPattern>,
}

impl ExclusionRules {
    /// An empty rule set.
    pub fn none() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Create a rule set from patterns.
    pub fn new(patterns: Vec<UrlPattern>) -> Self {
        Self { patterns }
    }

    /// Add a pattern.
    pub fn push(&mut self, pattern: UrlPattern) {
        self.patterns.push(pattern);
    }

    pub fn patterns(&self) -> &[UrlPattern] {
        &self.patterns
    }

    /// The first pattern matching `url`, if any.
    pub fn matching(&self, url: &Url) -> Option<&UrlPattern> {
        let hit = self.patterns.iter().find(|p| p.matches(url));
        if let Some(pattern) = hit {
            trace!(url = %url, pattern = %pattern.pattern, "Excluded from caching");
        }
        hit
    }

    pub fn is_excluded(&self, url: &Url) -> bool {
        self.matching(url).is_some()
    }
}

impl Default for ExclusionRules {
    /// Document database host, the backend brand token and `/api/` paths.
    fn default() -> Self {
        Self::new(vec![
            UrlPattern::contains("firestore.googleapis.com"),
            UrlPattern::contains("firebase"),
            UrlPattern::contains("/api/"),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_url_pattern_exact() {
        let pattern = UrlPattern::exact("https://example.com/");
        assert!(pattern.matches(&url("https://example.com/")));
        assert!(!pattern.matches(&url("https://example.com/other")));
    }

    #[test]
    fn test_url_pattern_prefix_and_suffix() {
        assert!(UrlPattern::prefix("https://example.com/admin")
            .matches(&url("https://example.com/admin/orders.html")));
        assert!(UrlPattern::suffix(".png").matches(&url("https://example.com/icon-192.png")));
    }

    #[test]
    fn test_url_pattern_host() {
        let pattern = UrlPattern::host("googleapis.com");
        assert!(pattern.matches(&url("https://googleapis.com/x")));
        assert!(pattern.matches(&url("https://firestore.googleapis.com/v1/documents")));
        assert!(!pattern.matches(&url("https://notgoogleapis.com/")));
    }

    #[test]
    fn test_default_rules() {
        let rules = ExclusionRules::default();
        assert!(rules.is_excluded(&url(
            "https://firestore.googleapis.com/google.firestore.v1.Firestore/Listen"
        )));
        assert!(rules.is_excluded(&url("https://shop.example.com/api/orders")));
        assert!(rules.is_excluded(&url("https://shop.example.com/__/firebase/init.js")));
        assert!(!rules.is_excluded(&url("https://shop.example.com/products.html")));
    }

    #[test]
    fn test_substring_over_exclusion() {
        // Substring matching also excludes unrelated paths containing the marker.
        let rules = ExclusionRules::default();
        assert!(rules.is_excluded(&url("https://shop.example.com/docs/api/intro.html")));
    }

    #[test]
    fn test_rules_deserialize() {
        let rules: ExclusionRules = serde_json::from_str(
            r#"[{"type":"host","pattern":"googleapis.com"},{"type":"contains","pattern":"/api/"}]"#,
        )
        .unwrap();
        assert_eq!(rules.patterns().len(), 2);
        assert_eq!(rules.patterns()[0].pattern_type, PatternType::Host);
    }
}
