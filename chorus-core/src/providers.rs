// ABOUTME: Static provider directory and address pattern matching.
// ABOUTME: Patterns are globs where * matches any substring, anchored at both ends.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Static description of one chat provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    /// Address to open when no chat surface exists yet
    pub base_url: String,
    /// Address that starts a fresh conversation
    pub new_chat_url: String,
    /// Glob patterns recognizing this provider's chat surface
    pub url_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl ProviderInfo {
    /// Whether the address belongs to this provider's chat surface
    pub fn matches(&self, url: &str) -> bool {
        self.url_patterns
            .iter()
            .any(|pattern| url_matches(pattern, url))
    }
}

/// Anchored glob match: `*` matches any substring, everything else is literal.
///
/// Strict enough to exclude sibling paths - a provider's settings or
/// marketplace pages must not be mistaken for the chat surface.
pub fn url_matches(pattern: &str, url: &str) -> bool {
    let escaped: Vec<String> = pattern.split('*').map(|part| regex::escape(part)).collect();
    let anchored = format!("^{}$", escaped.join(".*"));
    match Regex::new(&anchored) {
        Ok(re) => re.is_match(url),
        Err(e) => {
            tracing::warn!(pattern = %pattern, error = %e, "Invalid address pattern");
            false
        }
    }
}

/// Ordered collection of known providers
#[derive(Debug, Clone)]
pub struct ProviderDirectory {
    providers: Vec<ProviderInfo>,
}

impl ProviderDirectory {
    pub fn new(providers: Vec<ProviderInfo>) -> Self {
        Self { providers }
    }

    /// The providers shipped by default
    pub fn builtin() -> Self {
        Self::new(vec![
            ProviderInfo {
                id: "claude".to_string(),
                name: "Claude".to_string(),
                base_url: "https://claude.ai/".to_string(),
                new_chat_url: "https://claude.ai/new".to_string(),
                url_patterns: vec![
                    "https://claude.ai/".to_string(),
                    "https://claude.ai/new".to_string(),
                    "https://claude.ai/chat/*".to_string(),
                ],
                color: Some("#d97757".to_string()),
                icon: Some("claude.svg".to_string()),
            },
            ProviderInfo {
                id: "chatgpt".to_string(),
                name: "ChatGPT".to_string(),
                base_url: "https://chatgpt.com/".to_string(),
                new_chat_url: "https://chatgpt.com/".to_string(),
                url_patterns: vec![
                    "https://chatgpt.com/".to_string(),
                    "https://chatgpt.com/c/*".to_string(),
                ],
                color: Some("#10a37f".to_string()),
                icon: Some("chatgpt.svg".to_string()),
            },
            ProviderInfo {
                id: "gemini".to_string(),
                name: "Gemini".to_string(),
                base_url: "https://gemini.google.com/app".to_string(),
                new_chat_url: "https://gemini.google.com/app".to_string(),
                url_patterns: vec![
                    "https://gemini.google.com/app".to_string(),
                    "https://gemini.google.com/app/*".to_string(),
                ],
                color: Some("#4285f4".to_string()),
                icon: Some("gemini.svg".to_string()),
            },
            ProviderInfo {
                id: "deepseek".to_string(),
                name: "DeepSeek".to_string(),
                base_url: "https://chat.deepseek.com/".to_string(),
                new_chat_url: "https://chat.deepseek.com/".to_string(),
                url_patterns: vec![
                    "https://chat.deepseek.com/".to_string(),
                    "https://chat.deepseek.com/a/chat/*".to_string(),
                ],
                color: Some("#4d6bfe".to_string()),
                icon: Some("deepseek.svg".to_string()),
            },
        ])
    }

    pub fn get(&self, provider_id: &str) -> Option<&ProviderInfo> {
        self.providers.iter().find(|p| p.id == provider_id)
    }

    /// First provider whose patterns match the address
    pub fn provider_for_url(&self, url: &str) -> Option<&ProviderInfo> {
        self.providers.iter().find(|p| p.matches(url))
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderInfo> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl Default for ProviderDirectory {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_matches_chat_path_only() {
        assert!(url_matches(
            "https://chat.example.com/c/*",
            "https://chat.example.com/c/abc123"
        ));
        assert!(!url_matches(
            "https://chat.example.com/c/*",
            "https://chat.example.com/settings"
        ));
    }

    #[test]
    fn test_match_is_anchored() {
        assert!(!url_matches(
            "https://claude.ai/",
            "https://claude.ai/settings"
        ));
        assert!(!url_matches(
            "https://claude.ai/new",
            "evil.example/https://claude.ai/new"
        ));
    }

    #[test]
    fn test_literal_dots_are_not_wildcards() {
        assert!(!url_matches(
            "https://claude.ai/",
            "https://claudeXai/"
        ));
    }

    #[test]
    fn test_multiple_wildcards() {
        assert!(url_matches("https://*.example.com/c/*", "https://chat.example.com/c/1"));
        assert!(!url_matches("https://*.example.com/c/*", "https://chat.example.org/c/1"));
    }

    #[test]
    fn test_provider_matches_any_pattern() {
        let directory = ProviderDirectory::builtin();
        let claude = directory.get("claude").unwrap();

        assert!(claude.matches("https://claude.ai/new"));
        assert!(claude.matches("https://claude.ai/chat/9f8e7d"));
        assert!(!claude.matches("https://claude.ai/settings/profile"));
    }

    #[test]
    fn test_provider_for_url_picks_owner() {
        let directory = ProviderDirectory::builtin();

        let hit = directory
            .provider_for_url("https://chatgpt.com/c/abc")
            .unwrap();
        assert_eq!(hit.id, "chatgpt");

        assert!(directory
            .provider_for_url("https://news.example.com/")
            .is_none());
    }

    #[test]
    fn test_builtin_directory_shape() {
        let directory = ProviderDirectory::builtin();
        assert_eq!(directory.len(), 4);
        assert_eq!(
            directory.ids(),
            vec!["claude", "chatgpt", "gemini", "deepseek"]
        );
    }
}
