//! Free-text understanding
//!
//! Pulling an email address and a problem description out of a customer's
//! message is best-effort. It sits behind [`TextUnderstanding`] so a language
//! model can be plugged in while dispatch and correlation stay deterministic.

use crate::config::CapabilityConfig;
use crate::error::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Structured fields extracted from a customer message. Any of them may be
/// empty: extraction fails softly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    /// Customer email address
    pub email: Option<String>,
    /// Search terms describing the problem
    pub keywords: Vec<String>,
    /// Product capability the problem concerns
    pub capability: Option<String>,
    /// One-line problem summary
    pub summary: String,
}

impl Extraction {
    /// Keywords joined for search parameters
    pub fn keyword_query(&self) -> String {
        self.keywords.join(" ")
    }
}

/// Pluggable extraction step
#[async_trait]
pub trait TextUnderstanding: Send + Sync {
    /// Extract structured fields from a customer message
    async fn extract(&self, text: &str) -> Result<Extraction>;
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "but", "not", "are", "was", "were", "been", "has", "have", "had", "with",
    "this", "that", "these", "those", "when", "what", "which", "who", "why", "how", "its", "it's",
    "from", "into", "onto", "just", "any", "all", "can", "cannot", "can't", "does", "doesn't",
    "don't", "didn't", "isn't", "won't", "our", "your", "you", "they", "them", "there", "here",
    "then", "than", "hi", "hello", "hey", "thanks", "thank", "please", "help", "email", "mail",
    "address", "account", "is", "my", "me", "im", "i'm", "it", "on", "in", "to", "of", "at", "a",
    "an", "or", "so", "if", "be", "do", "get", "got", "keeps", "keep", "still", "anymore",
    "again", "some", "very", "really", "also", "after", "before", "since", "today", "now",
];

// Longest first, so "hi there" wins over "hi"
const GREETINGS: &[&str] = &[
    "good afternoon", "good morning", "good evening", "hello there", "hi there", "hey there",
    "greetings", "hello", "hiya", "dear", "hey", "hi",
];

const MAX_KEYWORDS: usize = 8;
const MAX_SUMMARY_CHARS: usize = 120;

/// Deterministic regex/stopword extraction
pub struct HeuristicUnderstanding {
    email: Regex,
    capabilities: Vec<CapabilityConfig>,
}

impl HeuristicUnderstanding {
    /// Create an extractor that recognises the given capabilities
    pub fn new(capabilities: Vec<CapabilityConfig>) -> Self {
        Self {
            email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                .expect("email pattern is valid"),
            capabilities,
        }
    }

    fn words(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-'))
            .map(|w| w.trim_matches(|c: char| c == '\'' || c == '-').to_lowercase())
            .filter(|w| !w.is_empty())
    }

    fn keywords(text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        Self::words(text)
            .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(&w.as_str()))
            .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
            .filter(|w| seen.insert(w.clone()))
            .take(MAX_KEYWORDS)
            .collect()
    }

    fn capability(&self, text: &str) -> Option<String> {
        let words: HashSet<String> = Self::words(text).collect();
        let lowered = text.to_lowercase();
        self.capabilities
            .iter()
            .find(|capability| {
                lowered.contains(&capability.name.to_lowercase())
                    || capability.aliases.iter().any(|alias| words.contains(alias))
            })
            .map(|capability| capability.name.clone())
    }

    /// `sentence` without a leading salutation ("Hi,", "Hello there!")
    fn strip_greeting(sentence: &str) -> &str {
        for greeting in GREETINGS {
            let Some(prefix) = sentence.get(..greeting.len()) else {
                continue;
            };
            let rest = &sentence[greeting.len()..];
            if prefix.eq_ignore_ascii_case(greeting)
                && rest.chars().next().map_or(true, |c| !c.is_alphanumeric())
            {
                return rest.trim_start_matches(|c: char| c == ',' || c == ':' || c.is_whitespace());
            }
        }
        sentence
    }

    fn summary(text: &str) -> String {
        let first = text
            .split_terminator(['.', '!', '?', '\n'])
            .map(|sentence| Self::strip_greeting(sentence.trim()).trim())
            .find(|s| !s.is_empty())
            .unwrap_or("");
        let mut chars = first.chars();
        let mut summary: String = chars.next().map(|c| c.to_uppercase().collect()).unwrap_or_default();
        summary.extend(chars.take(MAX_SUMMARY_CHARS - 1));
        if first.chars().count() > MAX_SUMMARY_CHARS {
            summary.push_str("...");
        }
        summary
    }
}

#[async_trait]
impl TextUnderstanding for HeuristicUnderstanding {
    async fn extract(&self, text: &str) -> Result<Extraction> {
        let email = self
            .email
            .find(text)
            .map(|m| m.as_str().trim_end_matches('.').to_lowercase());
        let without_email = self.email.replace_all(text, " ");

        Ok(Extraction {
            email,
            keywords: Self::keywords(&without_email),
            capability: self.capability(&without_email),
            summary: Self::summary(&without_email),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;

    fn understanding() -> HeuristicUnderstanding {
        HeuristicUnderstanding::new(HubConfig::default().capabilities)
    }

    #[tokio::test]
    async fn test_extracts_email_keywords_and_capability() {
        let text = "Hi, the Export to CSV button just spins forever and never downloads. My email is Sarah@Acme.com.";
        let extraction = understanding().extract(text).await.unwrap();

        assert_eq!(extraction.email.as_deref(), Some("sarah@acme.com"));
        assert_eq!(extraction.capability.as_deref(), Some("CSV Export"));
        assert!(extraction.keywords.contains(&"export".to_string()));
        assert!(extraction.keywords.contains(&"csv".to_string()));
        assert!(extraction.keywords.contains(&"spins".to_string()));
        assert!(!extraction.keywords.iter().any(|k| k.contains("acme")));
        assert!(extraction.keywords.len() <= MAX_KEYWORDS);
        assert_eq!(extraction.summary, "The Export to CSV button just spins forever and never downloads");
    }

    #[tokio::test]
    async fn test_summary_skips_salutations() {
        let understanding = understanding();
        for (text, summary) in [
            (
                "Hi, my dashboard charts show timestamps in the wrong timezone",
                "My dashboard charts show timestamps in the wrong timezone",
            ),
            ("Hello there! SSO login loops back to the sign-in page.", "SSO login loops back to the sign-in page"),
            ("Hey: audit log is empty", "Audit log is empty"),
            ("Hints are missing from the editor", "Hints are missing from the editor"),
        ] {
            assert_eq!(understanding.extract(text).await.unwrap().summary, summary);
        }
    }

    #[tokio::test]
    async fn test_fails_softly_without_email() {
        let extraction = understanding().extract("it's broken").await.unwrap();
        assert_eq!(extraction.email, None);
        assert_eq!(extraction.keywords, vec!["broken".to_string()]);
        assert_eq!(extraction.capability, None);
    }

    #[tokio::test]
    async fn test_empty_text() {
        let extraction = understanding().extract("   ").await.unwrap();
        assert_eq!(extraction, Extraction::default());
    }

    #[tokio::test]
    async fn test_long_summary_is_truncated() {
        let text = "word ".repeat(100);
        let extraction = understanding().extract(&text).await.unwrap();
        assert!(extraction.summary.ends_with("..."));
        assert_eq!(extraction.summary.chars().count(), MAX_SUMMARY_CHARS + 3);
    }

    #[test]
    fn test_keyword_query() {
        let extraction = Extraction {
            keywords: vec!["csv".into(), "export".into()],
            ..Default::default()
        };
        assert_eq!(extraction.keyword_query(), "csv export");
    }
}
