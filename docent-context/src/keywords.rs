//! Frequency-based keyword extraction for document sections.
//!
//! Keywords are the most frequent non-stopword terms of a section's title and
//! body. Each term carries an importance in `(0, 1]`: its count divided by the
//! count of the most frequent term in the same section.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// English stopwords removed before counting.
pub const ENGLISH_STOPWORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've",
    "you'll", "you'd", "your", "yours", "yourself", "yourselves", "he", "him", "his", "himself",
    "she", "she's", "her", "hers", "herself", "it", "it's", "its", "itself", "they", "them",
    "their", "theirs", "themselves", "what", "which", "who", "whom", "this", "that", "that'll",
    "these", "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "having", "do", "does", "did", "doing", "a", "an", "the", "and", "but", "if", "or",
    "because", "as", "until", "while", "of", "at", "by", "for", "with", "about", "against",
    "between", "into", "through", "during", "before", "after", "above", "below", "to", "from",
    "up", "down", "in", "out", "on", "off", "over", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "s", "t", "can", "will", "just", "don", "don't", "should", "should've", "now",
    "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "aren't", "couldn", "couldn't", "didn",
    "didn't", "doesn", "doesn't", "hadn", "hadn't", "hasn", "hasn't", "haven", "haven't", "isn",
    "isn't", "ma", "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't", "shan",
    "shan't", "shouldn", "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't",
    "wouldn", "wouldn't",
];

fn stopwords() -> &'static HashSet<&'static str> {
    static STOPWORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    STOPWORDS.get_or_init(|| ENGLISH_STOPWORDS.iter().copied().collect())
}

fn punctuation() -> &'static Regex {
    static PUNCTUATION: OnceLock<Regex> = OnceLock::new();
    PUNCTUATION.get_or_init(|| Regex::new(r"[^\w\s]").expect("punctuation pattern is valid"))
}

/// Tuning knobs for [`KeywordExtractor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    /// Upper bound on the number of keywords returned per section.
    pub max_keywords: usize,
    /// Terms with fewer characters than this are discarded.
    pub min_term_length: usize,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            max_keywords: 10,
            min_term_length: 3,
        }
    }
}

impl KeywordConfig {
    pub fn with_max_keywords(mut self, max_keywords: usize) -> Self {
        self.max_keywords = max_keywords;
        self
    }

    pub fn with_min_term_length(mut self, min_term_length: usize) -> Self {
        self.min_term_length = min_term_length;
        self
    }
}

/// A term and its normalized frequency within one section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordScore {
    pub term: String,
    pub importance: f32,
}

#[derive(Debug, Clone, Default)]
pub struct KeywordExtractor {
    config: KeywordConfig,
}

impl KeywordExtractor {
    pub fn new(config: KeywordConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KeywordConfig {
        &self.config
    }

    /// Splits text into the lower-cased, punctuation-free terms that are counted.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let cleaned = punctuation().replace_all(&lowered, "");
        let stopwords = stopwords();
        cleaned
            .split_whitespace()
            .filter(|term| term.chars().count() >= self.config.min_term_length)
            .filter(|term| !stopwords.contains(term))
            .map(str::to_string)
            .collect()
    }

    /// Extracts at most `max_keywords` terms, ordered by importance descending.
    ///
    /// Terms with equal importance keep the order in which they first appear in
    /// `"{title} {body}"`. Input that leaves no terms after filtering produces an
    /// empty list.
    pub fn extract(&self, title: &str, body: &str) -> Vec<KeywordScore> {
        let text = format!("{title} {body}");

        let mut order: Vec<String> = Vec::new();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for term in self.tokenize(&text) {
            let count = counts.entry(term.clone()).or_insert(0);
            if *count == 0 {
                order.push(term);
            }
            *count += 1;
        }

        let Some(max_count) = counts.values().copied().max() else {
            return Vec::new();
        };

        let mut scored: Vec<(usize, String)> = order
            .into_iter()
            .map(|term| (counts[&term], term))
            .collect();
        // Stable sort keeps first-seen order among equal counts.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(self.config.max_keywords);

        scored
            .into_iter()
            .map(|(count, term)| KeywordScore {
                term,
                importance: count as f32 / max_count as f32,
            })
            .collect()
    }
}

/// Extracts keywords with the default [`KeywordConfig`].
pub fn extract_keywords(title: &str, body: &str) -> Vec<KeywordScore> {
    KeywordExtractor::default().extract(title, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(scores: &[KeywordScore]) -> Vec<&str> {
        scores.iter().map(|s| s.term.as_str()).collect()
    }

    #[test]
    fn test_importance_is_relative_to_max_frequency() {
        let scores = extract_keywords("Cache", "cache cache eviction policy eviction");
        assert_eq!(terms(&scores), vec!["cache", "eviction", "policy"]);
        assert_eq!(scores[0].importance, 1.0);
        assert!((scores[1].importance - 2.0 / 3.0).abs() < 1e-6);
        assert!((scores[2].importance - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_stopwords_short_terms_and_punctuation_removed() {
        let scores = extract_keywords("The API", "It is an API, for the web! Go go.");
        assert_eq!(terms(&scores), vec!["api", "web"]);
    }

    #[test]
    fn test_contractions_collapse_before_stopword_check() {
        // "don't" loses its apostrophe first and is no longer a listed stopword.
        let scores = extract_keywords("", "don't");
        assert_eq!(terms(&scores), vec!["dont"]);
    }

    #[test]
    fn test_at_most_ten_keywords() {
        let body = (0..25)
            .map(|i| format!("term{i:02}"))
            .collect::<Vec<_>>()
            .join(" ");
        let scores = extract_keywords("", &body);
        assert_eq!(scores.len(), 10);
        assert_eq!(scores[0].term, "term00");
        assert_eq!(scores[9].term, "term09");
        for score in &scores {
            assert!(score.importance > 0.0 && score.importance <= 1.0);
        }
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        let scores = extract_keywords("zeta alpha", "mango alpha zeta mango");
        assert_eq!(terms(&scores), vec!["zeta", "alpha", "mango"]);
    }

    #[test]
    fn test_empty_after_filtering() {
        assert!(extract_keywords("", "").is_empty());
        assert!(extract_keywords("The", "and of to is").is_empty());
    }

    #[test]
    fn test_unicode_words_survive() {
        let scores = extract_keywords("Café", "naïve café");
        assert_eq!(terms(&scores), vec!["café", "naïve"]);
    }

    #[test]
    fn test_custom_config() {
        let extractor = KeywordExtractor::new(
            KeywordConfig::default()
                .with_max_keywords(2)
                .with_min_term_length(2),
        );
        let scores = extractor.extract("go db", "go db io");
        assert_eq!(terms(&scores), vec!["go", "db"]);
    }
}
