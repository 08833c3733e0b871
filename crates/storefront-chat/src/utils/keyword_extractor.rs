//! Search keyword extraction for catalog lookups

use lazy_static::lazy_static;

lazy_static! {
    static ref STOP_WORDS: Vec<&'static str> = vec![
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for",
        "of", "with", "by", "is", "am", "are", "was", "were", "be", "been",
        "being", "have", "has", "had", "do", "does", "did", "will", "would",
        "shall", "should", "may", "might", "must", "can", "could", "i", "you",
        "he", "she", "it", "we", "they", "me", "him", "her", "us", "them",
        "my", "your", "his", "its", "our", "their", "this", "that", "these",
        "those", "any", "some", "get", "got", "want", "need", "looking",
        "find", "show", "please", "hello", "thanks", "what", "how", "which",
        "under", "over", "about", "there", "here", "from", "than",
    ];
}

/// Pulls the words worth matching against product titles and bodies
#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    max_keywords: usize,
    min_word_length: usize,
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self {
            max_keywords: 5,
            min_word_length: 3,
        }
    }
}

impl KeywordExtractor {
    /// Keywords in order of first appearance, lowercased and deduplicated.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let mut keywords: Vec<String> = Vec::new();

        for word in lower.split(|c: char| !c.is_alphanumeric() && c != '-') {
            let word = word.trim_matches('-');
            if word.chars().count() < self.min_word_length
                || Self::is_stop_word(word)
                || word.chars().all(|c| c.is_ascii_digit())
            {
                continue;
            }
            if !keywords.iter().any(|k| k == word) {
                keywords.push(word.to_string());
            }
            if keywords.len() >= self.max_keywords {
                break;
            }
        }

        keywords
    }

    pub fn is_stop_word(word: &str) -> bool {
        STOP_WORDS.contains(&word.to_lowercase().as_str())
    }
}
