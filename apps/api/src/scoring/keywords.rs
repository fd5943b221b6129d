//! Keyword tokenization for the deterministic scoring path.

use std::collections::BTreeSet;

/// Words that carry no skill signal in CVs or job descriptions.
const STOPWORDS: &[&str] = &[
    "a", "about", "across", "an", "and", "any", "are", "as", "at", "be", "been", "being", "both",
    "but", "by", "can", "candidate", "com", "company", "do", "each", "etc", "experience", "for",
    "from", "has", "have", "having", "he", "her", "his", "i", "if", "in", "including", "into",
    "is", "it", "its", "job", "join", "looking", "may", "me", "more", "must", "my", "nice", "of",
    "on", "or", "our", "over", "plus", "preferred", "required", "requirements", "role", "she",
    "should", "skills", "so", "strong", "such", "team", "that", "the", "their", "them", "there",
    "these", "they", "this", "to", "us", "using", "very", "was", "we", "well", "were", "what",
    "who", "will", "with", "work", "working", "would", "year", "years", "you", "your",
];

/// Single-character tokens that are real skills.
const SINGLE_CHAR_SKILLS: &[&str] = &["c", "r"];

/// Lowercases, splits on anything but alphanumerics and `+ # .`, trims stray dots,
/// and drops stopwords and noise. `C++`, `C#`, and `node.js` survive intact.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || matches!(c, '+' | '#' | '.')))
        .map(|raw| raw.trim_matches('.'))
        .filter(|token| !token.is_empty())
        .filter(|token| token.chars().any(|c| c.is_alphanumeric()))
        .filter(|token| token.chars().count() > 1 || SINGLE_CHAR_SKILLS.contains(token))
        .filter(|token| !STOPWORDS.contains(token))
        .filter(|token| !token.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_keeps_language_names_with_symbols() {
        let tokens = tokenize("Expert in C++, C# and Node.js.");
        assert!(tokens.contains("c++"));
        assert!(tokens.contains("c#"));
        assert!(tokens.contains("node.js"));
        assert!(tokens.contains("expert"));
    }

    #[test]
    fn test_tokenize_drops_stopwords_and_numbers() {
        let tokens = tokenize("5 years of experience with the Rust team");
        assert_eq!(tokens, BTreeSet::from(["rust".to_string()]));
    }

    #[test]
    fn test_tokenize_is_case_insensitive() {
        assert_eq!(tokenize("Kubernetes"), tokenize("KUBERNETES"));
    }

    #[test]
    fn test_tokenize_keeps_r_but_not_stray_letters() {
        let tokens = tokenize("R / x / Python");
        assert!(tokens.contains("r"));
        assert!(!tokens.contains("x"));
        assert!(tokens.contains("python"));
    }

    #[test]
    fn test_tokenize_empty_text() {
        assert!(tokenize("   \n\t").is_empty());
    }
}
