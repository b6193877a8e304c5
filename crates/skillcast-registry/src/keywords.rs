//! Token normalization
//!
//! The same functions normalize skill keywords and context evidence, so the
//! scorer can compare tokens by exact equality.

use std::collections::BTreeSet;

/// Filler words that carry no technology signal. Must stay sorted.
const STOPWORDS: &[&str] = &[
    "a", "about", "across", "after", "all", "also", "an", "and", "any", "apply", "applying",
    "are", "as", "at", "be", "best", "build", "building", "by", "can", "clean", "code",
    "covering", "development", "do", "expert", "expertise", "for", "from", "guide",
    "guideline", "how", "in", "including", "into", "is", "it", "its", "modern", "of", "on",
    "or", "our", "over", "practice", "project", "rule", "should", "skill", "that", "the",
    "their", "them", "these", "this", "through", "to", "use", "used", "using", "via", "when",
    "which", "while", "with", "within", "without", "writing", "you", "your",
];

/// Suffixes that end in `s` without being plurals
const SINGULAR_S_SUFFIXES: &[&str] = &["ss", "us", "is", "js"];

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '+' | '#' | '.')
}

fn is_stopword(word: &str) -> bool {
    STOPWORDS.binary_search(&word).is_ok()
}

fn depluralize(word: &str) -> String {
    if word.chars().count() <= 3 {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix("ies") {
        if stem.chars().count() > 1 {
            return format!("{stem}y");
        }
    }
    if let Some(stem) = word.strip_suffix("sses") {
        return format!("{stem}ss");
    }
    if SINGULAR_S_SUFFIXES.iter().any(|s| word.ends_with(s)) {
        return word.to_string();
    }
    match word.strip_suffix('s') {
        Some(stem) => stem.to_string(),
        None => word.to_string(),
    }
}

/// Normalize a single word.
///
/// Lowercases, folds dotted names (`Next.js` -> `nextjs`), de-pluralizes and
/// drops stopwords, numbers and one-character fragments.
pub fn normalize_token(word: &str) -> Option<String> {
    let lowered: String = word
        .trim_matches(|c: char| !is_word_char(c) || c == '.')
        .chars()
        .filter(|c| *c != '.')
        .flat_map(char::to_lowercase)
        .collect();

    if lowered.chars().count() < 2 || is_stopword(&lowered) {
        return None;
    }
    if !lowered.chars().any(char::is_alphabetic) {
        return None;
    }

    let singular = depluralize(&lowered);
    if is_stopword(&singular) {
        return None;
    }
    Some(singular)
}

/// Split free text into normalized tokens, in order of appearance
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !is_word_char(c))
        .filter_map(normalize_token)
        .collect()
}

/// Normalized tokens of `text` as a set
pub fn keyword_set(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopwords_sorted() {
        let mut sorted = STOPWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOPWORDS);
    }

    #[test]
    fn test_normalize_token() {
        assert_eq!(normalize_token("React").as_deref(), Some("react"));
        assert_eq!(normalize_token("Next.js").as_deref(), Some("nextjs"));
        assert_eq!(normalize_token("hooks").as_deref(), Some("hook"));
        assert_eq!(normalize_token("libraries").as_deref(), Some("library"));
        assert_eq!(normalize_token("classes").as_deref(), Some("class"));
        assert_eq!(normalize_token("nextjs").as_deref(), Some("nextjs"));
        assert_eq!(normalize_token("C++").as_deref(), Some("c++"));
        assert_eq!(normalize_token(".tsx").as_deref(), Some("tsx"));
        assert_eq!(normalize_token("Guidelines"), None);
        assert_eq!(normalize_token("2024"), None);
        assert_eq!(normalize_token("x"), None);
    }

    #[test]
    fn test_tokenize_description() {
        let tokens = tokenize(
            "Best practices for Next.js 14, React and TypeScript (App Router, Server Components).",
        );
        assert_eq!(
            tokens,
            vec!["nextjs", "react", "typescript", "app", "router", "server", "component"]
        );
    }

    #[test]
    fn test_tokenize_hyphenated_names() {
        let set = keyword_set("nextjs-react-typescript");
        let expected: BTreeSet<String> = ["nextjs", "react", "typescript"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(set, expected);
    }

    #[test]
    fn test_tokenize_is_deterministic() {
        let text = "Django REST framework, Celery workers and PostgreSQL databases";
        assert_eq!(tokenize(text), tokenize(text));
        assert!(keyword_set(text).contains("database"));
    }
}
