//! Text analysis: lowercasing, Unicode word tokenisation, stop-word
//! removal.

use rustc_hash::FxHashMap;
use unicode_segmentation::UnicodeSegmentation;

/// Common English stop words, sorted for binary search.
const STOP_WORDS: [&str; 33] = [
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

/// One analysed token with its byte span in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Normalised term.
    pub term: String,
    /// Byte offset of the token start.
    pub start: usize,
    /// Byte offset one past the token end.
    pub end: usize,
}

/// Runs the standard analyser over a document.
#[must_use]
pub fn standard_analyse(text: &str) -> Vec<Token> {
    text.unicode_word_indices()
        .filter_map(|(offset, word)| {
            let term = word.to_lowercase();
            if STOP_WORDS.binary_search(&term.as_str()).is_ok() {
                return None;
            }
            Some(Token {
                term,
                start: offset,
                end: offset + word.len(),
            })
        })
        .collect()
}

/// Term frequencies and token count of an analysed document.
#[must_use]
pub fn term_frequencies(tokens: &[Token]) -> (FxHashMap<String, u32>, u32) {
    let mut frequencies: FxHashMap<String, u32> = FxHashMap::default();
    for token in tokens {
        *frequencies.entry(token.term.clone()).or_insert(0) += 1;
    }
    #[allow(clippy::cast_possible_truncation)]
    let length = tokens.len() as u32;
    (frequencies, length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_words_sorted() {
        let mut sorted = STOP_WORDS;
        sorted.sort_unstable();
        assert_eq!(sorted, STOP_WORDS);
    }

    #[test]
    fn test_lowercases_and_strips_stop_words() {
        let tokens = standard_analyse("The Quick Fox and the Hen");
        let terms: Vec<&str> = tokens.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(terms, vec!["quick", "fox", "hen"]);
    }

    #[test]
    fn test_spans_point_into_source() {
        let text = "Hello, wörld 42";
        for token in standard_analyse(text) {
            assert_eq!(text[token.start..token.end].to_lowercase(), token.term);
        }
    }

    #[test]
    fn test_numbers_are_tokens() {
        let tokens = standard_analyse("hello world 42");
        let terms: Vec<&str> = tokens.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(terms, vec!["hello", "world", "42"]);
    }

    #[test]
    fn test_term_frequencies() {
        let tokens = standard_analyse("code review code ship code");
        let (frequencies, length) = term_frequencies(&tokens);
        assert_eq!(length, 5);
        assert_eq!(frequencies["code"], 3);
        assert_eq!(frequencies["review"], 1);
    }
}
