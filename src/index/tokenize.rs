/// Word tokenizer shared by index build, query scoring, and expansion filtering.
///
/// Text is lower-cased and split into maximal runs of word characters.
/// Build-time and query-time tokenization must go through this one function:
/// any divergence silently drops matches.

use std::sync::OnceLock;

use regex::Regex;

fn word_pattern() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"\w+").expect("word pattern is a valid regex"))
}

/// Lower-case `text` and return its word tokens in order (duplicates kept).
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    word_pattern()
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}
