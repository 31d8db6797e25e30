//! Topic-exchange key matching.
//!
//! Keys are `.`-separated words. In a binding key `*` stands for exactly one
//! word and `#` for zero or more words; every other word must match
//! literally.

/// Does `routing_key` match `binding_key`?
pub fn matches(binding_key: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = binding_key.split('.').collect();
    let words: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &words)
}

/// Whether the binding key uses any wildcard.
pub fn is_pattern(binding_key: &str) -> bool {
    binding_key.split('.').any(|w| w == "*" || w == "#")
}

fn match_words(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => (0..=words.len()).any(|skip| match_words(rest, &words[skip..])),
        Some((&"*", rest)) => !words.is_empty() && match_words(rest, &words[1..]),
        Some((literal, rest)) => {
            words.first() == Some(literal) && match_words(rest, &words[1..])
        }
    }
}
