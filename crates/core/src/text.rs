use unicode_segmentation::UnicodeSegmentation;

/// Collapses runs of whitespace into single spaces.
pub fn normalize_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cache and lookup key for a piece of text: trimmed, lowercased, whitespace collapsed.
pub fn normalize_key(input: &str) -> String {
    normalize_text(input).to_lowercase()
}

/// Lowercased word tokens in reading order.
pub fn tokenize(input: &str) -> Vec<String> {
    input
        .unicode_words()
        .map(str::to_lowercase)
        .filter(|token| !token.is_empty())
        .collect()
}
