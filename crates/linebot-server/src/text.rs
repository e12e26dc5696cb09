//! Text normalisation for inbound messages.
//!
//! Mention offsets from the platform are code-point indices, so every
//! slice here goes through a `char` collection first; byte slicing would
//! tear CJK text apart.

/// Removes `length` code points starting at code point `index`.
///
/// Out-of-range spans are clamped rather than rejected; the platform has
/// been observed to send spans touching the end of the text.
pub fn excise_span(text: &str, index: usize, length: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let start = index.min(chars.len());
    let end = index.saturating_add(length).min(chars.len());
    chars[..start].iter().chain(chars[end..].iter()).collect()
}

/// Collapses runs of whitespace into single spaces and trims the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_cjk_punctuation(c: char) -> bool {
    // CJK Symbols and Punctuation, minus the ideographic space handled as
    // whitespace, plus fullwidth/halfwidth forms.
    matches!(c, '\u{3001}'..='\u{303F}' | '\u{FF00}'..='\u{FF0F}' | '\u{FF1A}'..='\u{FF20}' | '\u{FF3B}'..='\u{FF40}' | '\u{FF5B}'..='\u{FF65}')
}

fn strip_punctuation(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_ascii_punctuation() && !is_cjk_punctuation(*c))
        .collect()
}

/// The full inbound pipeline: normalise, drop ASCII and CJK punctuation
/// (the ideographic space survives as ordinary whitespace), normalise
/// again to heal the gaps stripping left behind.
pub fn sanitize(text: &str) -> String {
    normalize_whitespace(&strip_punctuation(&normalize_whitespace(text)))
}
