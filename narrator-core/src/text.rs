//! Text helpers shared by the classifier, the memory store and the guard.
//!
//! Everything that compares player text or labels goes through
//! [`normalize`] first, so "Garde", "garde " and "GARDÉ" collide.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Fold case and accents, unify apostrophes and collapse whitespace.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            '\u{2019}' | '\u{2018}' | '`' => '\'',
            _ => c,
        })
        .collect::<String>()
        .to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stable identifier derived from a label: `"Port Est"` -> `"port-est"`.
pub fn slugify(label: &str) -> String {
    let mut slug = String::new();
    let mut dash = false;
    for c in normalize(label).chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Check if `text` contains `word` at word boundaries.
///
/// Both sides are expected to be normalized already. Multi-word phrases
/// match as a unit ("on y va" matches in "ok on y va !").
pub fn contains_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }

    let text_bytes = text.as_bytes();
    let word_bytes = word.as_bytes();
    if word_bytes.len() > text_bytes.len() {
        return false;
    }

    let mut i = 0;
    while i + word_bytes.len() <= text_bytes.len() {
        if &text_bytes[i..i + word_bytes.len()] == word_bytes {
            let left_ok = i == 0 || !is_word_byte(text_bytes[i - 1]);
            let end = i + word_bytes.len();
            let right_ok = end == text_bytes.len() || !is_word_byte(text_bytes[end]);
            if left_ok && right_ok {
                return true;
            }
        }
        i += 1;
    }

    false
}

/// True when any of `phrases` occurs in the normalized `text`.
pub fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| contains_word(text, p))
}

/// Return the first phrase of `phrases` found in `text` with its byte offset.
pub fn find_first<'a>(text: &str, phrases: &[&'a str]) -> Option<(usize, &'a str)> {
    phrases
        .iter()
        .filter_map(|p| find_word(text, p).map(|pos| (pos, *p)))
        .min_by_key(|(pos, p)| (*pos, usize::MAX - p.len()))
}

fn find_word(text: &str, word: &str) -> Option<usize> {
    let mut start = 0;
    while let Some(offset) = text[start..].find(word) {
        let i = start + offset;
        let end = i + word.len();
        let left_ok = i == 0 || !is_word_byte(text.as_bytes()[i - 1]);
        let right_ok = end == text.len() || !is_word_byte(text.as_bytes()[end]);
        if left_ok && right_ok {
            return Some(i);
        }
        start = i + word.len().max(1);
        if start >= text.len() {
            break;
        }
        while !text.is_char_boundary(start) {
            start += 1;
        }
    }
    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b >= 0x80
}

/// Truncate to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

/// Number of whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Uppercase the first character.
pub fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_accents_and_case() {
        assert_eq!(normalize("  Hypothétiquement,  ÉCOUTE "), "hypothetiquement, ecoute");
        assert_eq!(normalize("l\u{2019}auberge"), "l'auberge");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Port Est"), "port-est");
        assert_eq!(slugify("  L'Auberge du Sanglier!  "), "l-auberge-du-sanglier");
        assert_eq!(slugify("***"), "");
    }

    #[test]
    fn test_contains_word_boundaries() {
        assert!(contains_word("ok on y va", "on y va"));
        assert!(contains_word("oui", "oui"));
        assert!(!contains_word("ouistiti", "oui"));
        assert!(!contains_word("", "oui"));
    }

    #[test]
    fn test_find_first_prefers_earliest() {
        let found = find_first("je vais au port puis je parle", &["je parle", "je vais"]);
        assert_eq!(found, Some((0, "je vais")));
    }

    #[test]
    fn test_truncate_chars_unicode() {
        assert_eq!(truncate_chars("éééé", 2), "éé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
