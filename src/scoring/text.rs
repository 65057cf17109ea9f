//! Text normalization and fuzzy similarity for free-text answers.

use unicode_normalization::UnicodeNormalization;

/// Canonical form used for all text comparison: NFC, lowercase, trimmed,
/// internal whitespace collapsed to single spaces.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.nfc().flat_map(|c| c.to_lowercase()) {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(c);
        }
    }
    out
}

/// Levenshtein edit distance over chars, single-row DP.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut prev_diag = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            let next = (prev_diag + cost).min(row[j] + 1).min(row[j + 1] + 1);
            prev_diag = row[j + 1];
            row[j + 1] = next;
        }
    }
    row[b.len()]
}

/// Similarity in [0,1]: 1 − distance / max(len). Both inputs are expected
/// to be normalized already. Symmetric by construction.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize("  Amsterdam "), "amsterdam");
        assert_eq!(normalize("New\t York\n"), "new york");
        assert_eq!(normalize("ROT   FRONT"), "rot front");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_normalize_composes_unicode() {
        // U+0065 U+0301 (e + combining acute) composes to U+00E9
        assert_eq!(normalize("Caf\u{0065}\u{0301}"), "caf\u{e9}");
        assert_eq!(normalize("Café"), normalize("Cafe\u{0301}"));
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", "abc"), 0);
        assert_eq!(levenshtein("amsterdam", "amsterdem"), 1);
    }

    #[test]
    fn test_similarity_symmetric() {
        let pairs = [
            ("amsterdam", "amsterdem"),
            ("berlin", "paris"),
            ("a", ""),
            ("über", "uber"),
        ];
        for (a, b) in pairs {
            assert_eq!(similarity(a, b), similarity(b, a));
        }
    }

    #[test]
    fn test_similarity_range() {
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("same", "same"), 1.0);
        let s = similarity("amsterdam", "amsterdem");
        assert!(s > 0.85 && s < 0.95, "got {}", s);
    }
}
