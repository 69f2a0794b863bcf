//! Text normalization and similarity utilities.
//!
//! Everything here is locale-free: case mapping and classification use
//! the Unicode tables the standard library ships, and the accent fold is
//! an explicit Latin-1 substitution table.

pub mod ngram;
pub mod utf8;

pub use ngram::{Entropy, NGrams, Trigrams};

/// Latin-1 `0xC0..=0xFF` folded to one ASCII letter or a space each.
const ACCENT_FOLD: [char; 64] = [
    'A', 'A', 'A', 'A', 'A', 'A', 'A', 'C', 'E', 'E', 'E', 'E', 'I', 'I', 'I', 'I',
    'D', 'N', 'O', 'O', 'O', 'O', 'O', ' ', 'O', 'U', 'U', 'U', 'U', 'Y', ' ', ' ',
    'a', 'a', 'a', 'a', 'a', 'a', 'a', 'c', 'e', 'e', 'e', 'e', 'i', 'i', 'i', 'i',
    'd', 'n', 'o', 'o', 'o', 'o', 'o', ' ', 'o', 'u', 'u', 'u', 'u', 'y', ' ', 'y',
];

/// Canonical comparison form of a string: Latin-1 accents folded to
/// ASCII, everything outside `[a-z]` dropped, lower-cased. Idempotent.
pub fn normalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        let cp = ch as u32;
        let folded = if (0xC0..=0xFF).contains(&cp) {
            ACCENT_FOLD[(cp - 0xC0) as usize]
        } else {
            ch
        };
        let lower = folded.to_ascii_lowercase();
        if lower.is_ascii_lowercase() {
            out.push(lower);
        }
    }
    out
}

/// Title-case a string: the first alphanumeric of each run keeps (or,
/// with `force_upcase`, gains) upper case, the rest are lowered. The
/// bigram "CD" inside a word keeps its case. Returns the recased string
/// and the number of characters changed.
pub fn to_title_case(s: &str, force_upcase: bool) -> (String, usize) {
    let mut out = String::with_capacity(s.len());
    let mut was_space = true;
    let mut was_c = false;
    let mut changed = 0usize;

    for ch in s.chars() {
        if !ch.is_alphanumeric() {
            was_space = true;
            out.push(ch);
            continue;
        }
        if was_space {
            was_c = ch == 'C';
            if force_upcase && ch.is_lowercase() {
                out.extend(ch.to_uppercase());
                changed += 1;
            } else {
                out.push(ch);
            }
        } else {
            if ch.is_uppercase() && !(was_c && ch == 'D') {
                out.extend(ch.to_lowercase());
                changed += 1;
            } else {
                out.push(ch);
            }
            was_c = false;
        }
        was_space = false;
    }
    (out, changed)
}

/// Trim leading/trailing spaces and collapse interior runs of spaces.
pub fn trim_all(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_space = true;
    for ch in s.chars() {
        if ch == ' ' {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// More uppercase than non-uppercase alphabetics.
pub fn mostly_uppercase(s: &str) -> bool {
    let mut upper = 0usize;
    let mut nonupper = 0usize;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if ch.is_uppercase() {
                upper += 1;
            } else {
                nonupper += 1;
            }
        }
    }
    nonupper < upper
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_accents() {
        assert_eq!(normalize("Motörhead"), "motorhead");
        assert_eq!(normalize("Björk"), "bjork");
        assert_eq!(normalize("Señor Coconut"), "senorcoconut");
    }

    #[test]
    fn test_normalize_drops_everything_but_letters() {
        assert_eq!(normalize("AC/DC - Back in Black (1980)"), "acdcbackinblack");
        assert_eq!(normalize("  99 Luftballons!  "), "luftballons");
        assert_eq!(normalize("---"), "");
    }

    #[test]
    fn test_normalize_drops_non_latin() {
        // scripts outside the fold table have no ASCII letter form
        assert_eq!(normalize("Ω αβγ"), "");
        assert_eq!(normalize("x Ω y"), "xy");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for s in ["Motörhead", "AC/DC", "ÀÉÎÕÜ ß", "plain", "", "Ω12"] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_title_case_lowers_shouting() {
        let (s, changed) = to_title_case("BACK IN BLACK", false);
        assert_eq!(s, "Back In Black");
        assert_eq!(changed, 8);
    }

    #[test]
    fn test_title_case_keeps_cd_bigram() {
        let (s, _) = to_title_case("GREATEST HITS CD2", false);
        assert_eq!(s, "Greatest Hits CD2");
    }

    #[test]
    fn test_title_case_force_upcase() {
        let (s, changed) = to_title_case("back in black", true);
        assert_eq!(s, "Back In Black");
        assert_eq!(changed, 3);
    }

    #[test]
    fn test_title_case_leaves_mixed_case_count() {
        let (_, changed) = to_title_case("Back In Black", false);
        assert_eq!(changed, 0);
    }

    #[test]
    fn test_trim_all() {
        assert_eq!(trim_all("  a   b  "), "a b");
        assert_eq!(trim_all("one two"), "one two");
        assert_eq!(trim_all("   "), "");
    }

    #[test]
    fn test_mostly_uppercase() {
        assert!(mostly_uppercase("BACK IN BLACK"));
        assert!(mostly_uppercase("ABBA Gold"));
        assert!(!mostly_uppercase("Back In Black"));
        assert!(!mostly_uppercase("12345"));
    }
}
