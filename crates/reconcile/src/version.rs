//! Package version ordering.
//!
//! Versions from five ecosystems share one comparison: an optional numeric
//! epoch (`1:2.3`), then alternating numeric and alphabetic runs. Separators
//! (`.`, `-`, `_`, `+`, `~`) only split runs. When one version is a prefix of
//! the other, a trailing alphabetic run marks a pre-release (`1.0rc1 < 1.0`)
//! and a trailing numeric run a later release (`1.0 < 1.0.1`).

use std::cmp::Ordering;

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Num(u64),
    Alpha(&'a str),
}

impl Ord for Token<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Token::Num(a), Token::Num(b)) => a.cmp(b),
            (Token::Alpha(a), Token::Alpha(b)) => a.cmp(b),
            (Token::Num(_), Token::Alpha(_)) => Ordering::Greater,
            (Token::Alpha(_), Token::Num(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Token<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn split_epoch(version: &str) -> (u64, &str) {
    match version.split_once(':') {
        Some((epoch, rest)) if !epoch.is_empty() && epoch.bytes().all(|b| b.is_ascii_digit()) => {
            (epoch.parse().unwrap_or(0), rest)
        }
        _ => (0, version),
    }
}

fn tokenize(version: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let bytes = version.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        if bytes[i].is_ascii_digit() {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            // Runs too long for u64 saturate; they still order above shorter ones.
            tokens.push(Token::Num(version[start..i].parse().unwrap_or(u64::MAX)));
        } else if bytes[i].is_ascii_alphabetic() {
            while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                i += 1;
            }
            tokens.push(Token::Alpha(&version[start..i]));
        } else {
            i += 1;
        }
    }
    tokens
}

/// Compare two version strings.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (epoch_a, rest_a) = split_epoch(a.trim());
    let (epoch_b, rest_b) = split_epoch(b.trim());
    if epoch_a != epoch_b {
        return epoch_a.cmp(&epoch_b);
    }

    let ta = tokenize(rest_a);
    let tb = tokenize(rest_b);
    for (x, y) in ta.iter().zip(&tb) {
        match x.cmp(y) {
            Ordering::Equal => {}
            other => return other,
        }
    }

    match ta.len().cmp(&tb.len()) {
        Ordering::Equal => Ordering::Equal,
        Ordering::Greater => trailing_order(&ta[tb.len()]),
        Ordering::Less => trailing_order(&tb[ta.len()]).reverse(),
    }
}

/// Order of the longer version relative to its prefix, given its first extra token.
fn trailing_order(first_extra: &Token<'_>) -> Ordering {
    match first_extra {
        Token::Num(_) => Ordering::Greater,
        Token::Alpha(_) => Ordering::Less,
    }
}

/// Whether `installed` is older than `wanted`.
pub fn is_older(installed: &str, wanted: &str) -> bool {
    compare_versions(installed, wanted) == Ordering::Less
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ordering() {
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("2.0.0", "2.0.0"), Ordering::Equal);
        assert!(is_older("1.24.0", "1.26"));
    }

    #[test]
    fn test_prefix_rules() {
        assert_eq!(compare_versions("1.26.4", "1.26"), Ordering::Greater);
        assert_eq!(compare_versions("1.0rc1", "1.0"), Ordering::Less);
        assert_eq!(compare_versions("2.0", "2.0b2"), Ordering::Greater);
    }

    #[test]
    fn test_distribution_suffixes() {
        assert!(!is_older("7.81.0-1ubuntu1.15", "7.81.0"));
        assert!(is_older("7.68.0-1ubuntu2", "7.81.0"));
        assert_eq!(
            compare_versions("1:2.0-1", "2:1.0-1"),
            Ordering::Less,
            "epoch dominates"
        );
    }
}
