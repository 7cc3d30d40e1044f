// SPDX-License-Identifier: EUPL-1.2

//! Perceptual-hash similarity scoring.
//!
//! `score = 100 * (bits - hamming) / bits`, over the shared prefix when the
//! two hashes differ in length.

/// Similarity of two optional perceptual hashes, `0.0` if either is missing.
pub fn compare(a: Option<&str>, b: Option<&str>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => compare_hashes(a, b),
        _ => 0.0,
    }
}

/// Bitwise Hamming similarity for hex hashes; per-character for anything else.
pub fn compare_hashes(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let shared = a.len().min(b.len());
    if shared == 0 {
        return 0.0;
    }
    let (a, b) = (&a[..shared], &b[..shared]);

    let nibbles: Option<Vec<(u32, u32)>> = a
        .iter()
        .zip(b)
        .map(|(x, y)| Some((x.to_digit(16)?, y.to_digit(16)?)))
        .collect();

    let (bits, distance) = match nibbles {
        Some(pairs) => (
            shared * 4,
            pairs
                .iter()
                .map(|(x, y)| (x ^ y).count_ones() as usize)
                .sum(),
        ),
        None => (shared, a.iter().zip(b).filter(|(x, y)| x != y).count()),
    };

    let score = 100.0 * (bits - distance) as f64 / bits as f64;
    (score * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_hashes_score_100() {
        for h in ["f0e1d2c3b4a59687", "0", "ABCDEF", "not-hex!"] {
            assert_eq!(compare_hashes(h, h), 100.0);
        }
    }

    #[test]
    fn comparison_is_symmetric() {
        let pairs = [
            ("f0e1d2c3b4a59687", "00e1d2c3b4a59680"),
            ("ffff", "0000ffff"),
            ("abc", "xyz"),
            ("1234", ""),
        ];
        for (a, b) in pairs {
            assert_eq!(compare_hashes(a, b), compare_hashes(b, a));
        }
    }

    #[test]
    fn score_is_normalized_hamming() {
        // 1 bit of 64 differs
        assert_eq!(compare_hashes("0000000000000000", "0000000000000001"), 98.44);
        // every bit differs
        assert_eq!(compare_hashes("0000", "ffff"), 0.0);
        // hex is case-insensitive
        assert_eq!(compare_hashes("abcdef", "ABCDEF"), 100.0);
    }

    #[test]
    fn ten_percent_of_bits_is_ninety() {
        // 40 hex digits = 160 bits; flip 16 of them.
        let h1 = "0".repeat(40);
        let h2 = format!("ffff{}", "0".repeat(36));
        assert_eq!(compare_hashes(&h1, &h2), 90.0);
    }

    #[test]
    fn length_mismatch_uses_shared_prefix() {
        assert_eq!(compare_hashes("ff00", "ff00aaaa"), 100.0);
        assert_eq!(compare_hashes("ff00", "ff"), 100.0);
    }

    #[test]
    fn missing_input_scores_zero() {
        assert_eq!(compare(None, Some("ff")), 0.0);
        assert_eq!(compare(Some("ff"), None), 0.0);
        assert_eq!(compare(Some(""), Some("ff")), 0.0);
    }

    #[test]
    fn score_stays_in_range() {
        for (a, b) in [("0123", "fedc"), ("zz", "zy"), ("a", "b")] {
            let s = compare_hashes(a, b);
            assert!((0.0..=100.0).contains(&s), "{s}");
        }
    }
}
