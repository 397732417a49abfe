//! # Password Generation
//!
//! Unbiased random strings over an arbitrary alphabet, drawn from the
//! operating system's secure random source.
//!
//! Each symbol consumes a fixed number of bits from one random buffer. The
//! width is the smallest power of two covering the alphabet when that divides
//! evenly; otherwise the widest candidate up to 32 bits is used, which keeps
//! the modulo bias below one part in 2^26 for any alphabet that fits in a
//! byte string.
//!
//! ```rust
//! use taskcluster_operator::pwgen;
//!
//! let password = pwgen::alphanumeric(20);
//! assert_eq!(password.len(), 20);
//! ```

use rand::rngs::OsRng;
use rand::RngCore;

/// Digits followed by lower and upper case ASCII letters
pub const ALPHANUMERIC: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

const MAX_BITS_PER_SYMBOL: u32 = 32;

/// Number of random bits consumed per output symbol for an alphabet of `size`.
fn bits_per_symbol(size: usize) -> u32 {
    if size <= 1 {
        return 1;
    }

    let size = size as u64;
    let min_bits = u64::BITS - (size - 1).leading_zeros();
    let mut best_bits = min_bits;
    let mut best_bucket = (1u64 << min_bits) / size;

    for bits in min_bits..=MAX_BITS_PER_SYMBOL {
        let span = 1u64 << bits;
        if span % size == 0 {
            return bits;
        }

        // Each symbol is hit either `bucket` or `bucket + 1` times.
        let bucket = span / size;
        if bucket > best_bucket {
            best_bits = bits;
            best_bucket = bucket;
        }
    }

    best_bits
}

/// Generate `length` characters drawn uniformly from `alphabet`.
///
/// An empty `length` yields an empty string without touching the random
/// source. The alphabet is treated as a sequence of characters, so non-ASCII
/// symbols are supported.
///
/// # Panics
///
/// Panics if `alphabet` is empty while `length` is non-zero, or if the
/// operating system random source is unavailable.
#[must_use]
pub fn from_alphabet(alphabet: &str, length: usize) -> String {
    let size = alphabet.chars().count();
    assert!(
        length == 0 || size > 0,
        "cannot generate characters from an empty alphabet"
    );

    let bits = bits_per_symbol(size) as usize;
    let total_bytes = (length * bits).div_ceil(8);
    if total_bytes == 0 {
        return String::new();
    }

    let mut random = vec![0u8; total_bytes];
    OsRng.fill_bytes(&mut random);

    let modulus = size as u64;
    let ascii = alphabet.is_ascii();
    let mut offset = 0usize;
    let mut out = String::with_capacity(length);

    for _ in 0..length {
        let mut index = 0u64;
        let mut have = 0usize;

        while have < bits {
            let byte = random[offset / 8];
            let shift = offset % 8;
            let take = (8 - shift).min(bits - have);
            let chunk = (u64::from(byte) >> shift) & ((1u64 << take) - 1);

            index = (index << take) | chunk;
            have += take;
            offset += take;
        }

        out.push(symbol_at(alphabet, ascii, (index % modulus) as usize));
    }

    out
}

/// The `index`th character of `alphabet`, which has more than `index` characters.
fn symbol_at(alphabet: &str, ascii: bool, index: usize) -> char {
    if ascii {
        char::from(alphabet.as_bytes()[index])
    } else {
        alphabet.chars().nth(index).unwrap_or_default()
    }
}

/// Generate `length` random alpha-numeric characters.
#[must_use]
pub fn alphanumeric(length: usize) -> String {
    from_alphabet(ALPHANUMERIC, length)
}
