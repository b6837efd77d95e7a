//! Junos `$9$` reversible secret encoding.
//!
//! Junos stores some secrets (authentication keys, RADIUS secrets) with a
//! reversible obfuscation. Reading them back in plaintext keeps the state
//! comparable with the configured value.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

use crate::error::JunosError;

pub const MAGIC: &str = "$9$";

const FAMILY: [&str; 4] = [
    "QzF3n6/9CAtpu0O",
    "B1IREhcSyrleKvMW8LXx",
    "7N-dVbwsY2g4oaJZGUDj",
    "iHkq.mPf5T",
];

const ENCODING: [&[u32]; 7] = [
    &[1, 4, 32],
    &[1, 16, 32],
    &[1, 8, 32],
    &[1, 64],
    &[1, 32],
    &[1, 4, 16, 128],
    &[1, 32, 64],
];

static NUM_ALPHA: Lazy<Vec<char>> = Lazy::new(|| FAMILY.concat().chars().collect());

static ALPHA_NUM: Lazy<HashMap<char, usize>> = Lazy::new(|| {
    NUM_ALPHA
        .iter()
        .enumerate()
        .map(|(idx, c)| (*c, idx))
        .collect()
});

/// Number of padding characters following a given salt character.
static EXTRA: Lazy<HashMap<char, usize>> = Lazy::new(|| {
    let mut extra = HashMap::new();
    for (family_idx, family) in FAMILY.iter().enumerate() {
        for c in family.chars() {
            extra.insert(c, 3 - family_idx);
        }
    }
    extra
});

/// Whether `raw` looks like a `$9$` string.
pub fn is_junos_encoded(raw: &str) -> bool {
    raw.starts_with(MAGIC) && raw.len() > MAGIC.len()
}

/// Decodes a `$9$` string to plaintext.
pub fn junos_decode(raw: &str) -> Result<String, JunosError> {
    let fail = |reason: String| JunosError::Decode {
        field: "secret".to_string(),
        reason,
    };

    let body = raw
        .strip_prefix(MAGIC)
        .ok_or_else(|| fail("missing $9$ prefix".to_string()))?;
    let mut chars = body.chars();
    let first = chars
        .next()
        .ok_or_else(|| fail("empty $9$ string".to_string()))?;
    let toss = *EXTRA
        .get(&first)
        .ok_or_else(|| fail(format!("unexpected salt character {first:?}")))?;
    for _ in 0..toss {
        chars
            .next()
            .ok_or_else(|| fail("truncated salt padding".to_string()))?;
    }

    let mut rest: Vec<char> = chars.collect();
    let mut prev = first;
    let mut decoded = Vec::new();
    while !rest.is_empty() {
        let decode = ENCODING[decoded.len() % ENCODING.len()];
        if rest.len() < decode.len() {
            return Err(fail("truncated encoded character".to_string()));
        }
        let nibble: Vec<char> = rest.drain(..decode.len()).collect();
        let mut value: u32 = 0;
        for (c, weight) in nibble.iter().zip(decode.iter()) {
            value += gap(prev, *c).map_err(fail)? * weight;
            prev = *c;
        }
        let byte = u8::try_from(value)
            .map_err(|_| fail(format!("decoded value {value} is not a byte")))?;
        decoded.push(byte);
    }

    String::from_utf8(decoded).map_err(|e| fail(format!("decoded bytes are not utf-8: {e}")))
}

/// Encodes plaintext as a `$9$` string.
///
/// Salt and padding are derived from a SHA-256 of the plaintext so the same
/// secret always encodes to the same string.
pub fn junos_encode(plain: &str) -> String {
    let digest = Sha256::digest(plain.as_bytes());
    let salt = NUM_ALPHA[digest[0] as usize % NUM_ALPHA.len()];
    let padding_len = EXTRA.get(&salt).copied().unwrap_or(0);
    let padding: String = digest[1..=padding_len]
        .iter()
        .map(|b| NUM_ALPHA[*b as usize % NUM_ALPHA.len()])
        .collect();
    encode_with_salt(plain, salt, &padding)
}

/// Encodes with an explicit salt and padding; `padding` must have the length
/// the salt character requires.
pub fn encode_with_salt(plain: &str, salt: char, padding: &str) -> String {
    let mut crypt = format!("{MAGIC}{salt}{padding}");
    let mut prev = salt;
    for (pos, byte) in plain.bytes().enumerate() {
        let encode = ENCODING[pos % ENCODING.len()];
        let mut remaining = byte as u32;
        let mut gaps = vec![0u32; encode.len()];
        for (idx, modulus) in encode.iter().enumerate().rev() {
            gaps[idx] = remaining / modulus;
            remaining %= modulus;
        }
        for g in gaps {
            let pos = (g as usize + ALPHA_NUM.get(&prev).copied().unwrap_or(0) + 1)
                % NUM_ALPHA.len();
            prev = NUM_ALPHA[pos];
            crypt.push(prev);
        }
    }
    crypt
}

fn gap(from: char, to: char) -> Result<u32, String> {
    let a = *ALPHA_NUM
        .get(&from)
        .ok_or_else(|| format!("unexpected character {from:?}"))? as i64;
    let b = *ALPHA_NUM
        .get(&to)
        .ok_or_else(|| format!("unexpected character {to:?}"))? as i64;
    let distance = (b - a).rem_euclid(NUM_ALPHA.len() as i64) - 1;
    u32::try_from(distance).map_err(|_| format!("repeated character {to:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_strings() {
        assert_eq!(
            junos_decode("$9$QzF3nA0EhrvMXEcK8LxsY").expect("decode"),
            "secret"
        );
        assert_eq!(
            junos_decode("$9$dVw2ajHmFnCZUnCtuEhVwYgZUik.5z3").expect("decode"),
            "juniper123"
        );
    }

    #[test]
    fn explicit_salt_matches_device_encoding() {
        assert_eq!(
            encode_with_salt("secret", 'Q', "zF3"),
            "$9$QzF3nA0EhrvMXEcK8LxsY"
        );
    }

    #[test]
    fn derived_salt_is_stable_and_decodable() {
        let first = junos_encode("s3cr3t key");
        assert_eq!(first, junos_encode("s3cr3t key"));
        assert_eq!(junos_decode(&first).expect("decode"), "s3cr3t key");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            junos_decode("$1$abc"),
            Err(JunosError::Decode { .. })
        ));
        assert!(junos_decode("$9$").is_err());
        assert!(junos_decode("$9$Q!").is_err());
        assert!(!is_junos_encoded("$9$"));
    }

    #[test]
    fn values_above_a_byte_are_rejected() {
        // gaps 0, 0, 8 weigh 8 * 32 = 256 in the first character slot
        let mut crypt = format!("{MAGIC}QzF3");
        let mut prev = 'Q';
        for gap in [0usize, 0, 8] {
            prev = NUM_ALPHA[(gap + ALPHA_NUM[&prev] + 1) % NUM_ALPHA.len()];
            crypt.push(prev);
        }
        let err = junos_decode(&crypt).expect_err("out of range");
        assert!(matches!(err, JunosError::Decode { .. }));
        assert!(err.to_string().contains("256"));
    }
}
