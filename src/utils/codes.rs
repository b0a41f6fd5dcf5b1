// src/utils/codes.rs

use std::sync::LazyLock;

use chrono::Datelike;
use rand::Rng;
use regex::Regex;

use crate::config::{DELIVERY_TOKEN_LENGTH, GROUP_CODE_LENGTH};

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

static NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

fn random_string(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// Per-taker access token for a delivery, e.g. `K7Q2ZP0A`.
pub fn delivery_token() -> String {
    random_string(TOKEN_ALPHABET, DELIVERY_TOKEN_LENGTH)
}

/// Group join code, e.g. `QWERTY`.
pub fn group_code() -> String {
    random_string(CODE_ALPHABET, GROUP_CODE_LENGTH)
}

/// Registration number for the `sequence`-th taker of `year`: `T20250042`.
pub fn registration_number(year: i32, sequence: i64) -> String {
    format!("T{}{:04}", year, sequence)
}

/// Registration number for the next taker given the current taker count.
pub fn next_registration_number(existing_takers: i64) -> String {
    registration_number(chrono::Utc::now().year(), existing_takers + 1)
}

/// URL slug from a display name: `"RS Siloam (Jakarta)"` -> `"rs-siloam-jakarta"`.
pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    NON_ALNUM
        .replace_all(&lower, "-")
        .trim_matches('-')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_token_shape() {
        let token = delivery_token();
        assert_eq!(token.len(), 8);
        assert!(token.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
    }

    #[test]
    fn group_code_is_uppercase_letters() {
        let code = group_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn registration_number_is_zero_padded() {
        assert_eq!(registration_number(2025, 1), "T20250001");
        assert_eq!(registration_number(2025, 12345), "T202512345");
    }

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify("PT Medxamion Indonesia"), "pt-medxamion-indonesia");
        assert_eq!(slugify("  RS Siloam (Jakarta) "), "rs-siloam-jakarta");
        assert_eq!(slugify("---"), "");
    }
}
