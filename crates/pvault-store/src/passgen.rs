//! Random password generation

use rand::seq::SliceRandom;
use rand::Rng;

use pvault_core::config::DEFAULT_ALPHABET;
use pvault_core::{VaultError, VaultResult};

/// `length` characters drawn uniformly from `alphabet` (the default
/// alphabet when empty).
pub fn passgen(length: usize, alphabet: &str) -> VaultResult<String> {
    passgen_with(length, alphabet, &mut rand::thread_rng())
}

pub fn passgen_with<R: Rng + ?Sized>(
    length: usize,
    alphabet: &str,
    rng: &mut R,
) -> VaultResult<String> {
    if length == 0 {
        return Err(VaultError::Validation("the password length must be at least 1".into()));
    }
    let alphabet = if alphabet.is_empty() {
        DEFAULT_ALPHABET
    } else {
        alphabet
    };
    if alphabet.contains(['\n', '\t', '\\']) {
        return Err(VaultError::Validation(
            "the alphabet can not contain newlines, tabs or backslashes".into(),
        ));
    }

    let chars: Vec<char> = alphabet.chars().collect();
    (0..length)
        .map(|_| chars.choose(rng).copied())
        .collect::<Option<String>>()
        .ok_or_else(|| VaultError::Validation("the alphabet is empty".into()))
}
