//! Salted, reversible integer-to-string encoding in the Hashids scheme.
//!
//! Sequential inputs produce codes that do not look sequential, and every
//! input maps to a distinct code for a fixed salt and alphabet.

use super::GeneratorError;

pub const BASE62_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

const DEFAULT_SEPARATORS: &str = "cfhistuCFHISTU";
const SEPARATOR_DIV: f64 = 3.5;
const GUARD_DIV: f64 = 12.0;
const MIN_ALPHABET_LENGTH: usize = 16;

#[derive(Debug, Clone)]
pub struct CodeEncoder {
    salt: Vec<char>,
    alphabet: Vec<char>,
    separators: Vec<char>,
    guards: Vec<char>,
    min_length: usize,
}

impl CodeEncoder {
    pub fn new(salt: &str, alphabet: &str, min_length: usize) -> Result<Self, GeneratorError> {
        let mut unique: Vec<char> = Vec::with_capacity(alphabet.len());
        for c in alphabet.chars() {
            if !unique.contains(&c) {
                unique.push(c);
            }
        }

        if unique.len() < MIN_ALPHABET_LENGTH {
            return Err(GeneratorError::InvalidAlphabet(format!(
                "alphabet must contain at least {MIN_ALPHABET_LENGTH} unique characters"
            )));
        }
        if unique.iter().any(|c| c.is_whitespace()) {
            return Err(GeneratorError::InvalidAlphabet(
                "alphabet must not contain whitespace".to_string(),
            ));
        }

        let salt: Vec<char> = salt.chars().collect();

        let mut separators: Vec<char> = DEFAULT_SEPARATORS
            .chars()
            .filter(|c| unique.contains(c))
            .collect();
        let mut alphabet: Vec<char> = unique
            .into_iter()
            .filter(|c| !separators.contains(c))
            .collect();

        consistent_shuffle(&mut separators, &salt);

        if separators.is_empty()
            || (alphabet.len() as f64 / separators.len() as f64) > SEPARATOR_DIV
        {
            let mut wanted = (alphabet.len() as f64 / SEPARATOR_DIV).ceil() as usize;
            if wanted == 1 {
                wanted += 1;
            }

            if wanted > separators.len() {
                let diff = (wanted - separators.len()).min(alphabet.len());
                separators.extend(alphabet.drain(..diff));
            } else {
                separators.truncate(wanted);
            }
        }

        consistent_shuffle(&mut alphabet, &salt);

        let guard_count = (alphabet.len() as f64 / GUARD_DIV).ceil() as usize;
        let guards: Vec<char> = if alphabet.len() < 3 {
            separators.drain(..guard_count.min(separators.len())).collect()
        } else {
            alphabet.drain(..guard_count).collect()
        };

        Ok(Self {
            salt,
            alphabet,
            separators,
            guards,
            min_length,
        })
    }

    /// Every character that can appear in an encoded value
    #[cfg(test)]
    pub fn symbols(&self) -> impl Iterator<Item = char> + '_ {
        self.alphabet
            .iter()
            .chain(self.separators.iter())
            .chain(self.guards.iter())
            .copied()
    }

    pub fn encode(&self, value: u64) -> String {
        let mut alphabet = self.alphabet.clone();
        let len = alphabet.len() as u64;
        let value_hash = value % 100;

        let lottery = alphabet[(value_hash % len) as usize];
        let mut code = vec![lottery];

        let mut buffer = Vec::with_capacity(1 + self.salt.len() + alphabet.len());
        buffer.push(lottery);
        buffer.extend_from_slice(&self.salt);
        buffer.extend_from_slice(&alphabet);
        buffer.truncate(alphabet.len());
        consistent_shuffle(&mut alphabet, &buffer);

        code.extend(hash(value, &alphabet));

        if code.len() < self.min_length && !self.guards.is_empty() {
            let guards = self.guards.len() as u64;
            let index = (value_hash + u64::from(code[0])) % guards;
            code.insert(0, self.guards[index as usize]);

            if code.len() < self.min_length {
                let index = (value_hash + u64::from(code[2])) % guards;
                code.push(self.guards[index as usize]);
            }
        }

        let half = alphabet.len() / 2;
        while code.len() < self.min_length {
            let key = alphabet.clone();
            consistent_shuffle(&mut alphabet, &key);

            let mut padded = Vec::with_capacity(alphabet.len() + code.len());
            padded.extend_from_slice(&alphabet[half..]);
            padded.extend_from_slice(&code);
            padded.extend_from_slice(&alphabet[..half]);
            code = padded;

            if code.len() > self.min_length {
                let start = (code.len() - self.min_length) / 2;
                code = code[start..start + self.min_length].to_vec();
            }
        }

        code.into_iter().collect()
    }
}

fn hash(mut value: u64, alphabet: &[char]) -> Vec<char> {
    let len = alphabet.len() as u64;
    let mut out = Vec::new();
    loop {
        out.push(alphabet[(value % len) as usize]);
        value /= len;
        if value == 0 {
            break;
        }
    }
    out.reverse();
    out
}

fn consistent_shuffle(alphabet: &mut [char], salt: &[char]) {
    if salt.is_empty() || alphabet.len() < 2 {
        return;
    }

    let mut v = 0usize;
    let mut p = 0usize;
    let mut i = alphabet.len() - 1;
    while i > 0 {
        v %= salt.len();
        let int = salt[v] as usize;
        p += int;
        let j = (int + v + p) % i;
        alphabet.swap(i, j);
        i -= 1;
        v += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn encoder(salt: &str) -> CodeEncoder {
        CodeEncoder::new(salt, BASE62_ALPHABET, 7).unwrap()
    }

    #[test]
    fn codes_are_unique_across_a_long_run() {
        let encoder = encoder("pepper");
        let mut seen = HashSet::new();
        for value in 0..50_000u64 {
            assert!(seen.insert(encoder.encode(value)), "collision at {value}");
        }
    }

    #[test]
    fn codes_respect_min_length_and_alphabet() {
        let encoder = encoder("pepper");
        for value in [0, 1, 2, 61, 62, 999, 1 << 20, 1 << 40, u64::MAX] {
            let code = encoder.encode(value);
            assert!(code.len() >= 7, "{code} is too short");
            assert!(
                code.chars().all(|c| BASE62_ALPHABET.contains(c)),
                "{code} has characters outside the alphabet"
            );
        }
    }

    #[test]
    fn large_values_grow_past_min_length() {
        let encoder = encoder("pepper");
        assert!(encoder.encode(u64::MAX).len() > 7);
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = encoder("pepper");
        let b = encoder("pepper");
        for value in 0..100 {
            assert_eq!(a.encode(value), b.encode(value));
        }
    }

    #[test]
    fn salt_changes_the_codes() {
        let a = encoder("pepper");
        let b = encoder("paprika");
        let differing = (1..100).filter(|v| a.encode(*v) != b.encode(*v)).count();
        assert!(differing > 90);
    }

    #[test]
    fn consecutive_values_do_not_share_a_prefix_pattern() {
        let encoder = encoder("pepper");
        let first = encoder.encode(1000);
        let second = encoder.encode(1001);
        assert_ne!(first, second);
        assert_ne!(&first[..4], &second[..4]);
    }

    #[test]
    fn symbols_cover_the_whole_alphabet() {
        let encoder = encoder("");
        let symbols: HashSet<char> = encoder.symbols().collect();
        assert_eq!(symbols.len(), 62);
    }

    #[test]
    fn rejects_short_alphabets() {
        let err = CodeEncoder::new("salt", "abc123", 7).unwrap_err();
        assert!(matches!(err, GeneratorError::InvalidAlphabet(_)));
    }

    #[test]
    fn rejects_whitespace_in_alphabet() {
        let err = CodeEncoder::new("salt", "abcdefghijklmnop qrstuv", 7).unwrap_err();
        assert!(matches!(err, GeneratorError::InvalidAlphabet(_)));
    }
}
