//! Short code generation from a durable, atomically incremented sequence.

mod encoder;

pub use encoder::{CodeEncoder, BASE62_ALPHABET};

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::{CodeConfig, MIN_CODE_LENGTH};
use crate::storage::Storage;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("sequence counter unavailable: {0}")]
    Counter(#[source] anyhow::Error),
    #[error("invalid code alphabet: {0}")]
    InvalidAlphabet(String),
    #[error("minimum code length {0} is below {MIN_CODE_LENGTH}")]
    MinLengthTooShort(usize),
}

/// Produces a fresh short code per call.
///
/// Uniqueness comes from the store's sequence: every increment is observed by
/// exactly one caller, and the encoder is injective over the sequence domain.
pub struct CodeGenerator {
    storage: Arc<dyn Storage>,
    encoder: CodeEncoder,
    sequence_name: String,
}

impl CodeGenerator {
    pub fn new(storage: Arc<dyn Storage>, config: &CodeConfig) -> Result<Self, GeneratorError> {
        if config.min_length < MIN_CODE_LENGTH {
            return Err(GeneratorError::MinLengthTooShort(config.min_length));
        }
        let encoder = CodeEncoder::new(&config.salt, BASE62_ALPHABET, config.min_length)?;
        Ok(Self {
            storage,
            encoder,
            sequence_name: config.sequence_name.clone(),
        })
    }

    #[cfg(test)]
    fn encoder(&self) -> &CodeEncoder {
        &self.encoder
    }

    pub async fn next(&self) -> Result<String, GeneratorError> {
        let value = self
            .storage
            .next_sequence(&self.sequence_name)
            .await
            .map_err(|err| {
                error!(sequence = %self.sequence_name, error = %err, "failed to advance code sequence");
                GeneratorError::Counter(err)
            })?;

        let code = self.encoder.encode(value);
        debug!(sequence_value = value, short_code = %code, "generated short code");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use std::collections::HashSet;

    async fn generator() -> CodeGenerator {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        let config = CodeConfig {
            salt: "unit-test".to_string(),
            ..CodeConfig::default()
        };
        CodeGenerator::new(Arc::new(storage), &config).unwrap()
    }

    #[tokio::test]
    async fn consecutive_codes_differ() {
        let generator = generator().await;
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let code = generator.next().await.unwrap();
            assert!(code.len() >= 7);
            assert!(seen.insert(code));
        }
    }

    #[tokio::test]
    async fn first_code_encodes_sequence_value_one() {
        let generator = generator().await;
        let code = generator.next().await.unwrap();
        assert_eq!(code, generator.encoder().encode(1));
    }

    #[tokio::test]
    async fn short_minimum_length_is_rejected() {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        let config = CodeConfig {
            min_length: 4,
            ..CodeConfig::default()
        };
        assert!(matches!(
            CodeGenerator::new(Arc::new(storage), &config),
            Err(GeneratorError::MinLengthTooShort(4))
        ));
    }
}
