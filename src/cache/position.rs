//! Opaque absolute position inside a sorted structure.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use super::error::CacheError;

/// Rank and score of the last member a page returned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionToken {
    pub rank: u64,
    pub score: f64,
}

impl PositionToken {
    pub fn new(rank: u64, score: f64) -> Self {
        Self { rank, score }
    }

    pub fn encode(&self) -> Result<String, CacheError> {
        let serialized = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(serialized))
    }

    pub fn decode(token: &str) -> Result<Self, CacheError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|err| CacheError::InvalidPosition(err.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|err| CacheError::InvalidPosition(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_url_safe() {
        let token = PositionToken::new(9, 1_714_564_800_123.0)
            .encode()
            .expect("encode");
        assert!(!token.contains(['+', '/', '=']));
        assert_eq!(
            PositionToken::decode(&token).expect("decode"),
            PositionToken::new(9, 1_714_564_800_123.0)
        );
    }

    #[test]
    fn garbage_is_an_invalid_position() {
        for token in ["not base64!", "e30"] {
            let err = PositionToken::decode(token).unwrap_err();
            assert!(matches!(err, CacheError::InvalidPosition(_)), "{token}");
        }
    }
}
