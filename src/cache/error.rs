use thiserror::Error;

use super::store::StoreError;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Key absent, expired, or holding the blank sentinel.
    #[error("`{key}` is not cached")]
    NotFound { key: String },
    /// A cursor member is no longer part of the structure.
    #[error("cursor member `{rand_id}` is no longer present in `{key}`")]
    StalePagination { key: String, rand_id: String },
    #[error("key template `{template}` takes {expected} parameter(s), got {got}")]
    InvalidKeyParams {
        template: String,
        expected: usize,
        got: usize,
    },
    #[error("invalid position token: {0}")]
    InvalidPosition(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cached payload could not be (de)serialized: {0}")]
    Codec(#[from] serde_json::Error),
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }

    pub fn is_stale_pagination(&self) -> bool {
        matches!(self, CacheError::StalePagination { .. })
    }
}
