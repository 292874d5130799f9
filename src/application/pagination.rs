//! Shared cursor pagination helpers.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct TimelineCursorPayload {
    #[serde(rename = "l", default)]
    last_rand_ids: Vec<String>,
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    position: Option<String>,
}

/// Opaque client cursor for timeline feeds: the public ids already seen,
/// plus the position token of the last page as a fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineCursor {
    last_rand_ids: Vec<String>,
    position: Option<String>,
}

impl TimelineCursor {
    /// Cursor of the first page.
    pub fn start() -> Self {
        Self::default()
    }

    pub fn new(last_rand_ids: Vec<String>, position: Option<String>) -> Self {
        Self {
            last_rand_ids,
            position,
        }
    }

    pub fn last_rand_ids(&self) -> &[String] {
        &self.last_rand_ids
    }

    pub fn last(&self) -> Option<&str> {
        self.last_rand_ids.last().map(String::as_str)
    }

    pub fn position(&self) -> Option<&str> {
        self.position.as_deref()
    }

    pub fn is_start(&self) -> bool {
        self.last_rand_ids.is_empty() && self.position.is_none()
    }

    pub fn encode(&self) -> Result<String, PaginationError> {
        let payload = TimelineCursorPayload {
            last_rand_ids: self.last_rand_ids.clone(),
            position: self.position.clone(),
        };
        let serialized = serde_json::to_vec(&payload)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(serialized))
    }

    pub fn decode(cursor: &str) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        let payload: TimelineCursorPayload = serde_json::from_slice(&bytes)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        Ok(Self {
            last_rand_ids: payload.last_rand_ids,
            position: payload.position,
        })
    }
}

/// Cursor-aware page result.
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> CursorPage<T> {
    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}
