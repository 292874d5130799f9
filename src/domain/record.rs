//! Identity and timestamp contract shared by every cached entity.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::OffsetDateTime;
use uuid::Uuid;

/// Length in bytes of the random material behind a public id (16 base64url chars).
const RAND_ID_BYTES: usize = 12;

/// Common identity fields.
///
/// `uuid` is the internal primary key and never leaves the relational store's
/// vocabulary. `rand_id` is the public id: it keys every cache entry and every
/// pagination cursor, and is immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub uuid: Uuid,
    pub rand_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Record {
    /// Fresh identity stamped with the current time.
    pub fn new() -> Self {
        let now = truncate_to_millis(OffsetDateTime::now_utc());
        Self {
            uuid: Uuid::new_v4(),
            rand_id: generate_rand_id(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Identity with an explicit creation time, used when ordering matters.
    pub fn with_created_at(created_at: OffsetDateTime) -> Self {
        let created_at = truncate_to_millis(created_at);
        Self {
            created_at,
            updated_at: created_at,
            ..Self::new()
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = truncate_to_millis(OffsetDateTime::now_utc());
    }
}

/// Timestamps carry exactly the precision of [`time_score`], so the stored
/// `created_at` and the cached score order rows identically.
fn truncate_to_millis(at: OffsetDateTime) -> OffsetDateTime {
    at.replace_nanosecond(at.nanosecond() / 1_000_000 * 1_000_000)
        .unwrap_or(at)
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate an opaque, url-safe public id.
pub fn generate_rand_id() -> String {
    let uuid = Uuid::new_v4();
    URL_SAFE_NO_PAD.encode(&uuid.as_bytes()[..RAND_ID_BYTES])
}

/// Capability every cached entity provides to the generic structures.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn record(&self) -> &Record;

    fn rand_id(&self) -> &str {
        &self.record().rand_id
    }

    fn uuid(&self) -> Uuid {
        self.record().uuid
    }

    fn created_at(&self) -> OffsetDateTime {
        self.record().created_at
    }

    /// Numeric projection of a named field, used as an alternative sort score.
    fn score_field(&self, _field: &str) -> Option<f64> {
        None
    }
}

/// Default sorted-set score: creation time in unix milliseconds.
pub fn time_score(at: OffsetDateTime) -> f64 {
    (at.unix_timestamp_nanos() / 1_000_000) as f64
}

/// Inverse of [`time_score`].
pub fn score_time(score: f64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(score as i128 * 1_000_000).ok()
}
