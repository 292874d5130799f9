use std::sync::Arc;

use metrics::counter;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, postgres::PgArguments, query::Query};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::application::repos::RepoError;
use crate::cache::{CacheError, CacheStore, METRIC_CACHE_WRITE_FAILURE, WriteBatch};
use crate::domain::Record;

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(db) if db.message().contains("duplicate key") => {
            RepoError::Duplicate {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            }
        }
        sqlx::Error::Database(db)
            if db.message().contains("violates foreign key constraint")
                || db.message().contains("invalid input syntax") =>
        {
            RepoError::InvalidInput {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db) if db.message().contains("violates") => RepoError::Integrity {
            message: db.message().to_string(),
        },
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to user request") =>
        {
            RepoError::Timeout
        }
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        other => RepoError::from_persistence(other),
    }
}

/// Positional parameter for runtime-built seed queries.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Uuid(Uuid),
    Timestamp(OffsetDateTime),
}

impl From<&str> for SqlArg {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlArg {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlArg {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Uuid> for SqlArg {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<OffsetDateTime> for SqlArg {
    fn from(value: OffsetDateTime) -> Self {
        Self::Timestamp(value)
    }
}

pub(crate) fn bind_args<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    args: &[SqlArg],
) -> Query<'q, Postgres, PgArguments> {
    for arg in args {
        query = match arg {
            SqlArg::Text(value) => query.bind(value.clone()),
            SqlArg::Int(value) => query.bind(*value),
            SqlArg::Float(value) => query.bind(*value),
            SqlArg::Bool(value) => query.bind(*value),
            SqlArg::Uuid(value) => query.bind(*value),
            SqlArg::Timestamp(value) => query.bind(*value),
        };
    }
    query
}

/// Scan the shared identity columns, optionally behind a column prefix.
pub(crate) fn scan_record(row: &PgRow, prefix: &str) -> Result<Record, sqlx::Error> {
    Ok(Record {
        uuid: row.try_get(format!("{prefix}uuid").as_str())?,
        rand_id: row.try_get(format!("{prefix}rand_id").as_str())?,
        created_at: row.try_get(format!("{prefix}created_at").as_str())?,
        updated_at: row.try_get(format!("{prefix}updated_at").as_str())?,
    })
}

/// Mirror a committed write into the cache.
///
/// The relational commit already happened, so a failure here is logged and
/// counted instead of returned. Affected entries heal on expiry or reseed.
pub(crate) async fn sync_cache<F>(store: &Arc<dyn CacheStore>, entity: &'static str, stage: F)
where
    F: FnOnce(&mut WriteBatch) -> Result<(), CacheError>,
{
    let mut batch = WriteBatch::new();
    let result = match stage(&mut batch) {
        Ok(()) => store.apply(batch).await.map_err(CacheError::from),
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        counter!(METRIC_CACHE_WRITE_FAILURE, "entity" => entity).increment(1);
        warn!(
            target: "reseed::infra::db",
            entity,
            error = %err,
            "Cache update failed after relational commit"
        );
    }
}
