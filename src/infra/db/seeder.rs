//! SQL-backed backfill for the cache structures.
//!
//! Every seed scans all of its rows before touching the cache and commits
//! them as one [`WriteBatch`]. A failed or cancelled seed therefore leaves
//! the cache exactly as it was. Caller arguments bind to `$1..$n`; values
//! the seeder adds itself (reference keyset, limit, range bounds) bind after
//! them, in that order.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use sqlx::postgres::PgRow;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use crate::application::repos::RepoError;
use crate::cache::{
    Base, CacheError, GroupedSorted, METRIC_SEED, METRIC_SEED_MS, METRIC_SEED_ROWS, Page,
    Relation, TimeSeries, Timeline, WriteBatch,
};
use crate::domain::Entity;

use super::PostgresRepositories;
use super::util::{SqlArg, bind_args, map_sqlx_error};

pub type ScanFn<T> = fn(&PgRow) -> Result<T, sqlx::Error>;

/// Statements behind a partial timeline seed.
#[derive(Debug, Clone, Copy)]
pub struct TimelineQueries {
    /// One row by public id, its only parameter.
    pub row: &'static str,
    /// Head of the timeline; binds the limit.
    pub first_page: &'static str,
    /// Rows strictly past a reference row in `(score, rand_id)` order; binds
    /// the reference score, the reference public id, then the limit.
    pub next_page: &'static str,
}

trait JoinScan<P>: Send + Sync {
    fn attach(&self, batch: &mut WriteBatch, primary: &mut P, row: &PgRow)
    -> Result<(), RepoError>;
}

/// A [`Relation`] fed from LEFT JOIN columns of the seed row.
pub struct JoinedRelation<P, S> {
    relation: Relation<P, S>,
    scan: ScanFn<Option<S>>,
    required: bool,
}

impl<P: Entity, S: Entity> JoinedRelation<P, S> {
    /// `scan` returns `None` when the join discriminator column is null.
    pub fn new(relation: Relation<P, S>, scan: ScanFn<Option<S>>) -> Self {
        Self {
            relation,
            scan,
            required: false,
        }
    }

    /// Abort the seed when a row's join comes back empty.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

impl<P: Entity, S: Entity> JoinScan<P> for JoinedRelation<P, S> {
    fn attach(
        &self,
        batch: &mut WriteBatch,
        primary: &mut P,
        row: &PgRow,
    ) -> Result<(), RepoError> {
        let secondary = (self.scan)(row).map_err(map_sqlx_error)?;
        self.relation
            .attach_scanned(batch, primary, secondary, self.required)
            .map_err(|err| join_failure(err, self.relation.name(), primary.rand_id()))
    }
}

/// A required join that came back empty is a broken row, not a missing one.
fn join_failure(err: CacheError, relation: &str, rand_id: &str) -> RepoError {
    match err {
        CacheError::NotFound { key } => RepoError::Integrity {
            message: format!("required `{relation}` join is empty for `{rand_id}` ({key})"),
        },
        other => RepoError::from(other),
    }
}

/// Row shape of one entity plus its joined relations.
pub struct Scanner<T> {
    scan: ScanFn<T>,
    joins: Vec<Box<dyn JoinScan<T>>>,
}

impl<T: Entity> Scanner<T> {
    pub fn new(scan: ScanFn<T>) -> Self {
        Self {
            scan,
            joins: Vec::new(),
        }
    }

    pub fn with_join<S: Entity>(mut self, join: JoinedRelation<T, S>) -> Self {
        self.joins.push(Box::new(join));
        self
    }

    pub fn scan(&self, row: &PgRow) -> Result<T, RepoError> {
        (self.scan)(row).map_err(map_sqlx_error)
    }

    /// Stage the bare entity into `base`, then attach and stage its joins.
    /// The returned entity carries the attached relations.
    fn stage_row(
        &self,
        batch: &mut WriteBatch,
        base: &Base<T>,
        row: &PgRow,
    ) -> Result<T, RepoError> {
        let mut item = self.scan(row)?;
        base.stage_upsert(batch, &item)?;
        for join in &self.joins {
            join.attach(batch, &mut item, row)?;
        }
        Ok(item)
    }
}

pub struct Seeder<T> {
    db: PostgresRepositories,
    scanner: Arc<Scanner<T>>,
}

impl<T> Clone for Seeder<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            scanner: Arc::clone(&self.scanner),
        }
    }
}

impl<T: Entity> Seeder<T> {
    pub fn new(db: PostgresRepositories, scanner: Scanner<T>) -> Self {
        Self {
            db,
            scanner: Arc::new(scanner),
        }
    }

    pub fn scanner(&self) -> &Scanner<T> {
        &self.scanner
    }

    /// Load one row by public id; a missing row is cached as blank.
    #[instrument(level = "debug", skip(self, base, sql))]
    pub async fn seed_one(
        &self,
        base: &Base<T>,
        sql: &str,
        rand_id: &str,
    ) -> Result<Option<T>, RepoError> {
        let started = Instant::now();
        let row = self.fetch_optional(sql, &[SqlArg::from(rand_id)]).await?;
        let mut batch = WriteBatch::new();
        let item = match row {
            Some(row) => Some(self.scanner.stage_row(&mut batch, base, &row)?),
            None => {
                base.stage_blank(&mut batch, rand_id)?;
                None
            }
        };
        commit(base, batch).await?;
        record("point", usize::from(item.is_some()), started);
        Ok(item)
    }

    /// Like [`Seeder::seed_one`], keyed by a lookup alias instead of the public id.
    #[instrument(level = "debug", skip_all)]
    pub async fn seed_one_by_lookup(
        &self,
        base: &Base<T>,
        sql: &str,
        alias: &str,
    ) -> Result<Option<T>, RepoError> {
        let started = Instant::now();
        let row = self.fetch_optional(sql, &[SqlArg::from(alias)]).await?;
        let item = match row {
            Some(row) => {
                let mut batch = WriteBatch::new();
                let item = self.scanner.stage_row(&mut batch, base, &row)?;
                base.stage_lookup(&mut batch, alias, item.rand_id())?;
                commit(base, batch).await?;
                Some(item)
            }
            None => {
                base.set_lookup_blank(alias).await?;
                None
            }
        };
        record("point", usize::from(item.is_some()), started);
        Ok(item)
    }

    /// Fill the shortfall of a timeline page.
    ///
    /// `subtraction` is how many items the short page already held and
    /// `last_rand_id` the furthest id the caller has seen. Without one, the
    /// head of the timeline is loaded.
    #[instrument(level = "debug", skip(self, timeline, queries, args))]
    pub async fn seed_timeline(
        &self,
        timeline: &Timeline<T>,
        queries: &TimelineQueries,
        args: &[SqlArg],
        group: &[&str],
        subtraction: usize,
        last_rand_id: Option<&str>,
    ) -> Result<usize, RepoError> {
        let started = Instant::now();
        let shortfall = timeline.page_size().saturating_sub(subtraction);
        if shortfall == 0 {
            return Ok(0);
        }
        let limit = SqlArg::Int(shortfall as i64);

        let rows = match last_rand_id {
            None => self.fetch_all(queries.first_page, args, &[limit]).await?,
            Some(last) => {
                let Some([score, rand_id]) = self.reference(timeline, queries.row, last).await?
                else {
                    warn!(
                        target: "reseed::infra::db::seeder",
                        "Cursor row vanished from the relational store; nothing to continue from"
                    );
                    return Ok(0);
                };
                self.fetch_all(queries.next_page, args, &[score, rand_id, limit])
                    .await?
            }
        };

        let mut batch = WriteBatch::new();
        for row in &rows {
            let item = self.scanner.stage_row(&mut batch, timeline.base(), row)?;
            timeline.stage_add(&mut batch, &item, group)?;
        }
        commit(timeline.base(), batch).await?;
        record("timeline", rows.len(), started);
        Ok(rows.len())
    }

    /// Load an entire group.
    #[instrument(level = "debug", skip(self, sorted, sql, args))]
    pub async fn seed_sorted(
        &self,
        sorted: &GroupedSorted<T>,
        sql: &str,
        args: &[SqlArg],
        group: &[&str],
    ) -> Result<usize, RepoError> {
        let started = Instant::now();
        let rows = self.fetch_all(sql, args, &[]).await?;
        let mut batch = WriteBatch::new();
        for row in &rows {
            let item = self.scanner.stage_row(&mut batch, sorted.base(), row)?;
            sorted.stage_add(&mut batch, &item, group)?;
        }
        commit(sorted.base(), batch).await?;
        record("sorted", rows.len(), started);
        Ok(rows.len())
    }

    /// Load every row up to the end of `page_number`; binds the limit.
    #[instrument(level = "debug", skip(self, page, sql, args))]
    pub async fn seed_page(
        &self,
        page: &Page<T>,
        sql: &str,
        args: &[SqlArg],
        group: &[&str],
        page_number: u64,
    ) -> Result<usize, RepoError> {
        if page_number == 0 {
            return Err(RepoError::InvalidInput {
                message: "page numbers start at 1".to_string(),
            });
        }
        let started = Instant::now();
        let limit = i64::try_from(page.seed_limit(page_number)).unwrap_or(i64::MAX);
        let rows = self.fetch_all(sql, args, &[SqlArg::Int(limit)]).await?;
        let mut batch = WriteBatch::new();
        for row in &rows {
            let item = self.scanner.stage_row(&mut batch, page.base(), row)?;
            page.stage_add(&mut batch, &item, group)?;
        }
        commit(page.base(), batch).await?;
        record("page", rows.len(), started);
        Ok(rows.len())
    }

    /// Load `[lower, upper]` and record it as covered; binds both bounds.
    #[instrument(level = "debug", skip(self, series, sql, args))]
    pub async fn seed_time_range(
        &self,
        series: &TimeSeries<T>,
        sql: &str,
        args: &[SqlArg],
        group: &[&str],
        lower: OffsetDateTime,
        upper: OffsetDateTime,
    ) -> Result<usize, RepoError> {
        let started = Instant::now();
        let rows = self
            .fetch_all(
                sql,
                args,
                &[SqlArg::Timestamp(lower), SqlArg::Timestamp(upper)],
            )
            .await?;
        let mut batch = WriteBatch::new();
        for row in &rows {
            let item = self.scanner.stage_row(&mut batch, series.base(), row)?;
            series.stage_add(&mut batch, &item, group)?;
        }
        series.stage_coverage(&mut batch, group, lower, upper)?;
        commit(series.base(), batch).await?;
        record("time_series", rows.len(), started);
        Ok(rows.len())
    }

    /// Keyset the next-page query seeks past: the sorting field when one is
    /// set, otherwise the creation time, then the public id. Equal scores
    /// order by public id in the cache as well, so ties are never skipped.
    async fn reference(
        &self,
        timeline: &Timeline<T>,
        sql: &str,
        rand_id: &str,
    ) -> Result<Option<[SqlArg; 2]>, RepoError> {
        let Some(row) = self.fetch_optional(sql, &[SqlArg::from(rand_id)]).await? else {
            return Ok(None);
        };
        let item = self.scanner.scan(&row)?;
        let score = match timeline.sorting_reference() {
            Some(_) => SqlArg::Float(timeline.score(&item)),
            None => SqlArg::Timestamp(item.created_at()),
        };
        Ok(Some([score, SqlArg::from(item.rand_id())]))
    }

    async fn fetch_all(
        &self,
        sql: &str,
        args: &[SqlArg],
        trailing: &[SqlArg],
    ) -> Result<Vec<PgRow>, RepoError> {
        let query = bind_args(bind_args(sqlx::query(sql), args), trailing);
        query
            .fetch_all(self.db.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn fetch_optional(&self, sql: &str, args: &[SqlArg]) -> Result<Option<PgRow>, RepoError> {
        bind_args(sqlx::query(sql), args)
            .fetch_optional(self.db.pool())
            .await
            .map_err(map_sqlx_error)
    }
}

async fn commit<T: Entity>(base: &Base<T>, batch: WriteBatch) -> Result<(), RepoError> {
    if batch.is_empty() {
        return Ok(());
    }
    base.store()
        .apply(batch)
        .await
        .map_err(CacheError::from)?;
    Ok(())
}

fn record(structure: &'static str, rows: usize, started: Instant) {
    counter!(METRIC_SEED, "structure" => structure).increment(1);
    counter!(METRIC_SEED_ROWS, "structure" => structure).increment(rows as u64);
    histogram!(METRIC_SEED_MS, "structure" => structure)
        .record(started.elapsed().as_secs_f64() * 1000.0);
    debug!(
        target: "reseed::infra::db::seeder",
        structure,
        rows,
        "Seed committed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::error::{AppError, FailureKind};

    #[test]
    fn empty_required_join_is_an_integrity_failure() {
        let err = join_failure(
            CacheError::NotFound {
                key: "account:<none>".to_string(),
            },
            "account",
            "t1",
        );
        assert!(matches!(
            &err,
            RepoError::Integrity { message } if message.contains("account") && message.contains("t1")
        ));
        assert_eq!(AppError::from(err).kind(), FailureKind::Internal);
    }

    #[test]
    fn other_cache_failures_pass_through() {
        let err = join_failure(
            CacheError::InvalidPosition("bad".to_string()),
            "account",
            "t1",
        );
        assert!(matches!(err, RepoError::Cache(CacheError::InvalidPosition(_))));
    }
}
