//! Range queries over a time-scored sorted set.
//!
//! Seeding `[lo, hi]` also records the interval in a companion coverage set
//! (member `"lo:hi"`, score `lo`). A fetch is reported complete only when a
//! recorded interval contains the requested one. Coverage and members share
//! a TTL and writes may race a seed, so this stays a heuristic.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::instrument;

use crate::domain::{Entity, time_score};

use super::base::Base;
use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::{KeyTemplate, coverage_key};
use super::membership::Membership;
use super::relation::Enrichment;
use super::store::{Order, WriteBatch};

#[derive(Debug, Clone, PartialEq)]
pub struct TimeRangeResult<T> {
    pub items: Vec<T>,
    pub may_be_incomplete: bool,
}

pub struct TimeSeries<T> {
    inner: Membership<T>,
}

fn interval_member(lo: f64, hi: f64) -> String {
    format!("{lo}:{hi}")
}

fn parse_interval(member: &str) -> Option<(f64, f64)> {
    let (lo, hi) = member.split_once(':')?;
    Some((lo.parse().ok()?, hi.parse().ok()?))
}

impl<T: Entity> TimeSeries<T> {
    pub fn new(
        base: Base<T>,
        template: impl Into<KeyTemplate>,
        config: &CacheConfig,
        order: Order,
    ) -> Self {
        Self {
            inner: Membership::new(base, template.into(), config.sorted_set_ttl, order),
        }
    }

    pub fn add_relation(&mut self, relation: Arc<dyn Enrichment<T>>) {
        self.inner.add_relation(relation);
    }

    pub fn base(&self) -> &Base<T> {
        &self.inner.base
    }

    pub fn key(&self, group: &[&str]) -> Result<String, CacheError> {
        self.inner.key(group)
    }

    pub fn stage_add(
        &self,
        batch: &mut WriteBatch,
        item: &T,
        group: &[&str],
    ) -> Result<(), CacheError> {
        self.inner.stage_add(batch, item, group)
    }

    pub fn stage_remove(
        &self,
        batch: &mut WriteBatch,
        item: &T,
        group: &[&str],
    ) -> Result<(), CacheError> {
        self.inner.stage_remove(batch, item, group)
    }

    pub async fn add_item(&self, item: &T, group: &[&str]) -> Result<(), CacheError> {
        self.inner.add_item(item, group).await
    }

    pub async fn remove_item(&self, item: &T, group: &[&str]) -> Result<(), CacheError> {
        self.inner.remove_item(item, group).await
    }

    /// Record that `[lower, upper]` was loaded from the source of truth.
    pub fn stage_coverage(
        &self,
        batch: &mut WriteBatch,
        group: &[&str],
        lower: OffsetDateTime,
        upper: OffsetDateTime,
    ) -> Result<(), CacheError> {
        let (lo, hi) = (time_score(lower), time_score(upper));
        let key = coverage_key(&self.key(group)?);
        batch.zadd(key.clone(), interval_member(lo, hi), lo);
        batch.expire(key, self.inner.ttl);
        Ok(())
    }

    #[instrument(level = "debug", skip(self), fields(series = %self.inner.template))]
    pub async fn fetch(
        &self,
        group: &[&str],
        lower: OffsetDateTime,
        upper: OffsetDateTime,
    ) -> Result<TimeRangeResult<T>, CacheError> {
        let key = self.key(group)?;
        let (lo, hi) = (time_score(lower), time_score(upper));
        if lo > hi {
            return Ok(TimeRangeResult {
                items: Vec::new(),
                may_be_incomplete: false,
            });
        }
        let members = self
            .inner
            .store()
            .zrange_by_score(&key, self.inner.order, lo, hi)
            .await?;
        let covered = self.is_covered(&key, lo, hi).await?;
        let items = self
            .inner
            .hydrate(members.iter().map(|(member, _)| member.as_str()))
            .await?;
        Ok(TimeRangeResult {
            may_be_incomplete: !covered || items.len() < members.len(),
            items,
        })
    }

    pub fn requires_seeding(&self, result: &TimeRangeResult<T>) -> bool {
        result.may_be_incomplete
    }

    async fn is_covered(&self, key: &str, lo: f64, hi: f64) -> Result<bool, CacheError> {
        let intervals = self
            .inner
            .store()
            .zrange_by_score(&coverage_key(key), Order::Ascending, f64::NEG_INFINITY, lo)
            .await?;
        Ok(intervals
            .iter()
            .filter_map(|(member, _)| parse_interval(member))
            .any(|(start, end)| start <= lo && end >= hi))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use time::macros::datetime;

    use super::*;
    use crate::cache::MemoryStore;
    use crate::domain::{Account, Record, Ticket};

    fn series() -> TimeSeries<Ticket> {
        let base = Base::new(
            Arc::new(MemoryStore::new()),
            "ticket:%s",
            Duration::from_secs(60),
        );
        TimeSeries::new(base, "ticket-by-date", &CacheConfig::default(), Order::Ascending)
    }

    fn ticket_on(account: &Account, at: OffsetDateTime) -> Ticket {
        let mut ticket = Ticket::new("t", account, 1);
        ticket.record = Record::with_created_at(at);
        ticket
    }

    #[test]
    fn interval_members_parse_back() {
        let member = interval_member(1_714_521_600_000.0, 1_714_607_999_999.0);
        assert_eq!(
            parse_interval(&member),
            Some((1_714_521_600_000.0, 1_714_607_999_999.0))
        );
        assert_eq!(parse_interval("garbage"), None);
    }

    #[tokio::test]
    async fn uncovered_range_may_be_incomplete() {
        let series = series();
        let account = Account::new("Ada", "ada@example.com");
        let inside = ticket_on(&account, datetime!(2024-05-01 10:00 UTC));
        let outside = ticket_on(&account, datetime!(2024-05-03 10:00 UTC));
        for ticket in [&inside, &outside] {
            series.base().upsert(ticket).await.unwrap();
            series.add_item(ticket, &[]).await.unwrap();
        }

        let result = series
            .fetch(
                &[],
                datetime!(2024-05-01 00:00 UTC),
                datetime!(2024-05-02 00:00 UTC),
            )
            .await
            .unwrap();
        assert_eq!(result.items.len(), 1);
        assert!(series.requires_seeding(&result));
    }

    #[tokio::test]
    async fn recorded_coverage_marks_subranges_complete() {
        let series = series();
        let mut batch = WriteBatch::new();
        series
            .stage_coverage(
                &mut batch,
                &[],
                datetime!(2024-05-01 00:00 UTC),
                datetime!(2024-05-31 00:00 UTC),
            )
            .unwrap();
        series.base().store().apply(batch).await.unwrap();

        let inner = series
            .fetch(
                &[],
                datetime!(2024-05-10 00:00 UTC),
                datetime!(2024-05-11 00:00 UTC),
            )
            .await
            .unwrap();
        assert!(inner.items.is_empty());
        assert!(!inner.may_be_incomplete);

        let overlapping = series
            .fetch(
                &[],
                datetime!(2024-05-30 00:00 UTC),
                datetime!(2024-06-02 00:00 UTC),
            )
            .await
            .unwrap();
        assert!(overlapping.may_be_incomplete);
    }
}
