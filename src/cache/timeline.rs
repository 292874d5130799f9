//! Cursor-paginated sorted set, one per group key.
//!
//! The cursor is the list of public ids the client has already seen. The
//! next page starts right after the furthest of them by rank, which is the
//! same as "strictly past the extremal score" when scores are distinct and
//! stays duplicate-free when they tie.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::domain::Entity;

use super::METRIC_STALE_PAGINATION;
use super::base::Base;
use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::KeyTemplate;
use super::membership::Membership;
use super::position::PositionToken;
use super::relation::Enrichment;
use super::store::{Order, WriteBatch};

/// One page of a timeline fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelinePage<T> {
    pub items: Vec<T>,
    /// Last member the page covered, usable as the next cursor entry.
    pub valid_last_rand_id: Option<String>,
    /// Encoded [`PositionToken`] of that member.
    pub position: Option<String>,
}

impl<T> TimelinePage<T> {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            valid_last_rand_id: None,
            position: None,
        }
    }
}

pub struct Timeline<T> {
    inner: Membership<T>,
    page_size: usize,
}

impl<T: Entity> Timeline<T> {
    pub fn new(
        base: Base<T>,
        template: impl Into<KeyTemplate>,
        config: &CacheConfig,
        order: Order,
    ) -> Self {
        Self {
            inner: Membership::new(base, template.into(), config.sorted_set_ttl, order),
            page_size: config.page_size.get(),
        }
    }

    /// Score members by a named numeric field instead of creation time.
    pub fn set_sorting_reference(&mut self, field: impl Into<String>) {
        self.inner.set_sorting_reference(field);
    }

    pub fn sorting_reference(&self) -> Option<&str> {
        self.inner.sorting_reference()
    }

    pub fn add_relation(&mut self, relation: Arc<dyn Enrichment<T>>) {
        self.inner.add_relation(relation);
    }

    pub fn base(&self) -> &Base<T> {
        &self.inner.base
    }

    pub fn order(&self) -> Order {
        self.inner.order
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn key(&self, group: &[&str]) -> Result<String, CacheError> {
        self.inner.key(group)
    }

    pub fn score(&self, item: &T) -> f64 {
        self.inner.score(item)
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

    /// Next page after `cursor`; the first page when it is empty.
    ///
    /// Fails with `StalePagination` when any cursor member has left the set.
    #[instrument(level = "debug", skip(self, cursor), fields(timeline = %self.inner.template, cursor_len = cursor.len()))]
    pub async fn fetch(
        &self,
        group: &[&str],
        cursor: &[String],
    ) -> Result<TimelinePage<T>, CacheError> {
        let key = self.key(group)?;
        let mut furthest: Option<u64> = None;
        for rand_id in cursor {
            match self
                .inner
                .store()
                .zrank(&key, rand_id, self.inner.order)
                .await?
            {
                Some(rank) => furthest = Some(furthest.map_or(rank, |seen| seen.max(rank))),
                None => {
                    counter!(METRIC_STALE_PAGINATION, "timeline" => self.inner.template.stem().to_string())
                        .increment(1);
                    warn!(
                        target: "reseed::cache::timeline",
                        timeline = %self.inner.template,
                        "Cursor member no longer in timeline; pagination must restart"
                    );
                    return Err(CacheError::StalePagination {
                        key,
                        rand_id: rand_id.clone(),
                    });
                }
            }
        }
        let start = furthest.map_or(0, |rank| rank + 1);
        self.page_from(&key, start).await
    }

    /// Page starting right after an absolute position.
    pub async fn fetch_from_position(
        &self,
        group: &[&str],
        position: &str,
    ) -> Result<TimelinePage<T>, CacheError> {
        let token = PositionToken::decode(position)?;
        let key = self.key(group)?;
        let start = token.rank.checked_add(1).ok_or_else(|| {
            CacheError::InvalidPosition(format!("rank {} is past the end of any set", token.rank))
        })?;
        self.page_from(&key, start).await
    }

    pub async fn is_seeded(&self, group: &[&str]) -> Result<bool, CacheError> {
        self.inner.is_seeded(group).await
    }

    /// A short page never proves the source is exhausted.
    pub fn requires_seeding(&self, total_returned: usize) -> bool {
        total_returned < self.page_size
    }

    async fn page_from(&self, key: &str, start: u64) -> Result<TimelinePage<T>, CacheError> {
        let stop = start.checked_add(self.page_size as u64 - 1).ok_or_else(|| {
            CacheError::InvalidPosition(format!("page starting at rank {start} overflows"))
        })?;
        let members = self
            .inner
            .store()
            .zrange(key, self.inner.order, start, stop)
            .await?;
        let Some((last_id, last_score)) = members.last().cloned() else {
            return Ok(TimelinePage::empty());
        };

        let items = self
            .inner
            .hydrate(members.iter().map(|(member, _)| member.as_str()))
            .await?;
        if items.len() < members.len() {
            debug!(
                target: "reseed::cache::timeline",
                skipped = members.len() - items.len(),
                "Skipped members whose point entries expired"
            );
        }

        let last_rank = start + members.len() as u64 - 1;
        Ok(TimelinePage {
            items,
            valid_last_rand_id: Some(last_id),
            position: Some(PositionToken::new(last_rank, last_score).encode()?),
        })
    }
}
