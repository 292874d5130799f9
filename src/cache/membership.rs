//! Membership bookkeeping shared by every sorted structure: key rendering,
//! score projection, staged add/remove and hydration through the point cache.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::domain::{Entity, time_score};

use super::base::Base;
use super::error::CacheError;
use super::keys::KeyTemplate;
use super::relation::Enrichment;
use super::store::{CacheStore, Order, WriteBatch};

pub(crate) struct Membership<T> {
    pub(crate) base: Base<T>,
    pub(crate) template: KeyTemplate,
    pub(crate) ttl: Duration,
    pub(crate) order: Order,
    sorting_reference: Option<String>,
    relations: Vec<Arc<dyn Enrichment<T>>>,
}

impl<T: Entity> Membership<T> {
    pub(crate) fn new(base: Base<T>, template: KeyTemplate, ttl: Duration, order: Order) -> Self {
        Self {
            base,
            template,
            ttl,
            order,
            sorting_reference: None,
            relations: Vec::new(),
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn CacheStore> {
        self.base.store()
    }

    pub(crate) fn key(&self, group: &[&str]) -> Result<String, CacheError> {
        self.template.render(group)
    }

    pub(crate) fn set_sorting_reference(&mut self, field: impl Into<String>) {
        self.sorting_reference = Some(field.into());
    }

    pub(crate) fn sorting_reference(&self) -> Option<&str> {
        self.sorting_reference.as_deref()
    }

    pub(crate) fn add_relation(&mut self, relation: Arc<dyn Enrichment<T>>) {
        self.relations.push(relation);
    }

    /// Creation time by default, or the configured numeric field.
    pub(crate) fn score(&self, item: &T) -> f64 {
        match self.sorting_reference.as_deref() {
            None => time_score(item.created_at()),
            Some(field) => item.score_field(field).unwrap_or_else(|| {
                warn!(
                    target: "reseed::cache::membership",
                    structure = %self.template,
                    field,
                    "Entity has no such score field; falling back to creation time"
                );
                time_score(item.created_at())
            }),
        }
    }

    pub(crate) fn stage_add(
        &self,
        batch: &mut WriteBatch,
        item: &T,
        group: &[&str],
    ) -> Result<(), CacheError> {
        let key = self.key(group)?;
        batch.zadd(key.clone(), item.rand_id(), self.score(item));
        batch.expire(key, self.ttl);
        Ok(())
    }

    pub(crate) fn stage_remove(
        &self,
        batch: &mut WriteBatch,
        item: &T,
        group: &[&str],
    ) -> Result<(), CacheError> {
        batch.zrem(self.key(group)?, item.rand_id());
        Ok(())
    }

    /// Whether a seed (or a write into a seeded set) left members under `group`.
    pub(crate) async fn is_seeded(&self, group: &[&str]) -> Result<bool, CacheError> {
        let key = self.key(group)?;
        Ok(self.store().zcard(&key).await? > 0)
    }

    pub(crate) async fn add_item(&self, item: &T, group: &[&str]) -> Result<(), CacheError> {
        let mut batch = WriteBatch::new();
        self.stage_add(&mut batch, item, group)?;
        self.store().apply(batch).await?;
        Ok(())
    }

    pub(crate) async fn remove_item(&self, item: &T, group: &[&str]) -> Result<(), CacheError> {
        let mut batch = WriteBatch::new();
        self.stage_remove(&mut batch, item, group)?;
        self.store().apply(batch).await?;
        Ok(())
    }

    /// Load members from the point cache in order, skipping expired entries.
    pub(crate) async fn hydrate<'a, I>(&self, rand_ids: I) -> Result<Vec<T>, CacheError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut items = Vec::new();
        for rand_id in rand_ids {
            if let Some(mut item) = self.base.find(rand_id).await? {
                self.enrich(&mut item).await?;
                items.push(item);
            }
        }
        Ok(items)
    }

    pub(crate) async fn enrich(&self, item: &mut T) -> Result<(), CacheError> {
        for relation in &self.relations {
            relation.enrich(item).await?;
        }
        Ok(())
    }
}
