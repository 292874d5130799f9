//! Fully materialized sorted set per group, for small bounded groups.

use std::sync::Arc;

use tracing::instrument;

use crate::domain::Entity;

use super::base::Base;
use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::KeyTemplate;
use super::membership::Membership;
use super::relation::Enrichment;
use super::store::{Order, WriteBatch};

pub struct GroupedSorted<T> {
    inner: Membership<T>,
}

impl<T: Entity> GroupedSorted<T> {
    /// Order is chosen per fetch.
    pub fn new(base: Base<T>, template: impl Into<KeyTemplate>, config: &CacheConfig) -> Self {
        Self {
            inner: Membership::new(
                base,
                template.into(),
                config.sorted_set_ttl,
                Order::Descending,
            ),
        }
    }

    pub fn set_sorting_reference(&mut self, field: impl Into<String>) {
        self.inner.set_sorting_reference(field);
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

    /// Every member of the group, hydrated in `order`.
    #[instrument(level = "debug", skip(self), fields(sorted = %self.inner.template))]
    pub async fn fetch(&self, group: &[&str], order: Order) -> Result<Vec<T>, CacheError> {
        let key = self.key(group)?;
        let members = self.inner.store().zrange(&key, order, 0, u64::MAX).await?;
        self.inner
            .hydrate(members.iter().map(|(member, _)| member.as_str()))
            .await
    }

    /// An empty group is indistinguishable from an unseeded one.
    pub async fn requires_seeding(&self, group: &[&str]) -> Result<bool, CacheError> {
        Ok(!self.is_seeded(group).await?)
    }

    pub async fn is_seeded(&self, group: &[&str]) -> Result<bool, CacheError> {
        self.inner.is_seeded(group).await
    }
}
