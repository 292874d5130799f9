//! Offset pagination over a sorted set: page `n` covers ranks
//! `(n - 1) * page_size ..= n * page_size - 1`.

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

pub struct Page<T> {
    inner: Membership<T>,
    page_size: usize,
}

impl<T: Entity> Page<T> {
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

    /// Rows a seeder must load so that `page_number` lands on the right ranks.
    pub fn seed_limit(&self, page_number: u64) -> u64 {
        page_number.saturating_mul(self.page_size as u64)
    }

    #[instrument(level = "debug", skip(self), fields(page = %self.inner.template))]
    pub async fn fetch(&self, group: &[&str], page_number: u64) -> Result<Vec<T>, CacheError> {
        if page_number == 0 {
            return Err(CacheError::InvalidPosition(
                "page numbers start at 1".to_string(),
            ));
        }
        let key = self.key(group)?;
        let size = self.page_size as u64;
        let start = (page_number - 1).saturating_mul(size);
        let stop = start.saturating_add(size - 1);
        let members = self
            .inner
            .store()
            .zrange(&key, self.inner.order, start, stop)
            .await?;
        self.inner
            .hydrate(members.iter().map(|(member, _)| member.as_str()))
            .await
    }

    pub async fn is_seeded(&self, group: &[&str]) -> Result<bool, CacheError> {
        self.inner.is_seeded(group).await
    }

    /// An empty page cannot prove the source lacks it.
    pub fn requires_seeding(&self, total_returned: usize) -> bool {
        total_returned == 0
    }
}
