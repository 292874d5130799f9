//! Point cache keyed by public id, with negative caching.
//!
//! Three states are distinguishable for every id: present, confirmed blank
//! (the source of truth has no such row), and unknown (never cached or
//! expired). `get` folds blank and unknown into `NotFound`; `is_missing`
//! tells them apart.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, instrument};

use crate::domain::Entity;

use super::error::CacheError;
use super::keys::KeyTemplate;
use super::store::{CacheStore, WriteBatch};
use super::{METRIC_CACHE_BLANK_HIT, METRIC_CACHE_HIT, METRIC_CACHE_MISS};

/// Value written in place of an entity the source of truth confirmed absent.
pub const BLANK_MARKER: &str = "__blank__";

pub struct Base<T> {
    store: Arc<dyn CacheStore>,
    template: KeyTemplate,
    lookup: KeyTemplate,
    ttl: Duration,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Base<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            template: self.template.clone(),
            lookup: self.lookup.clone(),
            ttl: self.ttl,
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Base<T> {
    /// `template` takes exactly one `%s` for the public id, e.g. `ticket:%s`.
    /// Lookup aliases default to `<stem>-lookup:%s`.
    pub fn new(store: Arc<dyn CacheStore>, template: impl Into<KeyTemplate>, ttl: Duration) -> Self {
        let template = template.into();
        let lookup = KeyTemplate::new(format!("{}-lookup:%s", template.stem()));
        Self {
            store,
            template,
            lookup,
            ttl,
            _entity: PhantomData,
        }
    }

    pub fn with_lookup_template(mut self, lookup: impl Into<KeyTemplate>) -> Self {
        self.lookup = lookup.into();
        self
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(&self, rand_id: &str) -> Result<String, CacheError> {
        self.template.render(&[rand_id])
    }

    fn label(&self) -> String {
        self.template.stem().to_string()
    }

    /// Fetch by public id, sliding the TTL window forward on a hit.
    #[instrument(level = "debug", skip(self), fields(cache = %self.template))]
    pub async fn get(&self, rand_id: &str) -> Result<T, CacheError> {
        let key = self.key(rand_id)?;
        match self.store.get(&key).await? {
            None => {
                counter!(METRIC_CACHE_MISS, "cache" => self.label()).increment(1);
                Err(CacheError::NotFound { key })
            }
            Some(raw) if raw == BLANK_MARKER => {
                counter!(METRIC_CACHE_BLANK_HIT, "cache" => self.label()).increment(1);
                Err(CacheError::NotFound { key })
            }
            Some(raw) => {
                let value = serde_json::from_str(&raw)?;
                self.store.expire(&key, self.ttl).await?;
                counter!(METRIC_CACHE_HIT, "cache" => self.label()).increment(1);
                Ok(value)
            }
        }
    }

    /// Like [`Base::get`] but `None` for both blank and unknown ids.
    pub async fn find(&self, rand_id: &str) -> Result<Option<T>, CacheError> {
        match self.get(rand_id).await {
            Ok(value) => Ok(Some(value)),
            Err(CacheError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn stage_upsert(&self, batch: &mut WriteBatch, item: &T) -> Result<(), CacheError> {
        let key = self.key(item.rand_id())?;
        batch.set(key, serde_json::to_string(item)?, self.ttl);
        Ok(())
    }

    pub async fn upsert(&self, item: &T) -> Result<(), CacheError> {
        let mut batch = WriteBatch::new();
        self.stage_upsert(&mut batch, item)?;
        self.store.apply(batch).await?;
        Ok(())
    }

    pub fn stage_blank(&self, batch: &mut WriteBatch, rand_id: &str) -> Result<(), CacheError> {
        batch.set(self.key(rand_id)?, BLANK_MARKER, self.ttl);
        Ok(())
    }

    pub async fn set_blank(&self, rand_id: &str) -> Result<(), CacheError> {
        let mut batch = WriteBatch::new();
        self.stage_blank(&mut batch, rand_id)?;
        self.store.apply(batch).await?;
        debug!(target: "reseed::cache::base", cache = %self.template, "Blank marker written");
        Ok(())
    }

    /// True only while the blank marker is cached; false for unknown ids.
    pub async fn is_missing(&self, rand_id: &str) -> Result<bool, CacheError> {
        let key = self.key(rand_id)?;
        Ok(self.store.get(&key).await?.as_deref() == Some(BLANK_MARKER))
    }

    pub fn stage_delete(&self, batch: &mut WriteBatch, rand_id: &str) -> Result<(), CacheError> {
        batch.delete(self.key(rand_id)?);
        Ok(())
    }

    pub async fn delete(&self, rand_id: &str) -> Result<(), CacheError> {
        let mut batch = WriteBatch::new();
        self.stage_delete(&mut batch, rand_id)?;
        self.store.apply(batch).await?;
        Ok(())
    }

    pub fn stage_lookup(
        &self,
        batch: &mut WriteBatch,
        alias: &str,
        rand_id: &str,
    ) -> Result<(), CacheError> {
        batch.set(self.lookup.render(&[alias])?, rand_id, self.ttl);
        Ok(())
    }

    /// Point an alias (e.g. an e-mail address) at a public id.
    pub async fn set_lookup(&self, alias: &str, rand_id: &str) -> Result<(), CacheError> {
        let mut batch = WriteBatch::new();
        self.stage_lookup(&mut batch, alias, rand_id)?;
        self.store.apply(batch).await?;
        Ok(())
    }

    pub fn stage_lookup_blank(&self, batch: &mut WriteBatch, alias: &str) -> Result<(), CacheError> {
        batch.set(self.lookup.render(&[alias])?, BLANK_MARKER, self.ttl);
        Ok(())
    }

    pub async fn set_lookup_blank(&self, alias: &str) -> Result<(), CacheError> {
        let mut batch = WriteBatch::new();
        self.stage_lookup_blank(&mut batch, alias)?;
        self.store.apply(batch).await?;
        Ok(())
    }

    pub async fn is_lookup_missing(&self, alias: &str) -> Result<bool, CacheError> {
        let key = self.lookup.render(&[alias])?;
        Ok(self.store.get(&key).await?.as_deref() == Some(BLANK_MARKER))
    }

    /// Resolve an alias, then the entity it points at.
    pub async fn get_by_lookup(&self, alias: &str) -> Result<T, CacheError> {
        let key = self.lookup.render(&[alias])?;
        match self.store.get(&key).await? {
            Some(rand_id) if rand_id != BLANK_MARKER => {
                self.store.expire(&key, self.ttl).await?;
                self.get(&rand_id).await
            }
            _ => {
                counter!(METRIC_CACHE_MISS, "cache" => self.lookup.stem().to_string()).increment(1);
                Err(CacheError::NotFound { key })
            }
        }
    }
}
