//! Attaching a secondary entity to a primary one through a foreign public id.
//!
//! Both data sources feed the same assignment: read-time enrichment pulls
//! the secondary from its point cache, seed-time denormalization hands over
//! the already scanned join columns.

use async_trait::async_trait;
use tracing::debug;

use crate::domain::Entity;

use super::base::Base;
use super::error::CacheError;
use super::store::WriteBatch;

/// Read-time enrichment step registered on sorted structures.
#[async_trait]
pub trait Enrichment<P>: Send + Sync {
    /// Tolerant: a missing secondary leaves the field unset.
    async fn enrich(&self, primary: &mut P) -> Result<(), CacheError>;
}

pub struct Relation<P, S> {
    name: &'static str,
    base: Base<S>,
    foreign_key: fn(&P) -> Option<&str>,
    assign: fn(&mut P, Option<S>),
}

impl<P, S> Clone for Relation<P, S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            base: self.base.clone(),
            foreign_key: self.foreign_key,
            assign: self.assign,
        }
    }
}

impl<P: Entity, S: Entity> Relation<P, S> {
    pub fn new(
        name: &'static str,
        base: Base<S>,
        foreign_key: fn(&P) -> Option<&str>,
        assign: fn(&mut P, Option<S>),
    ) -> Self {
        Self {
            name,
            base,
            foreign_key,
            assign,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn base(&self) -> &Base<S> {
        &self.base
    }

    pub fn foreign_key<'a>(&self, primary: &'a P) -> Option<&'a str> {
        (self.foreign_key)(primary)
    }

    /// Pure assignment, no I/O.
    pub fn set_item(&self, primary: &mut P, secondary: S) {
        (self.assign)(primary, Some(secondary));
    }

    pub fn clear(&self, primary: &mut P) {
        (self.assign)(primary, None);
    }

    /// Look the secondary up in its point cache. Returns whether it was found.
    pub async fn resolve(&self, primary: &mut P) -> Result<bool, CacheError> {
        let Some(foreign) = self.foreign_key(primary).map(str::to_owned) else {
            self.clear(primary);
            return Ok(false);
        };
        match self.base.find(&foreign).await? {
            Some(secondary) => {
                self.set_item(primary, secondary);
                Ok(true)
            }
            None => {
                debug!(
                    target: "reseed::cache::relation",
                    relation = self.name,
                    "Secondary not cached; leaving relation unset"
                );
                self.clear(primary);
                Ok(false)
            }
        }
    }

    /// Like [`Relation::resolve`], but a missing secondary is an error.
    pub async fn resolve_required(&self, primary: &mut P) -> Result<(), CacheError> {
        if self.resolve(primary).await? {
            return Ok(());
        }
        Err(self.missing(primary))
    }

    /// Seed-time path: attach a secondary scanned from a join row and stage
    /// it into its own point cache. `None` means the join produced no row.
    pub fn attach_scanned(
        &self,
        batch: &mut WriteBatch,
        primary: &mut P,
        secondary: Option<S>,
        required: bool,
    ) -> Result<(), CacheError> {
        match secondary {
            Some(secondary) => {
                self.base.stage_upsert(batch, &secondary)?;
                self.set_item(primary, secondary);
                Ok(())
            }
            None if required => Err(self.missing(primary)),
            None => {
                self.clear(primary);
                Ok(())
            }
        }
    }

    fn missing(&self, primary: &P) -> CacheError {
        let key = match self.foreign_key(primary) {
            Some(foreign) => self.base.key(foreign).unwrap_or_else(|_| foreign.to_string()),
            None => format!("{}:<none>", self.name),
        };
        CacheError::NotFound { key }
    }
}

#[async_trait]
impl<P: Entity, S: Entity> Enrichment<P> for Relation<P, S> {
    async fn enrich(&self, primary: &mut P) -> Result<(), CacheError> {
        self.resolve(primary).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::cache::MemoryStore;
    use crate::domain::{Account, Ticket};

    fn reporter(ticket: &Ticket) -> Option<&str> {
        Some(ticket.account_rand_id.as_str())
    }

    fn assign_reporter(ticket: &mut Ticket, account: Option<Account>) {
        ticket.account = account;
    }

    fn account_relation() -> Relation<Ticket, Account> {
        let base = Base::new(
            Arc::new(MemoryStore::new()),
            "account:%s",
            Duration::from_secs(60),
        );
        Relation::new("account", base, reporter, assign_reporter)
    }

    #[tokio::test]
    async fn resolve_attaches_cached_secondary() {
        let relation = account_relation();
        let account = Account::new("Ada", "ada@example.com");
        relation.base().upsert(&account).await.expect("upsert");

        let mut ticket = Ticket::new("lost badge", &account, 3);
        assert!(relation.resolve(&mut ticket).await.expect("resolve"));
        assert_eq!(ticket.account.as_ref(), Some(&account));
    }

    #[tokio::test]
    async fn missing_secondary_is_tolerated_unless_required() {
        let relation = account_relation();
        let account = Account::new("Ada", "ada@example.com");
        let mut ticket = Ticket::new("lost badge", &account, 3);

        relation.enrich(&mut ticket).await.expect("tolerant");
        assert!(ticket.account.is_none());

        let err = relation.resolve_required(&mut ticket).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn scanned_secondary_is_attached_and_staged() {
        let relation = account_relation();
        let account = Account::new("Ada", "ada@example.com");
        let mut ticket = Ticket::new("lost badge", &account, 3);

        let mut batch = WriteBatch::new();
        relation
            .attach_scanned(&mut batch, &mut ticket, Some(account.clone()), true)
            .expect("attach");
        assert_eq!(ticket.account.as_ref(), Some(&account));
        assert_eq!(batch.len(), 1);

        relation.base().store().apply(batch).await.expect("apply");
        assert!(relation.base().find(&account.record.rand_id).await.unwrap().is_some());
    }

    #[test]
    fn scanned_absence_fails_only_when_required() {
        let relation = account_relation();
        let account = Account::new("Ada", "ada@example.com");
        let mut ticket = Ticket::new("lost badge", &account, 3);
        let mut batch = WriteBatch::new();

        relation
            .attach_scanned(&mut batch, &mut ticket, None, false)
            .expect("optional join");
        assert!(
            relation
                .attach_scanned(&mut batch, &mut ticket, None, true)
                .is_err()
        );
        assert!(batch.is_empty());
    }
}
