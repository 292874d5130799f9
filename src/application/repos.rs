//! Repository traits describing persistence adapters.
//!
//! Write methods commit to the relational store first and then synchronise
//! the point caches and every registered structure. Seed methods backfill
//! the cache from the relational store and report how many rows they loaded.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::cache::CacheError;
use crate::domain::{Account, Category, Ticket};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[async_trait]
pub trait AccountsRepo: Send + Sync {
    async fn create_account(&self, account: &Account) -> Result<(), RepoError>;

    async fn update_account(&self, account: &Account) -> Result<(), RepoError>;

    async fn find_account_by_uuid(&self, uuid: Uuid) -> Result<Option<Account>, RepoError>;

    async fn find_account_by_rand_id(&self, rand_id: &str) -> Result<Option<Account>, RepoError>;

    /// Load one account into its point cache, or blank it when absent.
    async fn seed_account(&self, rand_id: &str) -> Result<Option<Account>, RepoError>;

    /// Same as [`AccountsRepo::seed_account`], resolved through the e-mail alias.
    async fn seed_account_by_email(&self, email: &str) -> Result<Option<Account>, RepoError>;
}

#[async_trait]
pub trait CategoriesRepo: Send + Sync {
    async fn create_category(&self, category: &Category) -> Result<(), RepoError>;

    async fn find_category_by_rand_id(
        &self,
        rand_id: &str,
    ) -> Result<Option<Category>, RepoError>;

    async fn seed_category(&self, rand_id: &str) -> Result<Option<Category>, RepoError>;
}

#[async_trait]
pub trait TicketsRepo: Send + Sync {
    async fn create_ticket(&self, ticket: &Ticket) -> Result<(), RepoError>;

    /// Fails with `NotFound` when no row matches the ticket's id.
    async fn update_ticket(&self, ticket: &Ticket) -> Result<(), RepoError>;

    async fn delete_ticket(&self, ticket: &Ticket) -> Result<(), RepoError>;

    async fn find_ticket_by_rand_id(&self, rand_id: &str) -> Result<Option<Ticket>, RepoError>;

    async fn seed_ticket(&self, rand_id: &str) -> Result<Option<Ticket>, RepoError>;

    /// Cover the shortfall of the global timeline after `last_rand_id`.
    async fn seed_timeline(
        &self,
        subtraction: usize,
        last_rand_id: Option<&str>,
    ) -> Result<usize, RepoError>;

    async fn seed_timeline_by_category(
        &self,
        category_rand_id: &str,
        subtraction: usize,
        last_rand_id: Option<&str>,
    ) -> Result<usize, RepoError>;

    async fn seed_timeline_by_security_risk(
        &self,
        subtraction: usize,
        last_rand_id: Option<&str>,
    ) -> Result<usize, RepoError>;

    async fn seed_sorted_by_account(&self, account_rand_id: &str) -> Result<usize, RepoError>;

    async fn seed_page(&self, page_number: u64) -> Result<usize, RepoError>;

    async fn seed_by_date(
        &self,
        lower: OffsetDateTime,
        upper: OffsetDateTime,
    ) -> Result<usize, RepoError>;
}
