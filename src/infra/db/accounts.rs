use async_trait::async_trait;
use sqlx::{Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    application::repos::{AccountsRepo, RepoError},
    cache::Base,
    domain::Account,
};

use super::PostgresRepositories;
use super::seeder::{Scanner, Seeder};
use super::util::{map_sqlx_error, scan_record, sync_cache};

const ACCOUNT_BY_UUID: &str = "SELECT uuid, rand_id, created_at, updated_at, name, email \
     FROM accounts WHERE uuid = $1";
const ACCOUNT_BY_RAND_ID: &str = "SELECT uuid, rand_id, created_at, updated_at, name, email \
     FROM accounts WHERE rand_id = $1";
const ACCOUNT_BY_EMAIL: &str = "SELECT uuid, rand_id, created_at, updated_at, name, email \
     FROM accounts WHERE email = $1";

pub fn scan_account(row: &PgRow) -> Result<Account, sqlx::Error> {
    scan_account_prefixed(row, "")
}

pub(crate) fn scan_account_prefixed(row: &PgRow, prefix: &str) -> Result<Account, sqlx::Error> {
    Ok(Account {
        record: scan_record(row, prefix)?,
        name: row.try_get(format!("{prefix}name").as_str())?,
        email: row.try_get(format!("{prefix}email").as_str())?,
    })
}

#[derive(Clone)]
pub struct AccountRepository {
    db: PostgresRepositories,
    accounts: Base<Account>,
    seeder: Seeder<Account>,
}

impl AccountRepository {
    pub fn new(db: PostgresRepositories, accounts: Base<Account>) -> Self {
        let seeder = Seeder::new(db.clone(), Scanner::new(scan_account));
        Self {
            db,
            accounts,
            seeder,
        }
    }
}

#[async_trait]
impl AccountsRepo for AccountRepository {
    async fn create_account(&self, account: &Account) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (uuid, rand_id, created_at, updated_at, name, email)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(account.record.uuid)
        .bind(&account.record.rand_id)
        .bind(account.record.created_at)
        .bind(account.record.updated_at)
        .bind(&account.name)
        .bind(&account.email)
        .execute(self.db.pool())
        .await
        .map_err(map_sqlx_error)?;

        sync_cache(self.accounts.store(), "account", |batch| {
            self.accounts.stage_upsert(batch, account)?;
            self.accounts
                .stage_lookup(batch, &account.email, &account.record.rand_id)
        })
        .await;
        Ok(())
    }

    async fn update_account(&self, account: &Account) -> Result<(), RepoError> {
        let previous_email: String = sqlx::query(
            r#"
            WITH previous AS (
                SELECT email FROM accounts WHERE rand_id = $1
            )
            UPDATE accounts
            SET name = $2, email = $3, updated_at = $4
            FROM previous
            WHERE accounts.rand_id = $1
            RETURNING previous.email AS previous_email
            "#,
        )
        .bind(&account.record.rand_id)
        .bind(&account.name)
        .bind(&account.email)
        .bind(account.record.updated_at)
        .fetch_optional(self.db.pool())
        .await
        .map_err(map_sqlx_error)?
        .ok_or(RepoError::NotFound)?
        .try_get("previous_email")
        .map_err(map_sqlx_error)?;

        sync_cache(self.accounts.store(), "account", |batch| {
            self.accounts.stage_upsert(batch, account)?;
            if previous_email != account.email {
                self.accounts.stage_lookup_blank(batch, &previous_email)?;
            }
            self.accounts
                .stage_lookup(batch, &account.email, &account.record.rand_id)
        })
        .await;
        Ok(())
    }

    async fn find_account_by_uuid(&self, uuid: Uuid) -> Result<Option<Account>, RepoError> {
        let row = sqlx::query(ACCOUNT_BY_UUID)
            .bind(uuid)
            .fetch_optional(self.db.pool())
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref()
            .map(|row| self.seeder.scanner().scan(row))
            .transpose()
    }

    async fn find_account_by_rand_id(&self, rand_id: &str) -> Result<Option<Account>, RepoError> {
        let row = sqlx::query(ACCOUNT_BY_RAND_ID)
            .bind(rand_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref()
            .map(|row| self.seeder.scanner().scan(row))
            .transpose()
    }

    async fn seed_account(&self, rand_id: &str) -> Result<Option<Account>, RepoError> {
        self.seeder
            .seed_one(&self.accounts, ACCOUNT_BY_RAND_ID, rand_id)
            .await
    }

    async fn seed_account_by_email(&self, email: &str) -> Result<Option<Account>, RepoError> {
        self.seeder
            .seed_one_by_lookup(&self.accounts, ACCOUNT_BY_EMAIL, email)
            .await
    }
}
