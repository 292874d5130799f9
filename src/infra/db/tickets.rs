use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Row, postgres::PgRow};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::{
        repos::{RepoError, TicketsRepo},
        structures::TicketStructures,
    },
    domain::{Account, Ticket},
};

use super::PostgresRepositories;
use super::accounts::scan_account_prefixed;
use super::seeder::{JoinedRelation, Scanner, Seeder, TimelineQueries};
use super::util::{SqlArg, map_sqlx_error, scan_record, sync_cache};

/// Ticket columns plus the reporting account, LEFT JOINed under a
/// `joined_account_` prefix. `joined_account_uuid` is the join discriminator.
macro_rules! ticket_select {
    () => {
        "SELECT t.uuid, t.rand_id, t.created_at, t.updated_at, t.description, t.resolved, \
         t.security_risk, t.account_uuid, a.rand_id AS account_rand_id, t.category_uuid, \
         c.rand_id AS category_rand_id, \
         a.uuid AS joined_account_uuid, a.rand_id AS joined_account_rand_id, \
         a.created_at AS joined_account_created_at, a.updated_at AS joined_account_updated_at, \
         a.name AS joined_account_name, a.email AS joined_account_email \
         FROM tickets t \
         LEFT JOIN accounts a ON a.uuid = t.account_uuid \
         LEFT JOIN categories c ON c.uuid = t.category_uuid"
    };
}

const TICKET_BY_RAND_ID: &str = concat!(ticket_select!(), " WHERE t.rand_id = $1");

const TIMELINE: TimelineQueries = TimelineQueries {
    row: TICKET_BY_RAND_ID,
    first_page: concat!(
        ticket_select!(),
        " ORDER BY t.created_at DESC, t.rand_id COLLATE \"C\" DESC LIMIT $1"
    ),
    next_page: concat!(
        ticket_select!(),
        " WHERE (t.created_at, t.rand_id COLLATE \"C\") < ($1, $2)",
        " ORDER BY t.created_at DESC, t.rand_id COLLATE \"C\" DESC LIMIT $3"
    ),
};

const TIMELINE_BY_CATEGORY: TimelineQueries = TimelineQueries {
    row: TICKET_BY_RAND_ID,
    first_page: concat!(
        ticket_select!(),
        " WHERE c.rand_id = $1",
        " ORDER BY t.created_at DESC, t.rand_id COLLATE \"C\" DESC LIMIT $2"
    ),
    next_page: concat!(
        ticket_select!(),
        " WHERE c.rand_id = $1 AND (t.created_at, t.rand_id COLLATE \"C\") < ($2, $3)",
        " ORDER BY t.created_at DESC, t.rand_id COLLATE \"C\" DESC LIMIT $4"
    ),
};

const TIMELINE_BY_SECURITY_RISK: TimelineQueries = TimelineQueries {
    row: TICKET_BY_RAND_ID,
    first_page: concat!(
        ticket_select!(),
        " ORDER BY t.security_risk DESC, t.rand_id COLLATE \"C\" DESC LIMIT $1"
    ),
    next_page: concat!(
        ticket_select!(),
        " WHERE (t.security_risk::float8, t.rand_id COLLATE \"C\") < ($1, $2)",
        " ORDER BY t.security_risk DESC, t.rand_id COLLATE \"C\" DESC LIMIT $3"
    ),
};

const SORTED_BY_ACCOUNT: &str = concat!(ticket_select!(), " WHERE a.rand_id = $1");

const PAGE: &str = concat!(
    ticket_select!(),
    " ORDER BY t.created_at DESC, t.rand_id COLLATE \"C\" DESC LIMIT $1"
);

const BY_DATE: &str = concat!(
    ticket_select!(),
    " WHERE t.created_at BETWEEN $1 AND $2 ORDER BY t.created_at ASC"
);

pub fn scan_ticket(row: &PgRow) -> Result<Ticket, sqlx::Error> {
    Ok(Ticket {
        record: scan_record(row, "")?,
        description: row.try_get("description")?,
        resolved: row.try_get("resolved")?,
        security_risk: row.try_get("security_risk")?,
        account_uuid: row.try_get("account_uuid")?,
        account_rand_id: row.try_get("account_rand_id")?,
        category_uuid: row.try_get("category_uuid")?,
        category_rand_id: row.try_get("category_rand_id")?,
        account: None,
    })
}

fn scan_joined_account(row: &PgRow) -> Result<Option<Account>, sqlx::Error> {
    let discriminator: Option<Uuid> = row.try_get("joined_account_uuid")?;
    match discriminator {
        Some(_) => scan_account_prefixed(row, "joined_account_").map(Some),
        None => Ok(None),
    }
}

#[derive(Clone)]
pub struct TicketRepository {
    db: PostgresRepositories,
    structures: Arc<TicketStructures>,
    seeder: Seeder<Ticket>,
}

impl TicketRepository {
    pub fn new(db: PostgresRepositories, structures: Arc<TicketStructures>) -> Self {
        let scanner = Scanner::new(scan_ticket).with_join(
            JoinedRelation::new(structures.account.clone(), scan_joined_account).required(),
        );
        let seeder = Seeder::new(db.clone(), scanner);
        Self {
            db,
            structures,
            seeder,
        }
    }

    pub fn structures(&self) -> &TicketStructures {
        &self.structures
    }

    async fn sync_write(&self, ticket: &Ticket) {
        let seeded = self.structures.seeded_for(ticket).await;
        sync_cache(self.structures.tickets.store(), "ticket", |batch| {
            self.structures.stage_ticket(batch, ticket, seeded?)
        })
        .await;
    }

    async fn sync_removal(&self, ticket: &Ticket) {
        sync_cache(self.structures.tickets.store(), "ticket", |batch| {
            self.structures.stage_ticket_removal(batch, ticket)
        })
        .await;
    }
}

#[async_trait]
impl TicketsRepo for TicketRepository {
    async fn create_ticket(&self, ticket: &Ticket) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO tickets (
                uuid, rand_id, created_at, updated_at, description, resolved,
                security_risk, account_uuid, category_uuid
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(ticket.record.uuid)
        .bind(&ticket.record.rand_id)
        .bind(ticket.record.created_at)
        .bind(ticket.record.updated_at)
        .bind(&ticket.description)
        .bind(ticket.resolved)
        .bind(ticket.security_risk)
        .bind(ticket.account_uuid)
        .bind(ticket.category_uuid)
        .execute(self.db.pool())
        .await
        .map_err(map_sqlx_error)?;

        self.sync_write(ticket).await;
        Ok(())
    }

    async fn update_ticket(&self, ticket: &Ticket) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"
            UPDATE tickets
            SET description = $2, resolved = $3, security_risk = $4, updated_at = $5
            WHERE rand_id = $1
            "#,
        )
        .bind(&ticket.record.rand_id)
        .bind(&ticket.description)
        .bind(ticket.resolved)
        .bind(ticket.security_risk)
        .bind(ticket.record.updated_at)
        .execute(self.db.pool())
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        self.sync_write(ticket).await;
        Ok(())
    }

    async fn delete_ticket(&self, ticket: &Ticket) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM tickets WHERE rand_id = $1")
            .bind(&ticket.record.rand_id)
            .execute(self.db.pool())
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        self.sync_removal(ticket).await;
        Ok(())
    }

    async fn find_ticket_by_rand_id(&self, rand_id: &str) -> Result<Option<Ticket>, RepoError> {
        let row = sqlx::query(TICKET_BY_RAND_ID)
            .bind(rand_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(map_sqlx_error)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut ticket = self.seeder.scanner().scan(&row)?;
        ticket.account = scan_joined_account(&row).map_err(map_sqlx_error)?;
        Ok(Some(ticket))
    }

    async fn seed_ticket(&self, rand_id: &str) -> Result<Option<Ticket>, RepoError> {
        self.seeder
            .seed_one(&self.structures.tickets, TICKET_BY_RAND_ID, rand_id)
            .await
    }

    async fn seed_timeline(
        &self,
        subtraction: usize,
        last_rand_id: Option<&str>,
    ) -> Result<usize, RepoError> {
        self.seeder
            .seed_timeline(
                &self.structures.timeline,
                &TIMELINE,
                &[],
                &[],
                subtraction,
                last_rand_id,
            )
            .await
    }

    async fn seed_timeline_by_category(
        &self,
        category_rand_id: &str,
        subtraction: usize,
        last_rand_id: Option<&str>,
    ) -> Result<usize, RepoError> {
        self.seeder
            .seed_timeline(
                &self.structures.timeline_by_category,
                &TIMELINE_BY_CATEGORY,
                &[SqlArg::from(category_rand_id)],
                &[category_rand_id],
                subtraction,
                last_rand_id,
            )
            .await
    }

    async fn seed_timeline_by_security_risk(
        &self,
        subtraction: usize,
        last_rand_id: Option<&str>,
    ) -> Result<usize, RepoError> {
        self.seeder
            .seed_timeline(
                &self.structures.timeline_by_security_risk,
                &TIMELINE_BY_SECURITY_RISK,
                &[],
                &[],
                subtraction,
                last_rand_id,
            )
            .await
    }

    async fn seed_sorted_by_account(&self, account_rand_id: &str) -> Result<usize, RepoError> {
        self.seeder
            .seed_sorted(
                &self.structures.sorted_by_account,
                SORTED_BY_ACCOUNT,
                &[SqlArg::from(account_rand_id)],
                &[account_rand_id],
            )
            .await
    }

    async fn seed_page(&self, page_number: u64) -> Result<usize, RepoError> {
        self.seeder
            .seed_page(&self.structures.page, PAGE, &[], &[], page_number)
            .await
    }

    async fn seed_by_date(
        &self,
        lower: OffsetDateTime,
        upper: OffsetDateTime,
    ) -> Result<usize, RepoError> {
        self.seeder
            .seed_time_range(&self.structures.by_date, BY_DATE, &[], &[], lower, upper)
            .await
    }
}
