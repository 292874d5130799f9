//! Ticket reads and writes over the cache structures.
//!
//! Every read goes through [`read_through`]: serve from the cache, seed from
//! the relational store once when the cache cannot vouch for the result,
//! then serve the re-fetched result as final.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, instrument};

use crate::{
    application::{
        error::AppError,
        pagination::{CursorPage, TimelineCursor},
        read_through::read_through,
        repos::{AccountsRepo, CategoriesRepo, RepoError, TicketsRepo},
        structures::TicketStructures,
    },
    cache::{Order, TimeRangeResult, Timeline, TimelinePage},
    domain::{Account, Category, Ticket},
};

#[derive(Debug, Clone)]
pub struct NewTicket {
    pub description: String,
    pub account_rand_id: String,
    pub category_rand_id: Option<String>,
    pub security_risk: i64,
}

#[derive(Clone)]
pub struct TicketService {
    structures: Arc<TicketStructures>,
    tickets: Arc<dyn TicketsRepo>,
    accounts: Arc<dyn AccountsRepo>,
    categories: Arc<dyn CategoriesRepo>,
}

impl TicketService {
    pub fn new(
        structures: Arc<TicketStructures>,
        tickets: Arc<dyn TicketsRepo>,
        accounts: Arc<dyn AccountsRepo>,
        categories: Arc<dyn CategoriesRepo>,
    ) -> Self {
        Self {
            structures,
            tickets,
            accounts,
            categories,
        }
    }

    pub fn structures(&self) -> &TicketStructures {
        &self.structures
    }

    #[instrument(skip(self, input), fields(account = %input.account_rand_id))]
    pub async fn create(&self, input: NewTicket) -> Result<Ticket, AppError> {
        let description = input.description.trim();
        if description.is_empty() {
            return Err(AppError::validation("ticket description must not be blank"));
        }
        let account = self.get_account(&input.account_rand_id).await?;
        let mut ticket = Ticket::new(description, &account, input.security_risk);
        if let Some(category_rand_id) = input.category_rand_id.as_deref() {
            let category = self.get_category(category_rand_id).await?;
            ticket = ticket.with_category(&category);
        }

        self.tickets.create_ticket(&ticket).await?;
        info!(
            target: "reseed::application::tickets",
            ticket = %ticket.record.rand_id,
            "Ticket created"
        );
        ticket.account = Some(account);
        Ok(ticket)
    }

    pub async fn update_description(
        &self,
        rand_id: &str,
        description: &str,
    ) -> Result<Ticket, AppError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(AppError::validation("ticket description must not be blank"));
        }
        let mut ticket = self.get_ticket(rand_id).await?;
        ticket.set_description(description);
        self.tickets.update_ticket(&ticket).await?;
        Ok(ticket)
    }

    pub async fn resolve(&self, rand_id: &str) -> Result<Ticket, AppError> {
        let mut ticket = self.get_ticket(rand_id).await?;
        if !ticket.resolved {
            ticket.set_resolved();
            self.tickets.update_ticket(&ticket).await?;
        }
        Ok(ticket)
    }

    pub async fn delete(&self, rand_id: &str) -> Result<(), AppError> {
        let ticket = self.get_ticket(rand_id).await?;
        self.tickets.delete_ticket(&ticket).await?;
        info!(
            target: "reseed::application::tickets",
            ticket = %rand_id,
            "Ticket deleted"
        );
        Ok(())
    }

    /// Point read with negative caching, enriched with the reporting account.
    #[instrument(skip(self))]
    pub async fn get_ticket(&self, rand_id: &str) -> Result<Ticket, AppError> {
        let tickets = &self.structures.tickets;
        let mut ticket = match tickets.get(rand_id).await {
            Ok(ticket) => ticket,
            Err(err) if err.is_not_found() => {
                if tickets.is_missing(rand_id).await? {
                    return Err(AppError::NotFound);
                }
                self.tickets
                    .seed_ticket(rand_id)
                    .await?
                    .ok_or(AppError::NotFound)?
            }
            Err(err) => return Err(err.into()),
        };

        if !self.structures.account.resolve(&mut ticket).await? {
            let account = self.get_account(&ticket.account_rand_id).await?;
            self.structures.account.set_item(&mut ticket, account);
        }
        Ok(ticket)
    }

    pub async fn get_account(&self, rand_id: &str) -> Result<Account, AppError> {
        let accounts = &self.structures.accounts;
        match accounts.get(rand_id).await {
            Ok(account) => Ok(account),
            Err(err) if err.is_not_found() => {
                if accounts.is_missing(rand_id).await? {
                    return Err(AppError::NotFound);
                }
                self.accounts
                    .seed_account(rand_id)
                    .await?
                    .ok_or(AppError::NotFound)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_account_by_email(&self, email: &str) -> Result<Account, AppError> {
        let accounts = &self.structures.accounts;
        match accounts.get_by_lookup(email).await {
            Ok(account) => Ok(account),
            Err(err) if err.is_not_found() => {
                if accounts.is_lookup_missing(email).await? {
                    return Err(AppError::NotFound);
                }
                self.accounts
                    .seed_account_by_email(email)
                    .await?
                    .ok_or(AppError::NotFound)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_category(&self, rand_id: &str) -> Result<Category, AppError> {
        let categories = &self.structures.categories;
        match categories.get(rand_id).await {
            Ok(category) => Ok(category),
            Err(err) if err.is_not_found() => {
                if categories.is_missing(rand_id).await? {
                    return Err(AppError::NotFound);
                }
                self.categories
                    .seed_category(rand_id)
                    .await?
                    .ok_or(AppError::NotFound)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Newest tickets first.
    pub async fn list_timeline(&self, cursor: Option<&str>) -> Result<CursorPage<Ticket>, AppError> {
        let tickets = Arc::clone(&self.tickets);
        list_cursor(&self.structures.timeline, &[], cursor, |subtraction, last| async move {
            tickets.seed_timeline(subtraction, last.as_deref()).await
        })
        .await
    }

    /// Highest security risk first.
    pub async fn list_by_security_risk(
        &self,
        cursor: Option<&str>,
    ) -> Result<CursorPage<Ticket>, AppError> {
        let tickets = Arc::clone(&self.tickets);
        list_cursor(
            &self.structures.timeline_by_security_risk,
            &[],
            cursor,
            |subtraction, last| async move {
                tickets
                    .seed_timeline_by_security_risk(subtraction, last.as_deref())
                    .await
            },
        )
        .await
    }

    /// Newest tickets of one category first.
    pub async fn list_by_category(
        &self,
        category_rand_id: &str,
        cursor: Option<&str>,
    ) -> Result<CursorPage<Ticket>, AppError> {
        let tickets = Arc::clone(&self.tickets);
        list_cursor(
            &self.structures.timeline_by_category,
            &[category_rand_id],
            cursor,
            |subtraction, last| async move {
                tickets
                    .seed_timeline_by_category(category_rand_id, subtraction, last.as_deref())
                    .await
            },
        )
        .await
    }

    /// Every ticket reported by one account.
    pub async fn list_by_account(
        &self,
        account_rand_id: &str,
        order: Order,
    ) -> Result<Vec<Ticket>, AppError> {
        let sorted = &self.structures.sorted_by_account;
        let tickets = &self.tickets;
        let group = [account_rand_id];
        let outcome = read_through(
            move || async move {
                let items = sorted.fetch(&group, order).await?;
                let empty = sorted.requires_seeding(&group).await?;
                Ok::<_, AppError>((items, empty))
            },
            |(_, empty): &(Vec<Ticket>, bool)| empty.then_some(()),
            move |()| async move {
                tickets
                    .seed_sorted_by_account(account_rand_id)
                    .await
                    .map_err(AppError::from)
            },
        )
        .await?;
        Ok(outcome.value.0)
    }

    /// Offset page `page_number`, newest first; pages start at 1.
    pub async fn list_page(&self, page_number: u64) -> Result<Vec<Ticket>, AppError> {
        let page = &self.structures.page;
        let tickets = &self.tickets;
        let outcome = read_through(
            move || async move { page.fetch(&[], page_number).await.map_err(AppError::from) },
            |items: &Vec<Ticket>| page.requires_seeding(items.len()).then_some(page_number),
            move |page_number| async move {
                tickets.seed_page(page_number).await.map_err(AppError::from)
            },
        )
        .await?;
        Ok(outcome.value)
    }

    /// Tickets created within `[lower, upper]`, oldest first.
    pub async fn list_by_date(
        &self,
        lower: OffsetDateTime,
        upper: OffsetDateTime,
    ) -> Result<TimeRangeResult<Ticket>, AppError> {
        if lower > upper {
            return Err(AppError::validation("range lower bound is after its upper bound"));
        }
        let series = &self.structures.by_date;
        let tickets = &self.tickets;
        let outcome = read_through(
            move || async move {
                series
                    .fetch(&[], lower, upper)
                    .await
                    .map_err(AppError::from)
            },
            |result: &TimeRangeResult<Ticket>| series.requires_seeding(result).then_some(()),
            move |()| async move {
                tickets
                    .seed_by_date(lower, upper)
                    .await
                    .map_err(AppError::from)
            },
        )
        .await?;
        Ok(outcome.value)
    }
}

/// Cursor read shared by every timeline: a short page seeds the shortfall
/// after the furthest id seen, then the page is fetched once more.
async fn list_cursor<Seed, SeedFut>(
    timeline: &Timeline<Ticket>,
    group: &[&str],
    cursor: Option<&str>,
    seed: Seed,
) -> Result<CursorPage<Ticket>, AppError>
where
    Seed: FnOnce(usize, Option<String>) -> SeedFut,
    SeedFut: std::future::Future<Output = Result<usize, RepoError>>,
{
    let cursor = match cursor {
        Some(raw) => TimelineCursor::decode(raw)?,
        None => TimelineCursor::start(),
    };
    let cursor = &cursor;
    let outcome = read_through(
        move || async move { fetch_timeline(timeline, group, cursor).await },
        |page: &TimelinePage<Ticket>| {
            timeline.requires_seeding(page.items.len()).then(|| {
                let last = page
                    .valid_last_rand_id
                    .clone()
                    .or_else(|| cursor.last().map(str::to_owned));
                (page.items.len(), last)
            })
        },
        move |(subtraction, last)| async move {
            seed(subtraction, last).await.map_err(AppError::from)
        },
    )
    .await?;

    let page = outcome.value;
    let next_cursor = match page.valid_last_rand_id {
        Some(last) => Some(TimelineCursor::new(vec![last], page.position).encode()?),
        None => None,
    };
    Ok(CursorPage::new(page.items, next_cursor))
}

async fn fetch_timeline(
    timeline: &Timeline<Ticket>,
    group: &[&str],
    cursor: &TimelineCursor,
) -> Result<TimelinePage<Ticket>, AppError> {
    let page = match (cursor.last_rand_ids().is_empty(), cursor.position()) {
        (true, Some(position)) => timeline.fetch_from_position(group, position).await,
        _ => timeline.fetch(group, cursor.last_rand_ids()).await,
    };
    page.map_err(AppError::from)
}
