//! Every cache structure the ticket domain reads through, built once at
//! startup from one store handle and one [`CacheConfig`].

use std::sync::Arc;

use crate::cache::{
    Base, CacheConfig, CacheError, CacheStore, GroupedSorted, Order, Page, Relation, TimeSeries,
    Timeline, WriteBatch,
};
use crate::domain::{Account, Category, SECURITY_RISK_FIELD, Ticket};

pub const ACCOUNT_KEY: &str = "account:%s";
pub const ACCOUNT_EMAIL_KEY: &str = "account-email:%s";
pub const CATEGORY_KEY: &str = "category:%s";
pub const TICKET_KEY: &str = "ticket:%s";
pub const TICKET_TIMELINE_KEY: &str = "ticket-timeline";
pub const TICKET_TIMELINE_CATEGORY_KEY: &str = "ticket-timeline-category:%s";
pub const TICKET_TIMELINE_RISK_KEY: &str = "ticket-timeline-risk";
pub const TICKET_SORTED_ACCOUNT_KEY: &str = "ticket-sorted-account:%s";
pub const TICKET_PAGE_KEY: &str = "ticket-page";
pub const TICKET_BY_DATE_KEY: &str = "ticket-by-date";

fn ticket_account(ticket: &Ticket) -> Option<&str> {
    Some(ticket.account_rand_id.as_str())
}

fn assign_account(ticket: &mut Ticket, account: Option<Account>) {
    ticket.account = account;
}

/// Which of a ticket's memberships already hold seeded sets. A write only
/// joins sets a seed has started, so a cold set keeps asking for its seed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeededStructures {
    pub timeline: bool,
    pub timeline_by_category: bool,
    pub timeline_by_security_risk: bool,
    pub sorted_by_account: bool,
    pub page: bool,
}

impl SeededStructures {
    pub fn all() -> Self {
        Self {
            timeline: true,
            timeline_by_category: true,
            timeline_by_security_risk: true,
            sorted_by_account: true,
            page: true,
        }
    }
}

pub struct TicketStructures {
    pub accounts: Base<Account>,
    pub categories: Base<Category>,
    pub tickets: Base<Ticket>,
    pub account: Relation<Ticket, Account>,
    /// Newest first, all tickets.
    pub timeline: Timeline<Ticket>,
    /// Newest first, grouped by category public id.
    pub timeline_by_category: Timeline<Ticket>,
    /// Highest security risk first.
    pub timeline_by_security_risk: Timeline<Ticket>,
    /// Every ticket of one account, grouped by account public id.
    pub sorted_by_account: GroupedSorted<Ticket>,
    pub page: Page<Ticket>,
    /// Oldest first, scored by creation time.
    pub by_date: TimeSeries<Ticket>,
}

impl TicketStructures {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        let accounts = Base::new(Arc::clone(&store), ACCOUNT_KEY, config.base_ttl)
            .with_lookup_template(ACCOUNT_EMAIL_KEY);
        let categories = Base::new(Arc::clone(&store), CATEGORY_KEY, config.base_ttl);
        let tickets = Base::new(store, TICKET_KEY, config.base_ttl);
        let account = Relation::new("account", accounts.clone(), ticket_account, assign_account);
        let enrich = Arc::new(account.clone());

        let mut timeline = Timeline::new(
            tickets.clone(),
            TICKET_TIMELINE_KEY,
            config,
            Order::Descending,
        );
        timeline.add_relation(enrich.clone());

        let mut timeline_by_category = Timeline::new(
            tickets.clone(),
            TICKET_TIMELINE_CATEGORY_KEY,
            config,
            Order::Descending,
        );
        timeline_by_category.add_relation(enrich.clone());

        let mut timeline_by_security_risk = Timeline::new(
            tickets.clone(),
            TICKET_TIMELINE_RISK_KEY,
            config,
            Order::Descending,
        );
        timeline_by_security_risk.set_sorting_reference(SECURITY_RISK_FIELD);
        timeline_by_security_risk.add_relation(enrich.clone());

        let mut sorted_by_account =
            GroupedSorted::new(tickets.clone(), TICKET_SORTED_ACCOUNT_KEY, config);
        sorted_by_account.add_relation(enrich.clone());

        let mut page = Page::new(tickets.clone(), TICKET_PAGE_KEY, config, Order::Descending);
        page.add_relation(enrich.clone());

        let mut by_date =
            TimeSeries::new(tickets.clone(), TICKET_BY_DATE_KEY, config, Order::Ascending);
        by_date.add_relation(enrich);

        Self {
            accounts,
            categories,
            tickets,
            account,
            timeline,
            timeline_by_category,
            timeline_by_security_risk,
            sorted_by_account,
            page,
            by_date,
        }
    }

    /// Look up which memberships of `ticket` a write may join.
    pub async fn seeded_for(&self, ticket: &Ticket) -> Result<SeededStructures, CacheError> {
        let timeline_by_category = match ticket.category_rand_id.as_deref() {
            Some(category) => self.timeline_by_category.is_seeded(&[category]).await?,
            None => false,
        };
        Ok(SeededStructures {
            timeline: self.timeline.is_seeded(&[]).await?,
            timeline_by_category,
            timeline_by_security_risk: self.timeline_by_security_risk.is_seeded(&[]).await?,
            sorted_by_account: self
                .sorted_by_account
                .is_seeded(&[ticket.account_rand_id.as_str()])
                .await?,
            page: self.page.is_seeded(&[]).await?,
        })
    }

    /// Stage the point entry and the memberships `seeded` allows.
    ///
    /// The point entry is stored without the attached account; reads attach
    /// it from the account cache. The date series takes every write, since
    /// its coverage markers decide completeness.
    pub fn stage_ticket(
        &self,
        batch: &mut WriteBatch,
        ticket: &Ticket,
        seeded: SeededStructures,
    ) -> Result<(), CacheError> {
        let mut bare = ticket.clone();
        bare.account = None;
        self.tickets.stage_upsert(batch, &bare)?;

        let account = [bare.account_rand_id.as_str()];
        if seeded.timeline {
            self.timeline.stage_add(batch, &bare, &[])?;
        }
        if seeded.timeline_by_security_risk {
            self.timeline_by_security_risk.stage_add(batch, &bare, &[])?;
        }
        if seeded.sorted_by_account {
            self.sorted_by_account.stage_add(batch, &bare, &account)?;
        }
        if seeded.page {
            self.page.stage_add(batch, &bare, &[])?;
        }
        self.by_date.stage_add(batch, &bare, &[])?;
        if let (true, Some(category)) =
            (seeded.timeline_by_category, bare.category_rand_id.as_deref())
        {
            self.timeline_by_category.stage_add(batch, &bare, &[category])?;
        }
        Ok(())
    }

    /// Blank the point entry and drop every membership of `ticket`.
    pub fn stage_ticket_removal(
        &self,
        batch: &mut WriteBatch,
        ticket: &Ticket,
    ) -> Result<(), CacheError> {
        self.tickets.stage_blank(batch, &ticket.record.rand_id)?;

        let account = [ticket.account_rand_id.as_str()];
        self.timeline.stage_remove(batch, ticket, &[])?;
        self.timeline_by_security_risk.stage_remove(batch, ticket, &[])?;
        self.sorted_by_account.stage_remove(batch, ticket, &account)?;
        self.page.stage_remove(batch, ticket, &[])?;
        self.by_date.stage_remove(batch, ticket, &[])?;
        if let Some(category) = ticket.category_rand_id.as_deref() {
            self.timeline_by_category.stage_remove(batch, ticket, &[category])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    fn structures() -> TicketStructures {
        TicketStructures::new(Arc::new(MemoryStore::new()), &CacheConfig::default())
    }

    #[tokio::test]
    async fn staged_ticket_appears_in_every_structure() {
        let structures = structures();
        let account = Account::new("Ada", "ada@example.com");
        let category = Category::new("physical");
        structures.accounts.upsert(&account).await.unwrap();
        let ticket = Ticket::new("tailgating", &account, 9).with_category(&category);

        let mut batch = WriteBatch::new();
        structures
            .stage_ticket(&mut batch, &ticket, SeededStructures::all())
            .unwrap();
        structures.tickets.store().apply(batch).await.unwrap();

        let page = structures.timeline.fetch(&[], &[]).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].account.as_ref(), Some(&account));

        let by_category = structures
            .timeline_by_category
            .fetch(&[category.record.rand_id.as_str()], &[])
            .await
            .unwrap();
        assert_eq!(by_category.items.len(), 1);

        let by_account = structures
            .sorted_by_account
            .fetch(&[account.record.rand_id.as_str()], Order::Descending)
            .await
            .unwrap();
        assert_eq!(by_account.len(), 1);
        assert_eq!(structures.page.fetch(&[], 1).await.unwrap().len(), 1);

        let cached = structures.tickets.get(&ticket.record.rand_id).await.unwrap();
        assert!(cached.account.is_none());
    }

    #[tokio::test]
    async fn removal_blanks_point_entry_and_memberships() {
        let structures = structures();
        let account = Account::new("Ada", "ada@example.com");
        let ticket = Ticket::new("tailgating", &account, 9);

        let mut batch = WriteBatch::new();
        structures
            .stage_ticket(&mut batch, &ticket, SeededStructures::all())
            .unwrap();
        structures.tickets.store().apply(batch).await.unwrap();
        let mut batch = WriteBatch::new();
        structures.stage_ticket_removal(&mut batch, &ticket).unwrap();
        structures.tickets.store().apply(batch).await.unwrap();

        assert!(structures.tickets.is_missing(&ticket.record.rand_id).await.unwrap());
        assert!(structures.timeline.fetch(&[], &[]).await.unwrap().items.is_empty());
        assert!(
            structures
                .timeline_by_security_risk
                .fetch(&[], &[])
                .await
                .unwrap()
                .items
                .is_empty()
        );
    }

    #[tokio::test]
    async fn writes_only_join_seeded_sets() {
        let structures = structures();
        let account = Account::new("Ada", "ada@example.com");
        let category = Category::new("physical");
        let ticket = Ticket::new("tailgating", &account, 9).with_category(&category);

        let cold = structures.seeded_for(&ticket).await.unwrap();
        assert_eq!(cold, SeededStructures::default());

        let mut batch = WriteBatch::new();
        structures.stage_ticket(&mut batch, &ticket, cold).unwrap();
        structures.tickets.store().apply(batch).await.unwrap();

        let group = [account.record.rand_id.as_str()];
        assert!(structures.sorted_by_account.requires_seeding(&group).await.unwrap());
        assert!(!structures.page.is_seeded(&[]).await.unwrap());
        assert!(!structures.timeline.is_seeded(&[]).await.unwrap());
        assert!(structures.tickets.get(&ticket.record.rand_id).await.is_ok());

        let earlier = Ticket::new("badge cloning", &account, 3);
        structures.sorted_by_account.add_item(&earlier, &group).await.unwrap();
        structures.page.add_item(&earlier, &[]).await.unwrap();
        let warm = structures.seeded_for(&ticket).await.unwrap();
        assert!(warm.sorted_by_account && warm.page);
        assert!(!warm.timeline && !warm.timeline_by_category);
    }
}
