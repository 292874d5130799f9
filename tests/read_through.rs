use std::sync::Arc;

use reseed::application::error::AppError;
use reseed::application::repos::{AccountsRepo, CategoriesRepo, TicketsRepo};
use reseed::application::structures::TicketStructures;
use reseed::application::tickets::{NewTicket, TicketService};
use reseed::cache::{CacheConfig, CacheStore, MemoryStore, Order, coverage_key};
use reseed::domain::{Account, Category, Record, Ticket};
use reseed::infra::db::{
    AccountRepository, CategoryRepository, PostgresRepositories, TicketRepository,
};
use sqlx::PgPool;
use time::{Duration, OffsetDateTime, macros::datetime};

const EPOCH: OffsetDateTime = datetime!(2026-03-01 09:00 UTC);

struct Harness {
    service: TicketService,
    tickets: Arc<dyn TicketsRepo>,
    accounts: Arc<dyn AccountsRepo>,
    categories: Arc<dyn CategoriesRepo>,
}

/// Service over `pool` with its own, initially empty, cache store.
fn harness(pool: &PgPool, page_size: usize) -> Harness {
    let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
    let config = CacheConfig::default().with_page_size(page_size);
    let structures = Arc::new(TicketStructures::new(store, &config));
    let db = PostgresRepositories::new(pool.clone());

    let tickets: Arc<dyn TicketsRepo> =
        Arc::new(TicketRepository::new(db.clone(), Arc::clone(&structures)));
    let accounts: Arc<dyn AccountsRepo> = Arc::new(AccountRepository::new(
        db.clone(),
        structures.accounts.clone(),
    ));
    let categories: Arc<dyn CategoriesRepo> = Arc::new(CategoryRepository::new(
        db,
        structures.categories.clone(),
    ));
    let service = TicketService::new(
        structures,
        Arc::clone(&tickets),
        Arc::clone(&accounts),
        Arc::clone(&categories),
    );
    Harness {
        service,
        tickets,
        accounts,
        categories,
    }
}

async fn insert_account(harness: &Harness, name: &str, email: &str) -> Account {
    let account = Account::new(name, email);
    harness
        .accounts
        .create_account(&account)
        .await
        .expect("insert account");
    account
}

/// Insert tickets one minute apart, oldest first; returns them newest first.
async fn insert_tickets(
    harness: &Harness,
    account: &Account,
    category: Option<&Category>,
    count: usize,
) -> Vec<Ticket> {
    let mut tickets = Vec::with_capacity(count);
    for index in 0..count {
        let mut ticket = Ticket::new(format!("ticket {index}"), account, index as i64);
        ticket.record = Record::with_created_at(EPOCH + Duration::minutes(index as i64));
        if let Some(category) = category {
            ticket = ticket.with_category(category);
        }
        harness
            .tickets
            .create_ticket(&ticket)
            .await
            .expect("insert ticket");
        tickets.push(ticket);
    }
    tickets.reverse();
    tickets
}

fn rand_ids(tickets: &[Ticket]) -> Vec<&str> {
    tickets.iter().map(|t| t.record.rand_id.as_str()).collect()
}

/// Insert `count` tickets that share one creation time and one risk score;
/// returns their public ids in cache order (bytes, descending).
async fn insert_tied_tickets(harness: &Harness, account: &Account, count: usize) -> Vec<String> {
    let mut rand_ids = Vec::with_capacity(count);
    for index in 0..count {
        let mut ticket = Ticket::new(format!("tied {index}"), account, 7);
        ticket.record = Record::with_created_at(EPOCH);
        harness
            .tickets
            .create_ticket(&ticket)
            .await
            .expect("insert ticket");
        rand_ids.push(ticket.record.rand_id);
    }
    rand_ids.sort_unstable_by(|a, b| b.cmp(a));
    rand_ids
}

#[sqlx::test(migrations = "./migrations")]
async fn empty_cache_seeds_first_page_once(pool: PgPool) {
    let writer = harness(&pool, 5);
    let account = insert_account(&writer, "Ada", "ada@example.com").await;
    let inserted = insert_tickets(&writer, &account, None, 2).await;

    let reader = harness(&pool, 5);
    let page = reader.service.list_timeline(None).await.expect("first page");
    assert_eq!(rand_ids(&page.items), rand_ids(&inserted));
    assert_eq!(
        page.items[0].account.as_ref().map(|a| a.email.as_str()),
        Some("ada@example.com")
    );

    let cursor = page.next_cursor.expect("cursor after a non-empty page");
    let next = reader
        .service
        .list_timeline(Some(&cursor))
        .await
        .expect("second page");
    assert!(next.items.is_empty());
    assert!(next.next_cursor.is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn cursor_walks_the_timeline_seeding_each_shortfall(pool: PgPool) {
    let writer = harness(&pool, 3);
    let account = insert_account(&writer, "Ada", "ada@example.com").await;
    let inserted = insert_tickets(&writer, &account, None, 5).await;

    let reader = harness(&pool, 3);
    let first = reader.service.list_timeline(None).await.expect("first page");
    assert_eq!(rand_ids(&first.items), rand_ids(&inserted[..3]));

    let second = reader
        .service
        .list_timeline(first.next_cursor.as_deref())
        .await
        .expect("second page");
    assert_eq!(rand_ids(&second.items), rand_ids(&inserted[3..]));

    let third = reader
        .service
        .list_timeline(second.next_cursor.as_deref())
        .await
        .expect("third page");
    assert!(third.items.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn cursor_member_removed_from_cache_is_stale(pool: PgPool) {
    let harness = harness(&pool, 3);
    let account = insert_account(&harness, "Ada", "ada@example.com").await;
    let inserted = insert_tickets(&harness, &account, None, 5).await;

    let first = harness.service.list_timeline(None).await.expect("first page");
    harness
        .service
        .delete(&inserted[2].record.rand_id)
        .await
        .expect("delete cursor ticket");

    let err = harness
        .service
        .list_timeline(first.next_cursor.as_deref())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::StalePagination));

    let restarted = harness.service.list_timeline(None).await.expect("restart");
    assert_eq!(restarted.items.len(), 3);
    assert!(
        !rand_ids(&restarted.items).contains(&inserted[2].record.rand_id.as_str())
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn missing_ticket_is_cached_as_blank(pool: PgPool) {
    let harness = harness(&pool, 5);

    let err = harness.service.get_ticket("no-such-ticket").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound));
    assert!(
        harness
            .service
            .structures()
            .tickets
            .is_missing("no-such-ticket")
            .await
            .unwrap()
    );

    let again = harness.service.get_ticket("no-such-ticket").await.unwrap_err();
    assert!(matches!(again, AppError::NotFound));
}

#[sqlx::test(migrations = "./migrations")]
async fn point_read_seeds_ticket_with_its_account(pool: PgPool) {
    let writer = harness(&pool, 5);
    let account = insert_account(&writer, "Ada", "ada@example.com").await;
    let inserted = insert_tickets(&writer, &account, None, 1).await;

    let reader = harness(&pool, 5);
    let ticket = reader
        .service
        .get_ticket(&inserted[0].record.rand_id)
        .await
        .expect("seeded ticket");
    assert_eq!(ticket.description, "ticket 0");
    assert_eq!(ticket.account.as_ref(), Some(&account));

    let cached_account = reader
        .service
        .structures()
        .accounts
        .get(&account.record.rand_id)
        .await
        .expect("joined account staged alongside the ticket");
    assert_eq!(cached_account, account);
}

#[sqlx::test(migrations = "./migrations")]
async fn security_risk_timeline_orders_by_score(pool: PgPool) {
    let writer = harness(&pool, 2);
    let account = insert_account(&writer, "Ada", "ada@example.com").await;
    insert_tickets(&writer, &account, None, 4).await;

    let reader = harness(&pool, 2);
    let first = reader
        .service
        .list_by_security_risk(None)
        .await
        .expect("first page");
    let risks: Vec<i64> = first.items.iter().map(|t| t.security_risk).collect();
    assert_eq!(risks, vec![3, 2]);

    let second = reader
        .service
        .list_by_security_risk(first.next_cursor.as_deref())
        .await
        .expect("second page");
    let risks: Vec<i64> = second.items.iter().map(|t| t.security_risk).collect();
    assert_eq!(risks, vec![1, 0]);
}

#[sqlx::test(migrations = "./migrations")]
async fn security_risk_walk_crosses_tied_scores(pool: PgPool) {
    let writer = harness(&pool, 2);
    let account = insert_account(&writer, "Ada", "ada@example.com").await;
    let expected = insert_tied_tickets(&writer, &account, 5).await;

    let reader = harness(&pool, 2);
    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..expected.len() + 2 {
        let page = reader
            .service
            .list_by_security_risk(cursor.as_deref())
            .await
            .expect("risk page");
        if page.items.is_empty() {
            break;
        }
        seen.extend(page.items.iter().map(|t| t.record.rand_id.clone()));
        let Some(next) = page.next_cursor else {
            break;
        };
        cursor = Some(next);
    }
    assert_eq!(seen, expected);
}

#[sqlx::test(migrations = "./migrations")]
async fn timeline_walk_crosses_tied_creation_times(pool: PgPool) {
    let writer = harness(&pool, 2);
    let account = insert_account(&writer, "Ada", "ada@example.com").await;
    let expected = insert_tied_tickets(&writer, &account, 5).await;

    let reader = harness(&pool, 2);
    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..expected.len() + 2 {
        let page = reader
            .service
            .list_timeline(cursor.as_deref())
            .await
            .expect("timeline page");
        if page.items.is_empty() {
            break;
        }
        seen.extend(page.items.iter().map(|t| t.record.rand_id.clone()));
        let Some(next) = page.next_cursor else {
            break;
        };
        cursor = Some(next);
    }
    assert_eq!(seen, expected);
}

#[sqlx::test(migrations = "./migrations")]
async fn category_timeline_only_holds_its_group(pool: PgPool) {
    let writer = harness(&pool, 5);
    let account = insert_account(&writer, "Ada", "ada@example.com").await;
    let physical = Category::new("physical");
    writer
        .categories
        .create_category(&physical)
        .await
        .expect("insert category");
    let grouped = insert_tickets(&writer, &account, Some(&physical), 2).await;
    insert_tickets(&writer, &account, None, 2).await;

    let reader = harness(&pool, 5);
    let page = reader
        .service
        .list_by_category(&physical.record.rand_id, None)
        .await
        .expect("category page");
    assert_eq!(rand_ids(&page.items), rand_ids(&grouped));
}

#[sqlx::test(migrations = "./migrations")]
async fn account_listing_seeds_whole_group(pool: PgPool) {
    let writer = harness(&pool, 2);
    let ada = insert_account(&writer, "Ada", "ada@example.com").await;
    let grace = insert_account(&writer, "Grace", "grace@example.com").await;
    let inserted = insert_tickets(&writer, &ada, None, 3).await;
    insert_tickets(&writer, &grace, None, 1).await;

    let reader = harness(&pool, 2);
    let newest_first = reader
        .service
        .list_by_account(&ada.record.rand_id, Order::Descending)
        .await
        .expect("account listing");
    assert_eq!(rand_ids(&newest_first), rand_ids(&inserted));

    let oldest_first = reader
        .service
        .list_by_account(&ada.record.rand_id, Order::Ascending)
        .await
        .expect("cached listing");
    let mut expected = rand_ids(&inserted);
    expected.reverse();
    assert_eq!(rand_ids(&oldest_first), expected);
}

#[sqlx::test(migrations = "./migrations")]
async fn offset_page_seeds_up_to_requested_page(pool: PgPool) {
    let writer = harness(&pool, 2);
    let account = insert_account(&writer, "Ada", "ada@example.com").await;
    let inserted = insert_tickets(&writer, &account, None, 5).await;

    let reader = harness(&pool, 2);
    let second = reader.service.list_page(2).await.expect("page two");
    assert_eq!(rand_ids(&second), rand_ids(&inserted[2..4]));

    let third = reader.service.list_page(3).await.expect("page three");
    assert_eq!(rand_ids(&third), rand_ids(&inserted[4..]));

    let err = reader.service.list_page(0).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[sqlx::test(migrations = "./migrations")]
async fn covered_date_range_is_served_from_cache(pool: PgPool) {
    let writer = harness(&pool, 5);
    let account = insert_account(&writer, "Ada", "ada@example.com").await;
    insert_tickets(&writer, &account, None, 3).await;

    let reader = harness(&pool, 5);
    let upper = EPOCH + Duration::hours(1);
    let first = reader
        .service
        .list_by_date(EPOCH, upper)
        .await
        .expect("seeded range");
    assert_eq!(first.items.len(), 3);
    assert!(first.items.windows(2).all(|w| w[0].record.created_at <= w[1].record.created_at));

    // Written through another cache store, so the reader's coverage still holds.
    let mut late = Ticket::new("late", &account, 0);
    late.record = Record::with_created_at(EPOCH + Duration::minutes(30));
    writer.tickets.create_ticket(&late).await.expect("insert late");

    let second = reader
        .service
        .list_by_date(EPOCH, upper)
        .await
        .expect("covered range");
    assert_eq!(second.items.len(), 3);
    assert!(!second.may_be_incomplete);

    let err = reader.service.list_by_date(upper, EPOCH).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[sqlx::test(migrations = "./migrations")]
async fn service_writes_go_through_to_the_cache(pool: PgPool) {
    let harness = harness(&pool, 5);
    let account = insert_account(&harness, "Ada", "ada@example.com").await;

    let created = harness
        .service
        .create(NewTicket {
            description: "  badge cloning  ".into(),
            account_rand_id: account.record.rand_id.clone(),
            category_rand_id: None,
            security_risk: 7,
        })
        .await
        .expect("create ticket");
    assert_eq!(created.description, "badge cloning");

    let cached = harness
        .service
        .structures()
        .tickets
        .get(&created.record.rand_id)
        .await
        .expect("cached on create");
    assert_eq!(cached.security_risk, 7);

    let resolved = harness
        .service
        .resolve(&created.record.rand_id)
        .await
        .expect("resolve ticket");
    assert!(resolved.resolved);
    let stored = harness
        .tickets
        .find_ticket_by_rand_id(&created.record.rand_id)
        .await
        .expect("query")
        .expect("row");
    assert!(stored.resolved);

    harness
        .service
        .delete(&created.record.rand_id)
        .await
        .expect("delete ticket");
    let err = harness
        .service
        .get_ticket(&created.record.rand_id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    let blank = harness
        .service
        .create(NewTicket {
            description: "   ".into(),
            account_rand_id: account.record.rand_id.clone(),
            category_rand_id: None,
            security_risk: 0,
        })
        .await
        .unwrap_err();
    assert!(matches!(blank, AppError::Validation(_)));
}

#[sqlx::test(migrations = "./migrations")]
async fn write_into_cold_cache_leaves_listings_seedable(pool: PgPool) {
    let writer = harness(&pool, 5);
    let account = insert_account(&writer, "Ada", "ada@example.com").await;
    insert_tickets(&writer, &account, None, 3).await;

    let reader = harness(&pool, 5);
    let created = reader
        .service
        .create(NewTicket {
            description: "tailgating".into(),
            account_rand_id: account.record.rand_id.clone(),
            category_rand_id: None,
            security_risk: 0,
        })
        .await
        .expect("create ticket");

    let by_account = reader
        .service
        .list_by_account(&account.record.rand_id, Order::Descending)
        .await
        .expect("account listing");
    assert_eq!(by_account.len(), 4);
    assert!(rand_ids(&by_account).contains(&created.record.rand_id.as_str()));

    let first_page = reader.service.list_page(1).await.expect("page one");
    assert_eq!(first_page.len(), 4);

    let by_risk = reader
        .service
        .list_by_security_risk(None)
        .await
        .expect("risk timeline");
    assert_eq!(by_risk.items.len(), 4);

    // Once seeded, later writes join the listing directly.
    let second = reader
        .service
        .create(NewTicket {
            description: "badge cloning".into(),
            account_rand_id: account.record.rand_id.clone(),
            category_rand_id: None,
            security_risk: 1,
        })
        .await
        .expect("create second ticket");
    let cached = reader
        .service
        .structures()
        .sorted_by_account
        .fetch(&[account.record.rand_id.as_str()], Order::Descending)
        .await
        .expect("cached listing");
    assert_eq!(cached.len(), 5);
    assert!(rand_ids(&cached).contains(&second.record.rand_id.as_str()));
}

#[sqlx::test(migrations = "./migrations")]
async fn repeated_seeds_leave_the_same_state(pool: PgPool) {
    let writer = harness(&pool, 3);
    let account = insert_account(&writer, "Ada", "ada@example.com").await;
    insert_tickets(&writer, &account, None, 5).await;

    let reader = harness(&pool, 3);
    let structures = reader.service.structures();
    let store = structures.tickets.store();
    let group = [account.record.rand_id.as_str()];
    let upper = EPOCH + Duration::hours(1);
    let timeline_key = structures.timeline.key(&[]).expect("timeline key");
    let account_key = structures.sorted_by_account.key(&group).expect("account key");
    let date_key = structures.by_date.key(&[]).expect("date key");

    let mut states = Vec::new();
    for _ in 0..2 {
        assert_eq!(reader.tickets.seed_timeline(0, None).await.expect("timeline"), 3);
        assert_eq!(
            reader
                .tickets
                .seed_sorted_by_account(&account.record.rand_id)
                .await
                .expect("account group"),
            5
        );
        assert_eq!(
            reader.tickets.seed_by_date(EPOCH, upper).await.expect("date range"),
            5
        );

        let cardinalities = (
            store.zcard(&timeline_key).await.expect("zcard"),
            store.zcard(&account_key).await.expect("zcard"),
            store.zcard(&date_key).await.expect("zcard"),
            store.zcard(&coverage_key(&date_key)).await.expect("zcard"),
        );
        let timeline = structures.timeline.fetch(&[], &[]).await.expect("timeline");
        let by_account = structures
            .sorted_by_account
            .fetch(&group, Order::Descending)
            .await
            .expect("account group");
        let by_date = structures
            .by_date
            .fetch(&[], EPOCH, upper)
            .await
            .expect("date range");
        states.push((cardinalities, timeline.items, by_account, by_date.items));
    }

    assert_eq!(states[0].0, (3, 5, 5, 1));
    assert_eq!(states[0], states[1]);
}

#[sqlx::test(migrations = "./migrations")]
async fn unknown_reporter_is_rejected(pool: PgPool) {
    let harness = harness(&pool, 5);
    let err = harness
        .service
        .create(NewTicket {
            description: "orphan".into(),
            account_rand_id: "nobody".into(),
            category_rand_id: None,
            security_risk: 1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
}

#[sqlx::test(migrations = "./migrations")]
async fn email_lookup_follows_account_updates(pool: PgPool) {
    let writer = harness(&pool, 5);
    let mut account = insert_account(&writer, "Ada", "ada@example.com").await;

    let reader = harness(&pool, 5);
    let found = reader
        .service
        .get_account_by_email("ada@example.com")
        .await
        .expect("seeded by email");
    assert_eq!(found.record.rand_id, account.record.rand_id);

    let err = reader
        .service
        .get_account_by_email("nobody@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    account.email = "lovelace@example.com".into();
    let updater = AccountRepository::new(
        PostgresRepositories::new(pool.clone()),
        reader.service.structures().accounts.clone(),
    );
    updater.update_account(&account).await.expect("update account");

    let err = reader
        .service
        .get_account_by_email("ada@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
    let moved = reader
        .service
        .get_account_by_email("lovelace@example.com")
        .await
        .expect("new alias");
    assert_eq!(moved.record.rand_id, account.record.rand_id);
}
