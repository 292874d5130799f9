use std::collections::HashSet;
use std::sync::Arc;

use metrics_util::debugging::DebuggingRecorder;
use reseed::application::repos::{AccountsRepo, TicketsRepo};
use reseed::application::structures::TicketStructures;
use reseed::cache::{
    CacheConfig, CacheStore, METRIC_CACHE_BLANK_HIT, METRIC_CACHE_HIT, METRIC_CACHE_MISS,
    METRIC_SEED, METRIC_SEED_MS, METRIC_SEED_ROWS, METRIC_STALE_PAGINATION, MemoryStore,
};
use reseed::domain::{Account, Ticket};
use reseed::infra::db::{AccountRepository, PostgresRepositories, TicketRepository};
use sqlx::PgPool;

#[sqlx::test(migrations = "./migrations")]
async fn cache_and_seed_paths_emit_expected_metric_keys(pool: PgPool) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
    let config = CacheConfig::default().with_page_size(1);
    let structures = Arc::new(TicketStructures::new(store, &config));
    let db = PostgresRepositories::new(pool);
    let accounts = AccountRepository::new(db.clone(), structures.accounts.clone());
    let tickets = TicketRepository::new(db, Arc::clone(&structures));

    let account = Account::new("Ada", "ada@example.com");
    accounts.create_account(&account).await.expect("insert account");
    let first = Ticket::new("first", &account, 1);
    let second = Ticket::new("second", &account, 2);
    tickets.create_ticket(&first).await.expect("insert first");
    tickets.create_ticket(&second).await.expect("insert second");

    // Point cache: hit, miss, then a blank hit after the seeder records absence.
    structures
        .tickets
        .get(&first.record.rand_id)
        .await
        .expect("written through on create");
    assert!(structures.tickets.get("missing").await.is_err());
    assert!(tickets.seed_ticket("missing").await.expect("seed").is_none());
    assert!(structures.tickets.get("missing").await.is_err());

    // Seeders: timeline shortfall and a point seed.
    tickets.seed_timeline(0, None).await.expect("seed timeline");

    // Stale cursor: remove the cursor member, then page after it.
    tickets.delete_ticket(&second).await.expect("delete second");
    let stale = structures
        .timeline
        .fetch(&[], &[second.record.rand_id.clone()])
        .await;
    assert!(stale.is_err());

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        METRIC_CACHE_HIT,
        METRIC_CACHE_MISS,
        METRIC_CACHE_BLANK_HIT,
        METRIC_STALE_PAGINATION,
        METRIC_SEED,
        METRIC_SEED_ROWS,
        METRIC_SEED_MS,
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
