use std::{process, sync::Arc};

use reseed::{
    application::{
        error::AppError,
        repos::{AccountsRepo, CategoriesRepo, TicketsRepo},
        structures::TicketStructures,
        tickets::TicketService,
    },
    cache::{CacheConfig, CacheStore, DEFAULT_SWEEP_INTERVAL, MemoryStore, RedisStore},
    config,
    infra::{
        db::{AccountRepository, CategoryRepository, PostgresRepositories, TicketRepository},
        error::InfraError,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Migrate(_) => run_migrate(&settings).await,
        config::Command::Health(_) => run_health(&settings).await,
        config::Command::Warm(_) => run_warm(&settings).await,
    }
}

async fn run_migrate(settings: &config::Settings) -> Result<(), AppError> {
    let repositories = connect_database(settings).await?;
    PostgresRepositories::run_migrations(repositories.pool())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    info!("migrations applied");
    Ok(())
}

async fn run_health(settings: &config::Settings) -> Result<(), AppError> {
    let repositories = connect_database(settings).await?;
    repositories
        .health_check()
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let store = connect_store(settings).await?;
    store
        .ping()
        .await
        .map_err(|err| AppError::from(InfraError::cache_store(err.to_string())))?;

    info!("postgres and cache store reachable");
    Ok(())
}

async fn run_warm(settings: &config::Settings) -> Result<(), AppError> {
    let repositories = connect_database(settings).await?;
    let store = connect_store(settings).await?;
    let service = build_ticket_service(repositories, store, &CacheConfig::from(&settings.cache));

    let timeline = service.list_timeline(None).await?;
    let first_page = service.list_page(1).await?;
    info!(
        timeline = timeline.items.len(),
        page = first_page.len(),
        "cache warmed"
    );
    Ok(())
}

async fn connect_database(settings: &config::Settings) -> Result<PostgresRepositories, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))?;

    let pool = PostgresRepositories::connect(database_url, settings.database.max_connections.get())
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;
    Ok(PostgresRepositories::new(pool))
}

async fn connect_store(settings: &config::Settings) -> Result<Arc<dyn CacheStore>, AppError> {
    match settings.redis.url.as_deref() {
        Some(url) => {
            let store = RedisStore::connect(url)
                .await
                .map_err(|err| AppError::from(InfraError::cache_store(err.to_string())))?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("redis url is not configured; using a process-local cache store");
            let store = Arc::new(MemoryStore::new());
            store.spawn_sweeper(DEFAULT_SWEEP_INTERVAL);
            Ok(store)
        }
    }
}

fn build_ticket_service(
    repositories: PostgresRepositories,
    store: Arc<dyn CacheStore>,
    cache: &CacheConfig,
) -> TicketService {
    let structures = Arc::new(TicketStructures::new(store, cache));
    let tickets: Arc<dyn TicketsRepo> = Arc::new(TicketRepository::new(
        repositories.clone(),
        Arc::clone(&structures),
    ));
    let accounts: Arc<dyn AccountsRepo> = Arc::new(AccountRepository::new(
        repositories.clone(),
        structures.accounts.clone(),
    ));
    let categories: Arc<dyn CategoriesRepo> = Arc::new(CategoryRepository::new(
        repositories,
        structures.categories.clone(),
    ));
    TicketService::new(structures, tickets, accounts, categories)
}
