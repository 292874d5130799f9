//! Read-through cache structures over a key/sorted-set store.
//!
//! - [`Base`]: point cache by public id with negative caching
//! - [`Relation`]: secondary entity attached through a foreign public id
//! - [`Timeline`]: cursor-paginated sorted set per group key
//! - [`GroupedSorted`]: whole-group sorted set
//! - [`Page`]: offset-paginated sorted set
//! - [`TimeSeries`]: time range queries with seeded-interval coverage
//!
//! Structures are built once at startup from a [`CacheConfig`] and share one
//! [`CacheStore`] handle ([`RedisStore`] in production, [`MemoryStore`] in
//! tests and single-node setups).

mod base;
mod config;
mod error;
mod keys;
mod lock;
mod membership;
mod memory;
mod page;
mod position;
mod redis_store;
mod relation;
mod sorted;
mod store;
mod time_series;
mod timeline;

pub use base::{BLANK_MARKER, Base};
pub use config::CacheConfig;
pub use error::CacheError;
pub use keys::{KeyTemplate, coverage_key};
pub use memory::{DEFAULT_SWEEP_INTERVAL, MemoryStore};
pub use page::Page;
pub use position::PositionToken;
pub use redis_store::RedisStore;
pub use relation::{Enrichment, Relation};
pub use sorted::GroupedSorted;
pub use store::{CacheStore, Order, StoreError, WriteBatch, WriteOp};
pub use time_series::{TimeRangeResult, TimeSeries};
pub use timeline::{Timeline, TimelinePage};

pub const METRIC_CACHE_HIT: &str = "reseed_cache_hit_total";
pub const METRIC_CACHE_MISS: &str = "reseed_cache_miss_total";
pub const METRIC_CACHE_BLANK_HIT: &str = "reseed_cache_blank_hit_total";
pub const METRIC_STALE_PAGINATION: &str = "reseed_stale_pagination_total";
pub const METRIC_CACHE_WRITE_FAILURE: &str = "reseed_cache_write_failure_total";
pub const METRIC_SEED: &str = "reseed_seed_total";
pub const METRIC_SEED_ROWS: &str = "reseed_seed_rows_total";
pub const METRIC_SEED_MS: &str = "reseed_seed_ms";
