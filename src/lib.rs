//! Read-through cache engine over a key/sorted-set store, lazily seeded
//! from Postgres.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
