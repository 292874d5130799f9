//! Application services over the cache structures and repositories.

pub mod error;
pub mod pagination;
pub mod read_through;
pub mod repos;
pub mod structures;
pub mod tickets;
