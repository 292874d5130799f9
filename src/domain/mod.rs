//! Domain layer types and invariants.

pub mod entities;
pub mod record;

pub use entities::{Account, Category, SECURITY_RISK_FIELD, Ticket};
pub use record::{Entity, Record, generate_rand_id, score_time, time_score};
