//! Data layer module
//!
//! Persistence collaborator for the delivery engine: follower records
//! stored in SQLite. Only the follower count and inbox list are consumed
//! by the outbound pool.

mod database;
mod models;

pub use database::Database;
pub use models::*;
