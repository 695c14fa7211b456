//! Opsuite Shared
//!
//! Pieces every Opsuite binary needs: the Postgres pool, the embedded
//! migrations and the subscription lifecycle vocabulary.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations, DbError};
pub use types::{ParseEnumError, SubscriptionStatus};
