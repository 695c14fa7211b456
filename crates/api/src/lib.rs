// API crate clippy configuration
#![allow(clippy::result_large_err)] // ApiError carries provider messages
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Opsuite API Library
//!
//! HTTP surface for payment sessions, Xendit callbacks, invoice PDFs,
//! trial status and subscription analytics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
