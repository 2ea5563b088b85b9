//! Library crate behind the `unicred` consoles.
//!
//! Exposes the modules the binary and the integration tests in `tests/` use.

pub mod agent;
pub mod cli;
pub mod config;
pub mod console;
pub mod errors;
pub mod models;
pub mod payload;
pub mod roles;
pub mod store;
pub mod watch;
