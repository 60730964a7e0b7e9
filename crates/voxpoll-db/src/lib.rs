//! Storage layer for voxpoll.
//!
//! Provides the SQLite connection pool (via `r2d2`), WAL-mode initialization
//! and the embedded migrations that create the survey tables: definitions,
//! sessions and the one-per-session extracted responses.
//!
//! Queries over those tables live in `voxpoll-survey`; this crate only owns
//! the connection lifecycle and the schema.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
