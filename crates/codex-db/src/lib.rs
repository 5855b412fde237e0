//! Database layer for CodeXAlpha.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. Every table the service uses (accounts,
//! persona runs, codexes, share links, Lightathon enrollments, settings and
//! the usage event log) is created through versioned migrations managed by
//! this crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: a single self-hosted file replaces the hosted
//!   Postgres of earlier deployments. WAL mode allows concurrent readers
//!   with a single writer, which matches the request/generation mix.
//! - **`r2d2` connection pool**: provides bounded connection reuse without
//!   manual lifetime management.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, so migrations ship with the server.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
