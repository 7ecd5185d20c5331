//! Persistence Adapters
//!
//! - **Postgres**: production store for prices, watchlist and broker session
//! - **In-memory**: store and directory for tests and database-free runs

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryDirectory, InMemoryPriceStore, StoreCounters};
pub use postgres::PgStore;
