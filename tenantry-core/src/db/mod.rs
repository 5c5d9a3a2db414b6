/// Persistence layer
///
/// # Modules
///
/// - `store`: The transactional seam every service goes through
/// - `postgres`: PostgreSQL implementation of the store
/// - `memory`: In-memory implementation of the store
/// - `pool`: PostgreSQL connection pool management with health checks
/// - `migrations`: Embedded schema migrations
/// - Models are in the `models` module at crate root level

pub mod memory;
pub mod migrations;
pub mod pool;
pub mod postgres;
pub mod store;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{IdentityStore, StoreError, StoreTransaction, TxMode};
