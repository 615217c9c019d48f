//! SQLite-backed persistence for the offline sync subsystem.
//!
//! Reads go straight to the r2d2 pool; every write funnels through a single
//! writer thread so each mutation runs in its own immediate transaction.

pub mod db;
pub mod errors;
pub mod records;
mod schema;

pub use db::{create_pool, get_connection, init, run_migrations, DbConnection, DbPool};
pub use db::write_actor::{spawn_writer, WriteHandle};
pub use errors::StorageError;
pub use records::RecordStore;
