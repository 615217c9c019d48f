//! Core domain models and helpers for offline-first record sync.

pub mod errors;
pub mod sync;

pub use errors::{DatabaseError, Error, Result};
