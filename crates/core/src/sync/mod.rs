//! Sync domain models and helpers.

mod engine;
mod model;
mod scheduler;

pub use engine::*;
pub use model::*;
pub use scheduler::*;
