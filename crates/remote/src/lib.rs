//! Remote store adapter for the offline sync subsystem.
//!
//! Defines the [`RemoteStore`] contract the engine syncs against and an HTTP
//! implementation backed by the farm cloud REST API.

pub mod client;
pub mod config;
pub mod error;
pub mod types;

pub use client::HttpRemoteStore;
pub use config::RemoteConfig;
pub use error::{RemoteStoreError, Result};
pub use types::RemoteStore;
