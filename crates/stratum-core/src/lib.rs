//! # stratum-core
//!
//! Core types, traits, and abstractions for stratum.
//!
//! This crate provides the typed records and collaborator interfaces that the
//! scheduler, the tag engine and the storage adapters share. It performs no I/O.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod tags;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use tags::*;
pub use traits::*;
