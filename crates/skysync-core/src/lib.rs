//! Skysync Core - State model for cockpit synchronization
//!
//! This crate provides the shared data model for the skysync engine:
//! - Dynamic value types (`Value`, `ValueMap`)
//! - Flat, case-insensitive state snapshots and change sets
//! - The canonical per-process `StateStore`
//! - The variable/event descriptor `Catalog`
//!
//! The store is the single source of truth per process; every other
//! component (diffing, reconciliation, sync orchestration) reads and
//! writes through it.

mod catalog;
mod error;
mod snapshot;
mod store;
pub mod time;
mod value;

pub use catalog::{Catalog, CatalogExtension, DataKind, EventDescriptor, VarDescriptor};
pub use error::{Error, Result};
pub use snapshot::{DiffResult, Snapshot};
pub use store::StateStore;
pub use value::{Value, ValueMap};
