//! # TetherDB Store
//!
//! Object-store database boundary for TetherDB.
//!
//! This crate defines the interface of the underlying storage engine: a
//! local database offering **short-lived** read-write transactions over
//! named object stores, with key/value CRUD and ordered queries. The
//! engine above (`tetherdb_core`) stretches these short-lived
//! transactions into long-lived ones; this crate only describes the
//! collaborator being stretched, and simulates it for tests.
//!
//! ## Design Principles
//!
//! - The boundary is two traits: [`ObjectStoreDatabase`] opens
//!   transactions, [`TransactionHandle`] is one live short-lived
//!   transaction
//! - Handles auto-close after an engine-defined inactivity window; every
//!   operation resets that clock
//! - Records cross the boundary as structurally independent value graphs
//!
//! ## Available Implementations
//!
//! - [`MemoryDatabase`] - In-memory engine with a configurable
//!   inactivity lease, for testing and ephemeral data

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;
mod query;

pub use backend::{ObjectStoreDatabase, TransactionHandle};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryDatabase;
pub use query::{Filter, KeyOrder, Query};
