//! # TetherDB Core
//!
//! Long-lived transaction engine for TetherDB.
//!
//! This crate turns a storage engine offering only **short-lived**
//! atomic transactions (the `tetherdb_store` boundary) into one
//! supporting long-lived, application-controlled transactions:
//!
//! - [`TransactionRunner`] - keep-alive state machine that stretches a
//!   short-lived transaction indefinitely with filler probe reads,
//!   while draining caller-submitted operations
//! - [`Transaction`] - the public unit of atomic work, with exactly-once
//!   commit/abort semantics
//! - the persistence context (embedded in [`EntityManager`] /
//!   [`Transaction`]) - shadow-copies fetched records to detect
//!   modifications and revert them on abort
//! - [`EntityManager`] - the facade owning entity types, the context,
//!   and at most one active read-write transaction
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tetherdb_core::{Entity, EntityManager, EntityType};
//! use tetherdb_store::MemoryDatabase;
//! use tetherdb_value::{KeyPath, Value};
//!
//! static TASK: EntityType = EntityType::new("Task", "tasks");
//!
//! let db = MemoryDatabase::new();
//! db.create_store("tasks", KeyPath::Single("id".into()), true);
//! let manager = EntityManager::new(Arc::new(db), &[&TASK]);
//!
//! let task = Entity::new(&TASK);
//! task.set("done", Value::Bool(false)).unwrap();
//! manager
//!     .run_transaction(|tx| {
//!         tx.persist(&task)?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let found = manager.find(&TASK, &Value::Integer(1)).unwrap();
//! assert!(found.is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod completion;
mod config;
mod context;
mod entity;
mod error;
mod manager;
mod runner;
mod transaction;
mod types;

pub use completion::Completion;
pub use config::RunnerConfig;
pub use entity::{Entity, EntityType};
pub use error::{CoreError, CoreResult};
pub use manager::{EntityManager, TransactionObserver};
pub use runner::{IdleObserver, Operation, TransactionRunner};
pub use transaction::Transaction;
pub use types::TransactionId;
