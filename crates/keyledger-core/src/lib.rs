//! Core of keyledger: the credit ledger and key lifecycle.
//!
//! This crate provides:
//! - The record types stored in the realtime-database tree
//! - A store abstraction with a Firebase REST backend and an in-memory backend
//! - Repositories over each collection of the tree
//! - The credit ledger (agent credits, transfers, key issuance)
//! - The usage engine behind the public `credit` / `use` endpoints
//! - Login and maintenance-mode checks
//!
//! # Usage
//!
//! ```ignore
//! use keyledger_core::{store::MemoryStore, CasPolicy, UsageEngine};
//!
//! let db = MemoryStore::shared();
//! let engine = UsageEngine::new(db, CasPolicy::default());
//! let report = engine.use_tokens("netflix", "NFX-ABCD-EFGH", 3, "10.0.0.1").await?;
//! ```

pub mod access;
pub mod error;
pub mod keygen;
pub mod ledger;
pub mod models;
pub mod reports;
pub mod repo;
pub mod store;
pub mod usage;

pub use access::{parse_ip_list, AccessControl, LoginOutcome, LoginRefusal, Principal};
pub use error::{LedgerError, StoreError};
pub use ledger::{Ledger, NewAgent, TransferReceipt};
pub use models::*;
pub use repo::Repositories;
pub use store::{CasPolicy, Db, DbPath, RealtimeDb};
pub use usage::{parse_use_request, CreditReport, KeyOwner, UsageEngine, UsageError, UseReport, UseRequest};
