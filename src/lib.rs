//! scopetx - Unit-of-work scopes over a shared transaction
//!
//! This crate coordinates logical unit-of-work boundaries ("scopes") with a
//! data-access session and an ambient transaction. Nested scopes share one
//! transaction; the session is flushed and the ambient transaction
//! completed exactly once, after every scope has committed. A single scope
//! rolling back aborts all of them.
//!
//! # Example
//!
//! ```
//! use scopetx::config::{UnitOfWorkConfig, UnitOfWorkSettings};
//! use scopetx::session::MemoryStore;
//! use scopetx::state::ExecutionContext;
//! use scopetx::transaction::{TransactionManagerLocator, TransactionMode};
//!
//! let store = MemoryStore::new();
//! let sessions = store.clone();
//! let locator = TransactionManagerLocator::new(
//!     UnitOfWorkConfig::new(UnitOfWorkSettings::default())
//!         .with_session_fn(move || Ok(sessions.session())),
//! );
//!
//! let request = ExecutionContext::request();
//! let mut scope = locator.begin_scope(&request, TransactionMode::Default).unwrap();
//! let uow = locator.current(&request).current_unit_of_work().unwrap();
//! uow.insert("users", "1", serde_json::json!({"name": "Alice"})).unwrap();
//! scope.commit().unwrap();
//! locator.end(&request).unwrap();
//!
//! assert!(store.contains("users", "1"));
//! ```

pub mod config;
pub mod session;
pub mod state;
pub mod transaction;
