//! Unit-of-work scopes and the transactions they share.
//!
//! Application code opens a [`Scope`] for every logical unit of work. The
//! scope enlists with the [`TransactionManager`] of its execution context,
//! which either attaches it to the current [`Transaction`] or starts a new
//! one (fresh ambient transaction + fresh session) depending on the
//! requested [`TransactionMode`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                TransactionManagerLocator                    │
//! │        (one TransactionManager per ExecutionContext)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │      (stack of live transactions, join or push per mode)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ Transaction │◀──────│    Scope    │       │   Ambient   │
//!  │ (enlisted   │signals│ (commit /   │       │ transaction │
//!  │  scopes)    │       │  dispose)   │       │  provider   │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use scopetx::config::{UnitOfWorkConfig, UnitOfWorkSettings};
//! use scopetx::session::MemoryStore;
//! use scopetx::transaction::{TransactionManager, TransactionMode};
//!
//! let store = MemoryStore::new();
//! let sessions = store.clone();
//! let manager = TransactionManager::new(
//!     UnitOfWorkConfig::new(UnitOfWorkSettings::default())
//!         .with_session_fn(move || Ok(sessions.session())),
//! );
//!
//! let mut outer = manager.begin_scope(TransactionMode::Default)?;
//! {
//!     let mut inner = manager.begin_scope(TransactionMode::Default)?;
//!     let uow = manager.current_unit_of_work().expect("scope is open");
//!     uow.insert("users", "1", serde_json::json!({"name": "Alice"}))?;
//!     inner.commit()?;
//! }
//! outer.commit()?; // last scope out flushes the session
//!
//! assert!(store.contains("users", "1"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod ambient;
mod error;
mod isolation;
mod locator;
mod manager;
mod scope;
mod types;
mod unit;

pub use ambient::{
    AmbientOutcome, AmbientRecord, AmbientTransaction, AmbientTransactionProvider,
    LocalTransaction, LocalTransactionProvider,
};
pub use error::{TransactionError, TransactionResult};
pub use isolation::{IsolationLevel, TransactionMode, TransactionOptions, TransactionScopeOption};
pub use locator::TransactionManagerLocator;
pub use manager::TransactionManager;
pub use scope::{Scope, ScopeHandle, ScopeObserver};
pub use types::{ManagerId, ScopeCompletion, ScopeId, TransactionId};
pub use unit::Transaction;
