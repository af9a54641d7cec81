//! Data-access sessions.
//!
//! A session is the unit of work a [`Transaction`](crate::transaction::Transaction)
//! owns: repositories stage changes on it, and the transaction flushes it
//! once every enlisted scope has committed.
//!
//! ```text
//!   Scope ──commit──▶ Transaction ──flush──▶ UnitOfWork (session)
//!                          │                       ▲   ▲
//!                          └──complete──▶ Ambient ─┘   │
//!                                        (commit)      │
//!                         Repository<T> ───────────────┘
//! ```

mod error;
mod memory;
mod repository;

pub use error::{SessionError, SessionResult};
pub use memory::{MemoryStore, MemoryUnitOfWork};
pub use repository::{Entity, Repository};

/// A data-access session tracked by a transaction.
///
/// Methods take `&self`: the session is shared between the transaction that
/// owns it and the repositories working against it, so implementations keep
/// their own interior mutability.
///
/// A transaction never holds its own lock while calling into the session,
/// so implementations may query the transaction from these methods.
pub trait UnitOfWork: Send + Sync + 'static {
    /// Push every pending change to the data source inside the ambient
    /// transaction.
    fn flush(&self) -> SessionResult<()>;

    /// Called once the ambient transaction has committed. Sessions whose
    /// flushed writes are not enlisted in the ambient transaction make them
    /// durable here; enlisted ones have nothing left to do.
    fn commit(&self) -> SessionResult<()> {
        Ok(())
    }

    /// Release the session. Changes that were not committed are discarded.
    fn close(&self) {}
}

/// Creates a fresh session for every new transaction.
pub trait SessionFactory<U>: Send + Sync {
    fn create(&self) -> SessionResult<U>;
}

impl<U, F> SessionFactory<U> for F
where
    F: Fn() -> SessionResult<U> + Send + Sync,
{
    fn create(&self) -> SessionResult<U> {
        self()
    }
}
