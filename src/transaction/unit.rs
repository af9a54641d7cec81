//! The transaction: one session, one ambient transaction, and the scopes
//! enlisted in it.
//!
//! Commit needs every enlisted scope to agree: each committing scope leaves
//! the enlistment list, and only when the last one leaves is the session
//! flushed and the ambient transaction completed. Rollback does not: the
//! first scope to roll back disposes the transaction, dooming every scope
//! still enlisted.
//!
//! Either way the transaction disposes itself exactly once, which ends the
//! ambient transaction, commits the session if the ambient transaction
//! committed, closes the session and notifies the manager so it can pop the
//! transaction off its stack. The transaction's lock is released before any
//! of the session or ambient transaction methods run.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::session::UnitOfWork;
use crate::transaction::ambient::AmbientTransaction;
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::isolation::{TransactionMode, TransactionOptions};
use crate::transaction::scope::{ScopeHandle, ScopeObserver};
use crate::transaction::types::{ScopeCompletion, TransactionId};

type DisposingListener = Box<dyn FnOnce(TransactionId) + Send>;

struct TransactionInner {
    /// Taken out when the transaction starts disposing.
    ambient: Option<Box<dyn AmbientTransaction>>,
    scopes: Vec<ScopeHandle>,
    disposed: bool,
}

impl TransactionInner {
    /// Mark disposed and hand out what is left to end, once.
    fn release(&mut self) -> Option<(Box<dyn AmbientTransaction>, Vec<ScopeHandle>)> {
        if self.disposed {
            return None;
        }
        self.disposed = true;
        let ambient = self.ambient.take()?;
        Some((ambient, std::mem::take(&mut self.scopes)))
    }
}

/// A session and an ambient transaction shared by one or more scopes.
pub struct Transaction<U: UnitOfWork> {
    id: TransactionId,
    mode: TransactionMode,
    options: TransactionOptions,
    started_at: DateTime<Utc>,
    session: Arc<U>,
    inner: Mutex<TransactionInner>,
    disposing: Mutex<Vec<DisposingListener>>,
}

impl<U: UnitOfWork> Transaction<U> {
    /// Wrap a session and an ambient transaction.
    pub fn new(
        session: U,
        ambient: Box<dyn AmbientTransaction>,
        mode: TransactionMode,
        options: TransactionOptions,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            mode,
            options,
            started_at: Utc::now(),
            session: Arc::new(session),
            inner: Mutex::new(TransactionInner {
                ambient: Some(ambient),
                scopes: Vec::new(),
                disposed: false,
            }),
            disposing: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// The mode of the scope that started this transaction.
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn options(&self) -> TransactionOptions {
        self.options
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The unit of work owned by this transaction.
    pub fn session(&self) -> &Arc<U> {
        &self.session
    }

    /// Number of scopes currently enlisted.
    pub fn scope_count(&self) -> usize {
        self.inner.lock().scopes.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// Register a callback run once when this transaction disposes.
    pub fn on_disposing(&self, listener: impl FnOnce(TransactionId) + Send + 'static) {
        self.disposing.lock().push(Box::new(listener));
    }

    /// Attach a scope: subscribe to its signals and add it to the
    /// enlistment list.
    pub fn enlist_scope(self: &Arc<Self>, scope: &ScopeHandle) -> TransactionResult<()> {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(TransactionError::disposed(format!("transaction {}", self.id)));
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        scope.subscribe(weak)?;
        inner.scopes.push(scope.clone());

        tracing::debug!(
            transaction = %self.id,
            scope = %scope.id(),
            enlisted = inner.scopes.len(),
            "scope enlisted"
        );
        Ok(())
    }

    /// Release the session and the ambient transaction, doom every scope
    /// still enlisted and notify disposing listeners. Idempotent.
    ///
    /// Returns the ambient transaction's error if ending it failed.
    pub fn dispose(&self) -> TransactionResult<()> {
        let released = self.inner.lock().release();
        match released {
            Some((ambient, orphaned)) => self.finish(ambient, orphaned),
            None => Ok(()),
        }
    }

    /// End the ambient transaction and the session. Runs without the lock.
    fn finish(
        &self,
        mut ambient: Box<dyn AmbientTransaction>,
        orphaned: Vec<ScopeHandle>,
    ) -> TransactionResult<()> {
        let committing = ambient.is_completed();
        let mut result = ambient.dispose();
        drop(ambient);
        if committing && result.is_ok() {
            result = self.session.commit().map_err(TransactionError::from);
        }
        self.session.close();

        for scope in &orphaned {
            scope.unsubscribe();
            scope.complete(ScopeCompletion::Aborted);
        }

        tracing::debug!(
            transaction = %self.id,
            orphaned = orphaned.len(),
            "transaction disposed"
        );

        let listeners = std::mem::take(&mut *self.disposing.lock());
        for listener in listeners {
            listener(self.id);
        }

        result
    }

    fn dispose_logged(&self) {
        if let Err(err) = self.dispose() {
            tracing::warn!(transaction = %self.id, error = %err, "transaction dispose failed");
        }
    }
}

impl<U: UnitOfWork> ScopeObserver for Transaction<U> {
    fn on_committing(&self, scope: &ScopeHandle) -> TransactionResult<()> {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(TransactionError::disposed(format!("transaction {}", self.id)));
        }

        let Some(position) = inner.scopes.iter().position(|s| s.id() == scope.id()) else {
            drop(inner);
            self.dispose_logged();
            return Err(TransactionError::invalid(format!(
                "scope {} is not enlisted in transaction {}",
                scope.id(),
                self.id
            )));
        };

        let member = inner.scopes.remove(position);
        member.unsubscribe();

        if !inner.scopes.is_empty() {
            member.complete(ScopeCompletion::Committed);
            tracing::debug!(
                transaction = %self.id,
                scope = %member.id(),
                remaining = inner.scopes.len(),
                "scope committed, waiting on remaining scopes"
            );
            return Ok(());
        }

        let released = inner.release();
        drop(inner);
        let Some((mut ambient, orphaned)) = released else {
            return Err(TransactionError::disposed(format!("transaction {}", self.id)));
        };

        let prepared = self
            .session
            .flush()
            .map_err(TransactionError::from)
            .and_then(|()| ambient.complete());

        // Finishing runs whether or not the flush succeeded; ending the
        // ambient transaction is what actually commits it.
        let finished = self.finish(ambient, orphaned);
        let result = prepared.and(finished);

        match &result {
            Ok(()) => {
                member.complete(ScopeCompletion::Committed);
                tracing::info!(transaction = %self.id, "transaction committed");
            }
            Err(err) => {
                member.complete(ScopeCompletion::Aborted);
                tracing::info!(transaction = %self.id, error = %err, "transaction commit failed");
            }
        }
        result
    }

    fn on_rolling_back(&self, scope: &ScopeHandle) -> TransactionResult<()> {
        if self.is_disposed() {
            return Err(TransactionError::disposed(format!("transaction {}", self.id)));
        }

        tracing::info!(
            transaction = %self.id,
            scope = %scope.id(),
            "scope rolled back, aborting transaction"
        );
        self.dispose()
    }
}

impl<U: UnitOfWork> Drop for Transaction<U> {
    fn drop(&mut self) {
        self.dispose_logged();
    }
}

impl<U: UnitOfWork> std::fmt::Debug for Transaction<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("isolation", &self.options.isolation)
            .field("scopes", &inner.scopes.len())
            .field("disposed", &inner.disposed)
            .finish()
    }
}
