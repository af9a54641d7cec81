//! Unit-of-work scopes.
//!
//! A [`Scope`] marks one logical unit-of-work boundary. It never touches
//! the session itself; it only signals the transaction it is enlisted in,
//! through the [`ScopeObserver`] that transaction registered on the scope's
//! [`ScopeHandle`]. Over its lifetime a scope raises at most one of the two
//! signals, committing or rolling back.
//!
//! Dropping a scope disposes it. Because `Drop` cannot report failures,
//! call [`Scope::dispose`] explicitly when the outcome matters.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::session::UnitOfWork;
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::isolation::TransactionMode;
use crate::transaction::manager::TransactionManager;
use crate::transaction::types::{ScopeCompletion, ScopeId};

/// Receiver of a scope's commit and rollback signals.
pub trait ScopeObserver: Send + Sync {
    /// The scope asks to commit its share of the transaction.
    fn on_committing(&self, scope: &ScopeHandle) -> TransactionResult<()>;

    /// The scope is leaving without committing.
    fn on_rolling_back(&self, scope: &ScopeHandle) -> TransactionResult<()>;
}

#[derive(Default)]
struct ScopeState {
    commit_attempted: bool,
    completion: Option<ScopeCompletion>,
    disposed: bool,
    observer: Option<Weak<dyn ScopeObserver>>,
}

/// Shared view of a scope's state.
///
/// Both the [`Scope`] and the transaction it is enlisted in hold a handle;
/// the transaction uses it to subscribe and to mark the scope completed.
#[derive(Clone)]
pub struct ScopeHandle {
    id: ScopeId,
    state: Arc<Mutex<ScopeState>>,
}

impl ScopeHandle {
    fn new() -> Self {
        Self {
            id: ScopeId::generate(),
            state: Arc::new(Mutex::new(ScopeState::default())),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn completion(&self) -> Option<ScopeCompletion> {
        self.state.lock().completion
    }

    pub fn is_completed(&self) -> bool {
        self.completion().is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    pub fn commit_attempted(&self) -> bool {
        self.state.lock().commit_attempted
    }

    /// Whether an observer is currently registered.
    pub fn is_subscribed(&self) -> bool {
        self.state.lock().observer.is_some()
    }

    /// Register the receiver of this scope's signals.
    ///
    /// A scope has a single observer; subscribing while another one is
    /// registered fails.
    pub fn subscribe(&self, observer: Weak<dyn ScopeObserver>) -> TransactionResult<()> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(TransactionError::disposed(format!("scope {}", self.id)));
        }
        if state.completion.is_some() {
            return Err(TransactionError::invalid(format!(
                "scope {} has already completed and cannot be enlisted",
                self.id
            )));
        }
        if state.observer.is_some() {
            return Err(TransactionError::invalid(format!(
                "scope {} is already enlisted in a transaction",
                self.id
            )));
        }
        state.observer = Some(observer);
        Ok(())
    }

    pub fn unsubscribe(&self) {
        self.state.lock().observer = None;
    }

    /// Mark the scope completed. The first completion wins.
    pub fn complete(&self, completion: ScopeCompletion) {
        let mut state = self.state.lock();
        if state.completion.is_none() {
            state.completion = Some(completion);
        }
    }

    fn observer(&self) -> Option<Arc<dyn ScopeObserver>> {
        self.state.lock().observer.as_ref().and_then(Weak::upgrade)
    }
}

impl std::fmt::Debug for ScopeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ScopeHandle")
            .field("id", &self.id)
            .field("commit_attempted", &state.commit_attempted)
            .field("completion", &state.completion)
            .field("disposed", &state.disposed)
            .finish()
    }
}

/// One logical unit-of-work boundary.
pub struct Scope {
    handle: ScopeHandle,
    auto_complete: bool,
}

impl Scope {
    /// Open a scope and enlist it with `manager` under `mode`.
    pub fn begin<U: UnitOfWork>(
        manager: &TransactionManager<U>,
        mode: TransactionMode,
    ) -> TransactionResult<Self> {
        let scope = Self::unenlisted(manager.settings().auto_complete_scope);
        if let Err(err) = manager.enlist_scope(&scope.handle, mode) {
            // Never enlisted: there is nothing to commit or roll back.
            scope.handle.state.lock().disposed = true;
            return Err(err);
        }
        Ok(scope)
    }

    /// A scope that is not enlisted anywhere yet. Enlist it through
    /// [`Transaction::enlist_scope`](super::Transaction::enlist_scope) or by
    /// subscribing an observer on its [`handle`](Self::handle).
    pub fn unenlisted(auto_complete: bool) -> Self {
        Self {
            handle: ScopeHandle::new(),
            auto_complete,
        }
    }

    pub fn id(&self) -> ScopeId {
        self.handle.id
    }

    pub fn handle(&self) -> &ScopeHandle {
        &self.handle
    }

    pub fn completion(&self) -> Option<ScopeCompletion> {
        self.handle.completion()
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.is_disposed()
    }

    /// Commit this scope's share of the transaction.
    ///
    /// Committing a scope that already committed does nothing. Committing a
    /// scope whose transaction was rolled back by a sibling fails.
    pub fn commit(&mut self) -> TransactionResult<()> {
        {
            let mut state = self.handle.state.lock();
            if state.disposed {
                return Err(TransactionError::disposed(format!("scope {}", self.handle.id)));
            }
            match state.completion {
                Some(ScopeCompletion::Committed) => return Ok(()),
                Some(ScopeCompletion::Aborted) => {
                    return Err(TransactionError::invalid(format!(
                        "transaction aborted, cannot commit doomed scope {}",
                        self.handle.id
                    )))
                }
                None => {}
            }
            state.commit_attempted = true;
        }

        tracing::debug!(scope = %self.handle.id, "scope committing");
        match self.handle.observer() {
            Some(observer) => observer.on_committing(&self.handle),
            None => Err(TransactionError::invalid(format!(
                "scope {} is not enlisted in any transaction",
                self.handle.id
            ))),
        }
    }

    /// Leave the scope.
    ///
    /// A scope that never attempted to commit rolls back, unless
    /// auto-complete is enabled, in which case it commits first and only
    /// rolls back if that commit fails. Disposing twice does nothing.
    pub fn dispose(&mut self) -> TransactionResult<()> {
        let commit_attempted = {
            let mut state = self.handle.state.lock();
            if state.disposed {
                return Ok(());
            }
            if state.completion.is_some() {
                state.disposed = true;
                return Ok(());
            }
            state.commit_attempted
        };

        let result = if !commit_attempted && self.auto_complete {
            self.commit().or_else(|err| {
                if let Err(rollback_err) = self.signal_rollback() {
                    tracing::warn!(
                        scope = %self.handle.id,
                        error = %rollback_err,
                        "rollback after failed auto-complete also failed"
                    );
                }
                Err(err)
            })
        } else {
            self.signal_rollback()
        };

        self.handle.state.lock().disposed = true;
        result
    }

    fn signal_rollback(&self) -> TransactionResult<()> {
        if self.handle.is_completed() {
            return Ok(());
        }
        match self.handle.observer() {
            Some(observer) => {
                tracing::debug!(scope = %self.handle.id, "scope rolling back");
                observer.on_rolling_back(&self.handle)
            }
            None => Ok(()),
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            tracing::warn!(scope = %self.handle.id, error = %err, "scope dispose failed");
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("handle", &self.handle)
            .field("auto_complete", &self.auto_complete)
            .finish()
    }
}
