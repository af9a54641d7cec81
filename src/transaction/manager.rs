//! Transaction manager - decides which transaction a new scope joins.
//!
//! The TransactionManager keeps a stack of live transactions, most recent on
//! top. It handles:
//! - Joining compatible scopes to the current transaction
//! - Starting fresh transactions for `New`/`Suppressed` scopes, or when the
//!   stack is empty
//! - Popping transactions once they dispose
//!
//! One manager serves one logical execution context; see
//! [`TransactionManagerLocator`](super::TransactionManagerLocator).

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::config::{UnitOfWorkConfig, UnitOfWorkSettings};
use crate::session::UnitOfWork;
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::isolation::TransactionMode;
use crate::transaction::scope::{Scope, ScopeHandle};
use crate::transaction::types::{ManagerId, TransactionId};
use crate::transaction::unit::Transaction;

/// Transaction manager for one execution context.
///
/// Cheap to clone; clones share the same stack.
pub struct TransactionManager<U: UnitOfWork> {
    inner: Arc<TransactionManagerInner<U>>,
}

struct TransactionManagerInner<U: UnitOfWork> {
    id: ManagerId,
    config: UnitOfWorkConfig<U>,
    /// Live transactions, current one last.
    transactions: Mutex<Vec<Arc<Transaction<U>>>>,
}

impl<U: UnitOfWork> TransactionManagerInner<U> {
    fn remove(&self, tx_id: TransactionId) {
        let removed = {
            let mut transactions = self.transactions.lock();
            let position = transactions.iter().position(|tx| tx.id() == tx_id);
            position.map(|i| transactions.remove(i))
        };
        if removed.is_some() {
            tracing::debug!(manager = %self.id, transaction = %tx_id, "transaction popped");
        }
    }
}

impl<U: UnitOfWork> TransactionManager<U> {
    /// Create a new transaction manager from `config`.
    pub fn new(config: UnitOfWorkConfig<U>) -> Self {
        Self {
            inner: Arc::new(TransactionManagerInner {
                id: ManagerId::generate(),
                config,
                transactions: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> ManagerId {
        self.inner.id
    }

    pub fn settings(&self) -> &UnitOfWorkSettings {
        &self.inner.config.settings
    }

    /// Open a scope enlisted with this manager.
    pub fn begin_scope(&self, mode: TransactionMode) -> TransactionResult<Scope> {
        Scope::begin(self, mode)
    }

    /// Enlist `scope` under `mode`.
    ///
    /// Joins the current transaction unless there is none or the mode asks
    /// for a fresh one, in which case a new transaction is started and
    /// pushed. Returns the transaction the scope ended up in.
    pub fn enlist_scope(
        &self,
        scope: &ScopeHandle,
        mode: TransactionMode,
    ) -> TransactionResult<Arc<Transaction<U>>> {
        let current = if mode.requires_new_transaction() {
            None
        } else {
            self.current_transaction()
        };

        let tx = match current {
            Some(tx) => tx,
            None => self.begin_transaction(mode)?,
        };

        if let Err(err) = tx.enlist_scope(scope) {
            // A transaction we just pushed must not linger without scopes.
            if tx.scope_count() == 0 {
                if let Err(dispose_err) = tx.dispose() {
                    tracing::warn!(
                        manager = %self.inner.id,
                        transaction = %tx.id(),
                        error = %dispose_err,
                        "dispose of unused transaction failed"
                    );
                }
            }
            return Err(err);
        }
        Ok(tx)
    }

    fn begin_transaction(&self, mode: TransactionMode) -> TransactionResult<Arc<Transaction<U>>> {
        let config = &self.inner.config;
        let factory = config.session_factory().ok_or_else(|| {
            TransactionError::Configuration(
                "no session factory configured; cannot start a unit of work".to_string(),
            )
        })?;

        let options = config.settings.transaction_options();
        let mut ambient = config.provider().begin(mode.scope_option(), options)?;
        let session = match factory.create() {
            Ok(session) => session,
            Err(err) => {
                if let Err(dispose_err) = ambient.dispose() {
                    tracing::warn!(
                        manager = %self.inner.id,
                        error = %dispose_err,
                        "ambient rollback after session factory failure failed"
                    );
                }
                return Err(err.into());
            }
        };

        let tx = Arc::new(Transaction::new(session, ambient, mode, options));
        let manager: Weak<TransactionManagerInner<U>> = Arc::downgrade(&self.inner);
        tx.on_disposing(move |tx_id| {
            if let Some(manager) = manager.upgrade() {
                manager.remove(tx_id);
            }
        });

        let depth = {
            let mut transactions = self.inner.transactions.lock();
            transactions.push(Arc::clone(&tx));
            transactions.len()
        };
        tracing::debug!(
            manager = %self.inner.id,
            transaction = %tx.id(),
            %mode,
            isolation = %options.isolation,
            depth,
            "transaction pushed"
        );

        Ok(tx)
    }

    /// The transaction on top of the stack.
    pub fn current_transaction(&self) -> Option<Arc<Transaction<U>>> {
        self.inner.transactions.lock().last().cloned()
    }

    /// The session of the current transaction, if any.
    pub fn current_unit_of_work(&self) -> Option<Arc<U>> {
        self.current_transaction().map(|tx| Arc::clone(tx.session()))
    }

    /// Number of live transactions.
    pub fn depth(&self) -> usize {
        self.inner.transactions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Roll back and pop every live transaction, most recent first.
    ///
    /// Called when the hosting context ends. Returns the first error
    /// encountered; every transaction is disposed regardless.
    pub fn dispose(&self) -> TransactionResult<()> {
        let transactions: Vec<_> = self.inner.transactions.lock().iter().rev().cloned().collect();
        if !transactions.is_empty() {
            tracing::info!(
                manager = %self.inner.id,
                count = transactions.len(),
                "disposing live transactions"
            );
        }

        let mut first_err = None;
        for tx in transactions {
            if let Err(err) = tx.dispose() {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl<U: UnitOfWork> Clone for TransactionManager<U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<U: UnitOfWork> std::fmt::Debug for TransactionManager<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("id", &self.inner.id)
            .field("depth", &self.depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::session::{MemoryStore, MemoryUnitOfWork, SessionError, UnitOfWork};
    use crate::transaction::ambient::{AmbientOutcome, LocalTransactionProvider};
    use crate::transaction::isolation::{IsolationLevel, TransactionScopeOption};
    use crate::transaction::types::ScopeCompletion;

    type Fixture = (
        MemoryStore,
        LocalTransactionProvider,
        TransactionManager<MemoryUnitOfWork>,
    );

    fn setup(auto_complete: bool) -> Fixture {
        let store = MemoryStore::new();
        let provider = LocalTransactionProvider::recording();
        let factory_store = store.clone();
        let config = UnitOfWorkConfig::new(
            UnitOfWorkSettings::default().with_auto_complete(auto_complete),
        )
        .with_session_fn(move || Ok(factory_store.session()))
        .with_provider(provider.clone());
        (store, provider, TransactionManager::new(config))
    }

    #[test]
    fn test_nested_default_scopes_share_session() {
        let (store, provider, manager) = setup(false);
        assert!(manager.current_unit_of_work().is_none());

        let mut a = manager.begin_scope(TransactionMode::Default).unwrap();
        let session_a = manager.current_unit_of_work().unwrap();

        let mut b = manager.begin_scope(TransactionMode::Default).unwrap();
        let session_b = manager.current_unit_of_work().unwrap();
        assert!(Arc::ptr_eq(&session_a, &session_b));
        assert_eq!(manager.depth(), 1);

        session_b.insert("users", "1", json!({"name": "Alice"})).unwrap();

        a.commit().unwrap();
        assert_eq!(manager.depth(), 1);
        assert_eq!(session_a.flush_count(), 0);

        b.commit().unwrap();
        assert_eq!(session_a.flush_count(), 1);
        assert!(manager.is_empty());
        assert!(store.contains("users", "1"));
        assert_eq!(provider.count(AmbientOutcome::Committed), 1);
    }

    #[test]
    fn test_new_mode_starts_distinct_transaction() {
        let (_store, provider, manager) = setup(false);

        let _outer = manager.begin_scope(TransactionMode::Default).unwrap();
        let outer_session = manager.current_unit_of_work().unwrap();

        let mut inner = manager.begin_scope(TransactionMode::New).unwrap();
        let inner_session = manager.current_unit_of_work().unwrap();
        assert!(!Arc::ptr_eq(&outer_session, &inner_session));
        assert_eq!(manager.depth(), 2);

        inner.commit().unwrap();
        assert_eq!(manager.depth(), 1);
        let current = manager.current_unit_of_work().unwrap();
        assert!(Arc::ptr_eq(&current, &outer_session));

        // Finished transactions first, then the pending outer one.
        let options: Vec<_> = provider.records().iter().map(|r| r.option).collect();
        assert_eq!(
            options,
            vec![
                TransactionScopeOption::RequiresNew,
                TransactionScopeOption::Required
            ]
        );
    }

    #[test]
    fn test_suppressed_mode_starts_fresh_transaction() {
        let (_store, provider, manager) = setup(false);
        let _outer = manager.begin_scope(TransactionMode::Default).unwrap();
        let mut suppressed = manager.begin_scope(TransactionMode::Suppressed).unwrap();
        assert_eq!(manager.depth(), 2);

        suppressed.commit().unwrap();
        assert_eq!(provider.count(AmbientOutcome::Suppressed), 1);
    }

    #[test]
    fn test_default_scope_joins_top_of_stack() {
        let (_store, _provider, manager) = setup(false);
        let _outer = manager.begin_scope(TransactionMode::Default).unwrap();
        let _fresh = manager.begin_scope(TransactionMode::New).unwrap();
        let fresh_tx = manager.current_transaction().unwrap();

        let _joined = manager.begin_scope(TransactionMode::Default).unwrap();
        assert_eq!(manager.depth(), 2);
        assert_eq!(fresh_tx.scope_count(), 2);
    }

    #[test]
    fn test_rollback_pops_and_discards() {
        let (store, provider, manager) = setup(false);
        let mut outer = manager.begin_scope(TransactionMode::Default).unwrap();
        {
            let _inner = manager.begin_scope(TransactionMode::Default).unwrap();
            manager
                .current_unit_of_work()
                .unwrap()
                .insert("users", "1", json!({}))
                .unwrap();
        }

        assert!(manager.is_empty());
        assert_eq!(outer.completion(), Some(ScopeCompletion::Aborted));
        assert!(matches!(
            outer.commit(),
            Err(TransactionError::InvalidOperation(_))
        ));
        assert!(!store.contains("users", "1"));
        assert_eq!(provider.count(AmbientOutcome::RolledBack), 1);
    }

    #[test]
    fn test_auto_complete_commits_on_drop() {
        let (store, _provider, manager) = setup(true);
        {
            let _scope = manager.begin_scope(TransactionMode::Default).unwrap();
            manager
                .current_unit_of_work()
                .unwrap()
                .insert("users", "1", json!({}))
                .unwrap();
        }
        assert!(manager.is_empty());
        assert!(store.contains("users", "1"));
    }

    #[test]
    fn test_missing_session_factory_is_configuration_error() {
        let manager: TransactionManager<MemoryUnitOfWork> =
            TransactionManager::new(UnitOfWorkConfig::default());

        let err = manager.begin_scope(TransactionMode::Default).unwrap_err();
        assert!(err.is_configuration());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_session_factory_failure_rolls_back_ambient() {
        let provider = LocalTransactionProvider::new();
        let config = UnitOfWorkConfig::new(UnitOfWorkSettings::default())
            .with_session_fn(|| {
                Err(SessionError::Flush("database unreachable".to_string()))
            })
            .with_provider(provider.clone());
        let manager: TransactionManager<MemoryUnitOfWork> = TransactionManager::new(config);

        let err = manager.begin_scope(TransactionMode::Default).unwrap_err();
        assert!(matches!(err, TransactionError::Session(_)));
        assert!(manager.is_empty());
        assert_eq!(provider.count(AmbientOutcome::RolledBack), 1);
    }

    #[test]
    fn test_configured_isolation_reaches_provider() {
        let provider = LocalTransactionProvider::new();
        let store = MemoryStore::new();
        let config = UnitOfWorkConfig::new(
            UnitOfWorkSettings::default().with_isolation(IsolationLevel::Serializable),
        )
        .with_session_fn(move || Ok(store.session()))
        .with_provider(provider.clone());
        let manager = TransactionManager::new(config);

        let _scope = manager.begin_scope(TransactionMode::Default).unwrap();
        assert_eq!(
            provider.records()[0].options.isolation,
            IsolationLevel::Serializable
        );
        assert_eq!(
            manager.current_transaction().unwrap().options().isolation,
            IsolationLevel::Serializable
        );
    }

    #[test]
    fn test_flush_failure_empties_stack() {
        let (store, provider, manager) = setup(false);
        let mut scope = manager.begin_scope(TransactionMode::Default).unwrap();
        let session = manager.current_unit_of_work().unwrap();
        session.insert("users", "1", json!({})).unwrap();
        session.fail_next_flush();

        let err = scope.commit().unwrap_err();
        assert!(matches!(err, TransactionError::Session(_)));
        assert!(manager.is_empty());
        assert!(session.is_closed());
        assert!(!store.contains("users", "1"));
        assert_eq!(provider.count(AmbientOutcome::Committed), 0);
    }

    #[test]
    fn test_dispose_rolls_back_everything() {
        let (_store, provider, manager) = setup(false);
        let a = manager.begin_scope(TransactionMode::Default).unwrap();
        let b = manager.begin_scope(TransactionMode::New).unwrap();

        manager.dispose().unwrap();
        assert!(manager.is_empty());
        assert_eq!(provider.count(AmbientOutcome::RolledBack), 2);
        assert_eq!(a.completion(), Some(ScopeCompletion::Aborted));
        assert_eq!(b.completion(), Some(ScopeCompletion::Aborted));
    }

    #[test]
    fn test_scope_cannot_enlist_twice() {
        let (_store, _provider, manager) = setup(false);
        let scope = manager.begin_scope(TransactionMode::Default).unwrap();

        let err = manager
            .enlist_scope(scope.handle(), TransactionMode::New)
            .unwrap_err();
        assert!(err.is_protocol_violation());
        assert_eq!(manager.depth(), 1);
    }

    #[test]
    fn test_default_provider_state_stays_bounded() {
        let store = MemoryStore::new();
        let provider = LocalTransactionProvider::new();
        let sessions = store.clone();
        let manager = TransactionManager::new(
            UnitOfWorkConfig::new(UnitOfWorkSettings::default())
                .with_session_fn(move || Ok(sessions.session()))
                .with_provider(provider.clone()),
        );

        for i in 0..1_000 {
            let mut scope = manager.begin_scope(TransactionMode::Default).unwrap();
            manager
                .current_unit_of_work()
                .unwrap()
                .upsert("counters", "hits", json!(i))
                .unwrap();
            scope.commit().unwrap();
        }

        assert_eq!(provider.count(AmbientOutcome::Committed), 1_000);
        assert_eq!(provider.pending(), 0);
        assert!(provider.records().is_empty());
        assert_eq!(store.get("counters", "hits"), Some(json!(999)));
    }

    #[test]
    fn test_session_closed_after_commit() {
        let (_store, _provider, manager) = setup(false);
        let mut scope = manager.begin_scope(TransactionMode::Default).unwrap();
        let session = manager.current_unit_of_work().unwrap();
        scope.commit().unwrap();

        assert!(session.is_closed());
        assert!(session.flush().is_err());
    }
}
