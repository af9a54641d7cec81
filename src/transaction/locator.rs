//! Resolves the transaction manager of an execution context.
//!
//! Each [`ExecutionContext`] gets its own [`TransactionManager`], created on
//! first use and stored in the context's state. Contexts never share a
//! manager, which is what keeps scopes opened on different threads or
//! requests out of each other's transactions.

use crate::config::UnitOfWorkConfig;
use crate::session::UnitOfWork;
use crate::state::ExecutionContext;
use crate::transaction::error::TransactionResult;
use crate::transaction::isolation::TransactionMode;
use crate::transaction::manager::TransactionManager;
use crate::transaction::scope::Scope;

/// Hands out one [`TransactionManager`] per execution context.
pub struct TransactionManagerLocator<U: UnitOfWork> {
    config: UnitOfWorkConfig<U>,
}

impl<U: UnitOfWork> TransactionManagerLocator<U> {
    pub fn new(config: UnitOfWorkConfig<U>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &UnitOfWorkConfig<U> {
        &self.config
    }

    /// The manager of `ctx`, created on first use.
    pub fn current(&self, ctx: &ExecutionContext) -> TransactionManager<U> {
        ctx.with_state(|state| {
            state
                .get_or_insert_with(|| {
                    let manager = TransactionManager::new(self.config.clone());
                    tracing::debug!(
                        context = %ctx.id(),
                        kind = %ctx.kind(),
                        manager = %manager.id(),
                        "transaction manager created"
                    );
                    manager
                })
                .clone()
        })
    }

    /// Whether `ctx` already has a manager.
    pub fn contains(&self, ctx: &ExecutionContext) -> bool {
        ctx.with_state(|state| state.get::<TransactionManager<U>>().is_some())
    }

    /// Open a scope with the manager of `ctx`.
    pub fn begin_scope(
        &self,
        ctx: &ExecutionContext,
        mode: TransactionMode,
    ) -> TransactionResult<Scope> {
        self.current(ctx).begin_scope(mode)
    }

    /// End `ctx`: remove its manager and roll back whatever it still holds.
    pub fn end(&self, ctx: &ExecutionContext) -> TransactionResult<()> {
        let manager = ctx.with_state(|state| state.remove::<TransactionManager<U>>());
        match manager {
            Some(manager) => {
                tracing::debug!(context = %ctx.id(), manager = %manager.id(), "context ended");
                manager.dispose()
            }
            None => Ok(()),
        }
    }
}

impl<U: UnitOfWork> std::fmt::Debug for TransactionManagerLocator<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManagerLocator")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::config::UnitOfWorkSettings;
    use crate::session::{MemoryStore, MemoryUnitOfWork};
    use crate::transaction::ambient::{AmbientOutcome, LocalTransactionProvider};

    fn locator(store: &MemoryStore, provider: &LocalTransactionProvider) -> TransactionManagerLocator<MemoryUnitOfWork> {
        let store = store.clone();
        TransactionManagerLocator::new(
            UnitOfWorkConfig::new(UnitOfWorkSettings::default())
                .with_session_fn(move || Ok(store.session()))
                .with_provider(provider.clone()),
        )
    }

    #[test]
    fn test_one_manager_per_context() {
        let store = MemoryStore::new();
        let provider = LocalTransactionProvider::new();
        let locator = locator(&store, &provider);
        let ctx = ExecutionContext::request();

        assert!(!locator.contains(&ctx));
        let first = locator.current(&ctx);
        let second = locator.current(&ctx.clone());
        assert_eq!(first.id(), second.id());
        assert!(locator.contains(&ctx));

        let other = locator.current(&ExecutionContext::request());
        assert_ne!(first.id(), other.id());
    }

    #[test]
    fn test_contexts_do_not_share_transactions() {
        let store = MemoryStore::new();
        let provider = LocalTransactionProvider::new();
        let locator = locator(&store, &provider);
        let a = ExecutionContext::thread();
        let b = ExecutionContext::thread();

        let _scope_a = locator.begin_scope(&a, TransactionMode::Default).unwrap();
        let _scope_b = locator.begin_scope(&b, TransactionMode::Default).unwrap();

        let session_a = locator.current(&a).current_unit_of_work().unwrap();
        let session_b = locator.current(&b).current_unit_of_work().unwrap();
        assert!(!Arc::ptr_eq(&session_a, &session_b));
    }

    #[test]
    fn test_end_rolls_back_open_work() {
        let store = MemoryStore::new();
        let provider = LocalTransactionProvider::new();
        let locator = locator(&store, &provider);
        let ctx = ExecutionContext::session();

        let scope = locator.begin_scope(&ctx, TransactionMode::Default).unwrap();
        locator
            .current(&ctx)
            .current_unit_of_work()
            .unwrap()
            .insert("carts", "c1", json!({"items": 2}))
            .unwrap();

        locator.end(&ctx).unwrap();
        assert!(!locator.contains(&ctx));
        assert!(scope.completion().is_some());
        assert!(!store.contains("carts", "c1"));
        assert_eq!(provider.count(AmbientOutcome::RolledBack), 1);

        // Ending twice is harmless.
        locator.end(&ctx).unwrap();
    }
}
