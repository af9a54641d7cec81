//! Configuration handed to transaction managers.
//!
//! There is no global state: every [`TransactionManager`](crate::transaction::TransactionManager)
//! is built from a [`UnitOfWorkConfig`], which pairs the process-wide
//! [`UnitOfWorkSettings`] with the session factory and the ambient
//! transaction provider.

mod error;
mod settings;

use std::sync::Arc;

pub use error::{ConfigError, ConfigResult};
pub use settings::{UnitOfWorkSettings, ENV_PREFIX};

use crate::session::{SessionFactory, SessionResult, UnitOfWork};
use crate::transaction::{AmbientTransactionProvider, LocalTransactionProvider};

/// Everything a manager needs to start transactions.
///
/// The session factory is optional here; a manager asked to start a
/// transaction without one fails with a configuration error.
pub struct UnitOfWorkConfig<U: UnitOfWork> {
    pub settings: UnitOfWorkSettings,
    session_factory: Option<Arc<dyn SessionFactory<U>>>,
    provider: Arc<dyn AmbientTransactionProvider>,
}

impl<U: UnitOfWork> UnitOfWorkConfig<U> {
    /// Settings with no session factory and a [`LocalTransactionProvider`].
    pub fn new(settings: UnitOfWorkSettings) -> Self {
        Self {
            settings,
            session_factory: None,
            provider: Arc::new(LocalTransactionProvider::new()),
        }
    }

    pub fn with_session_factory(mut self, factory: impl SessionFactory<U> + 'static) -> Self {
        self.session_factory = Some(Arc::new(factory));
        self
    }

    /// Like [`with_session_factory`](Self::with_session_factory), for closures.
    pub fn with_session_fn<F>(self, factory: F) -> Self
    where
        F: Fn() -> SessionResult<U> + Send + Sync + 'static,
    {
        self.with_session_factory(factory)
    }

    pub fn with_provider(mut self, provider: impl AmbientTransactionProvider + 'static) -> Self {
        self.provider = Arc::new(provider);
        self
    }

    pub fn session_factory(&self) -> Option<&Arc<dyn SessionFactory<U>>> {
        self.session_factory.as_ref()
    }

    pub fn provider(&self) -> &Arc<dyn AmbientTransactionProvider> {
        &self.provider
    }
}

impl<U: UnitOfWork> Default for UnitOfWorkConfig<U> {
    fn default() -> Self {
        Self::new(UnitOfWorkSettings::default())
    }
}

impl<U: UnitOfWork> Clone for UnitOfWorkConfig<U> {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            session_factory: self.session_factory.clone(),
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<U: UnitOfWork> std::fmt::Debug for UnitOfWorkConfig<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWorkConfig")
            .field("settings", &self.settings)
            .field("session_factory", &self.session_factory.is_some())
            .finish()
    }
}
