//! Typed repositories over the current unit of work.
//!
//! A [`Repository`] does not own a session. Every call resolves the session
//! of the manager's current transaction, so the repository works against
//! whatever scope the caller has open and fails when none is.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::session::memory::MemoryUnitOfWork;
use crate::transaction::{TransactionError, TransactionManager, TransactionResult};

/// A document type stored through a [`Repository`].
pub trait Entity: Serialize + DeserializeOwned {
    /// Collection the documents live in.
    const COLLECTION: &'static str;

    /// Key of this document within its collection.
    fn key(&self) -> String;
}

/// Repository of `T` documents.
pub struct Repository<T: Entity> {
    manager: TransactionManager<MemoryUnitOfWork>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Repository<T> {
    pub fn new(manager: TransactionManager<MemoryUnitOfWork>) -> Self {
        Self {
            manager,
            _entity: PhantomData,
        }
    }

    fn unit_of_work(&self) -> TransactionResult<Arc<MemoryUnitOfWork>> {
        self.manager.current_unit_of_work().ok_or_else(|| {
            TransactionError::invalid(format!(
                "no compatible unit of work was found for {}; open a scope before using the repository",
                T::COLLECTION
            ))
        })
    }

    /// Stage a new document. Fails if the key already exists.
    pub fn add(&self, entity: &T) -> TransactionResult<()> {
        let doc = serde_json::to_value(entity).map_err(crate::session::SessionError::from)?;
        self.unit_of_work()?
            .insert(T::COLLECTION, &entity.key(), doc)?;
        Ok(())
    }

    /// Stage a document, replacing any existing one.
    pub fn save(&self, entity: &T) -> TransactionResult<()> {
        let doc = serde_json::to_value(entity).map_err(crate::session::SessionError::from)?;
        self.unit_of_work()?
            .upsert(T::COLLECTION, &entity.key(), doc)?;
        Ok(())
    }

    /// Stage removal of the document with `key`.
    pub fn remove(&self, key: &str) -> TransactionResult<()> {
        self.unit_of_work()?.remove(T::COLLECTION, key)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> TransactionResult<Option<T>> {
        match self.unit_of_work()?.get(T::COLLECTION, key)? {
            Some(doc) => Ok(Some(Self::decode(doc)?)),
            None => Ok(None),
        }
    }

    /// Every document, ordered by key.
    pub fn all(&self) -> TransactionResult<Vec<T>> {
        self.unit_of_work()?
            .list(T::COLLECTION)?
            .into_iter()
            .map(|(_, doc)| Self::decode(doc))
            .collect()
    }

    /// Documents matching `predicate`, ordered by key.
    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> TransactionResult<Vec<T>> {
        Ok(self.all()?.into_iter().filter(|e| predicate(e)).collect())
    }

    fn decode(doc: serde_json::Value) -> TransactionResult<T> {
        serde_json::from_value(doc)
            .map_err(|e| TransactionError::Session(e.into()))
    }
}

impl<T: Entity> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self::new(self.manager.clone())
    }
}
