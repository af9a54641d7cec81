//! Per-context state.
//!
//! An [`ExecutionContext`] stands for one logical execution context: a
//! thread, a request or a user session. The host creates it and passes it
//! explicitly to whatever needs context-scoped state; nothing here is looked
//! up through thread-locals. Each context owns a [`LocalState`] bag holding
//! values keyed by their type, optionally namespaced by a string key.

mod local;

pub use local::LocalState;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use ulid::Ulid;

/// What kind of execution context a handle stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    Thread,
    Request,
    Session,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKind::Thread => write!(f, "thread"),
            ContextKind::Request => write!(f, "request"),
            ContextKind::Session => write!(f, "session"),
        }
    }
}

/// Handle to one execution context. Clones share the same state.
#[derive(Clone)]
pub struct ExecutionContext {
    id: Ulid,
    kind: ContextKind,
    state: Arc<Mutex<LocalState>>,
}

impl ExecutionContext {
    pub fn new(kind: ContextKind) -> Self {
        Self {
            id: Ulid::new(),
            kind,
            state: Arc::new(Mutex::new(LocalState::new())),
        }
    }

    pub fn thread() -> Self {
        Self::new(ContextKind::Thread)
    }

    pub fn request() -> Self {
        Self::new(ContextKind::Request)
    }

    pub fn session() -> Self {
        Self::new(ContextKind::Session)
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Run `f` with exclusive access to the context's state.
    ///
    /// The state stays locked for the duration of `f`; do not re-enter the
    /// same context from inside it.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut LocalState) -> R) -> R {
        f(&mut self.state.lock())
    }

    pub fn same_context(&self, other: &ExecutionContext) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("entries", &self.state.lock().len())
            .finish()
    }
}
