//! The ambient transaction primitive.
//!
//! A [`Transaction`](super::Transaction) pairs one data-access session with
//! one ambient transaction obtained from an [`AmbientTransactionProvider`].
//! The ambient transaction follows a vote-then-dispose protocol: calling
//! [`complete`](AmbientTransaction::complete) records the intent to commit,
//! and [`dispose`](AmbientTransaction::dispose) ends it, committing when it
//! was completed and rolling back otherwise.
//!
//! [`LocalTransactionProvider`] is an in-process implementation. It counts
//! outcomes and tracks the transactions still pending; one created with
//! [`LocalTransactionProvider::recording`] also keeps a record of every
//! finished transaction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use ulid::Ulid;

use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::isolation::{TransactionOptions, TransactionScopeOption};

/// A pending ambient transaction.
pub trait AmbientTransaction: Send {
    /// Vote to commit. Fails if already completed or disposed.
    fn complete(&mut self) -> TransactionResult<()>;

    /// End the transaction: commit if completed, roll back otherwise.
    ///
    /// Calling this more than once has no further effect.
    fn dispose(&mut self) -> TransactionResult<()>;

    /// Whether [`complete`](Self::complete) succeeded.
    fn is_completed(&self) -> bool;
}

/// Creates ambient transactions for new [`Transaction`](super::Transaction)s.
pub trait AmbientTransactionProvider: Send + Sync {
    fn begin(
        &self,
        option: TransactionScopeOption,
        options: TransactionOptions,
    ) -> TransactionResult<Box<dyn AmbientTransaction>>;
}

/// How a local ambient transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbientOutcome {
    Committed,
    RolledBack,
    /// Ended under [`TransactionScopeOption::Suppress`]; nothing to commit.
    Suppressed,
}

/// Journal entry for one local ambient transaction.
#[derive(Debug, Clone)]
pub struct AmbientRecord {
    pub id: Ulid,
    pub option: TransactionScopeOption,
    pub options: TransactionOptions,
    pub started_at: DateTime<Utc>,
    /// `None` while the transaction is still pending.
    pub outcome: Option<AmbientOutcome>,
}

#[derive(Default)]
struct Journal {
    /// Finished transactions, in the order they ended. Only kept when
    /// recording.
    history: Option<Mutex<Vec<AmbientRecord>>>,
    pending: Mutex<HashMap<Ulid, AmbientRecord>>,
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
    suppressed: AtomicUsize,
    fail_commits: AtomicBool,
}

impl Journal {
    fn counter(&self, outcome: AmbientOutcome) -> &AtomicUsize {
        match outcome {
            AmbientOutcome::Committed => &self.committed,
            AmbientOutcome::RolledBack => &self.rolled_back,
            AmbientOutcome::Suppressed => &self.suppressed,
        }
    }

    fn finish(&self, id: Ulid, outcome: AmbientOutcome) {
        self.counter(outcome).fetch_add(1, Ordering::SeqCst);
        let record = self.pending.lock().remove(&id);
        if let (Some(history), Some(mut record)) = (&self.history, record) {
            record.outcome = Some(outcome);
            history.lock().push(record);
        }
    }
}

/// In-process ambient transaction provider.
///
/// Clones share the same journal. A provider from [`new`](Self::new) only
/// retains the transactions that are still pending, so it can serve a
/// long-running host.
#[derive(Clone, Default)]
pub struct LocalTransactionProvider {
    journal: Arc<Journal>,
}

impl LocalTransactionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that also keeps a record of every finished transaction.
    /// Its history grows without bound; meant for tests and diagnostics.
    pub fn recording() -> Self {
        Self {
            journal: Arc::new(Journal {
                history: Some(Mutex::new(Vec::new())),
                ..Journal::default()
            }),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.journal.history.is_some()
    }

    /// Make every subsequent commit fail at dispose time, as a coordinator
    /// aborting the transaction would.
    pub fn set_fail_commits(&self, fail: bool) {
        self.journal.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Finished transactions in the order they ended (recording providers
    /// only), followed by the pending ones, oldest first.
    pub fn records(&self) -> Vec<AmbientRecord> {
        let mut records = match &self.journal.history {
            Some(history) => history.lock().clone(),
            None => Vec::new(),
        };
        let mut pending: Vec<_> = self.journal.pending.lock().values().cloned().collect();
        pending.sort_by_key(|r| (r.started_at, r.id));
        records.extend(pending);
        records
    }

    /// Number of transactions that ended with `outcome`.
    pub fn count(&self, outcome: AmbientOutcome) -> usize {
        self.journal.counter(outcome).load(Ordering::SeqCst)
    }

    /// Number of transactions begun so far.
    pub fn begun(&self) -> usize {
        self.journal.begun.load(Ordering::SeqCst)
    }

    /// Number of transactions that have not been disposed yet.
    pub fn pending(&self) -> usize {
        self.journal.pending.lock().len()
    }
}

impl std::fmt::Debug for LocalTransactionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransactionProvider")
            .field("begun", &self.begun())
            .field("pending", &self.pending())
            .field("recording", &self.is_recording())
            .finish()
    }
}

impl AmbientTransactionProvider for LocalTransactionProvider {
    fn begin(
        &self,
        option: TransactionScopeOption,
        options: TransactionOptions,
    ) -> TransactionResult<Box<dyn AmbientTransaction>> {
        let id = Ulid::new();
        self.journal.begun.fetch_add(1, Ordering::SeqCst);
        self.journal.pending.lock().insert(
            id,
            AmbientRecord {
                id,
                option,
                options,
                started_at: Utc::now(),
                outcome: None,
            },
        );

        Ok(Box::new(LocalTransaction {
            id,
            option,
            options,
            started: Instant::now(),
            state: Phase::Active,
            journal: Arc::clone(&self.journal),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Completed,
    Ended,
}

/// Ambient transaction handed out by [`LocalTransactionProvider`].
pub struct LocalTransaction {
    id: Ulid,
    option: TransactionScopeOption,
    options: TransactionOptions,
    started: Instant,
    state: Phase,
    journal: Arc<Journal>,
}

impl LocalTransaction {
    fn timed_out(&self) -> bool {
        self.options
            .timeout
            .is_some_and(|timeout| self.started.elapsed() > timeout)
    }
}

impl AmbientTransaction for LocalTransaction {
    fn complete(&mut self) -> TransactionResult<()> {
        match self.state {
            Phase::Active => {}
            Phase::Completed => {
                return Err(TransactionError::invalid(
                    "ambient transaction has already been completed",
                ))
            }
            Phase::Ended => {
                return Err(TransactionError::disposed(format!(
                    "ambient transaction {}",
                    self.id
                )))
            }
        }

        if self.option.is_transactional() && self.timed_out() {
            return Err(TransactionError::Ambient(format!(
                "ambient transaction {} exceeded its timeout",
                self.id
            )));
        }

        self.state = Phase::Completed;
        Ok(())
    }

    fn dispose(&mut self) -> TransactionResult<()> {
        let completed = match self.state {
            Phase::Ended => return Ok(()),
            Phase::Completed => true,
            Phase::Active => false,
        };
        self.state = Phase::Ended;

        if !self.option.is_transactional() {
            self.journal.finish(self.id, AmbientOutcome::Suppressed);
            return Ok(());
        }

        if completed && !self.journal.fail_commits.load(Ordering::SeqCst) {
            self.journal.finish(self.id, AmbientOutcome::Committed);
            Ok(())
        } else {
            self.journal.finish(self.id, AmbientOutcome::RolledBack);
            if completed {
                Err(TransactionError::Ambient(format!(
                    "ambient transaction {} was aborted by the coordinator",
                    self.id
                )))
            } else {
                Ok(())
            }
        }
    }

    fn is_completed(&self) -> bool {
        self.state == Phase::Completed
    }
}

impl Drop for LocalTransaction {
    fn drop(&mut self) {
        if self.state != Phase::Ended {
            if let Err(err) = self.dispose() {
                tracing::warn!(ambient = %self.id, error = %err, "ambient transaction drop failed");
            }
        }
    }
}
