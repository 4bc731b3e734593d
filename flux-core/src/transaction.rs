/// Transaction buffer - deferred execution of mutating operations
///
/// Idle --begin--> Active --commit/rollback--> Idle
///
/// While Active, mutating calls are captured as tagged operations instead
/// of touching storage. Commit hands the queue back for FIFO replay; there is
/// no atomicity across the batch. Nothing here is persisted.

use crate::types::{Document, Record};
use crate::{Error, Result};
use tracing::debug;
use uuid::Uuid;

/// A captured mutating call
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOp {
    /// Insert with the identifier already fixed at enqueue time
    Insert { collection: String, record: Record },
    Update { collection: String, id: Uuid, patch: Document },
    Delete { collection: String, id: Uuid },
}

impl PendingOp {
    pub fn collection(&self) -> &str {
        match self {
            Self::Insert { collection, .. } => collection,
            Self::Update { collection, .. } => collection,
            Self::Delete { collection, .. } => collection,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Active,
}

pub struct TransactionBuffer {
    state: TransactionState,
    pending: Vec<PendingOp>,
}

impl TransactionBuffer {
    pub fn new() -> Self {
        Self {
            state: TransactionState::Idle,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.is_active() {
            return Err(Error::TransactionState("transaction already active".into()));
        }
        self.state = TransactionState::Active;
        self.pending.clear();
        debug!("Transaction started");
        Ok(())
    }

    /// Gate a mutating call: queue it while Active, or hand it back to be
    /// executed immediately while Idle.
    pub fn defer(&mut self, op: PendingOp) -> Option<PendingOp> {
        if self.is_active() {
            self.pending.push(op);
            None
        } else {
            Some(op)
        }
    }

    /// End the transaction and return its queue for FIFO replay
    pub fn take_for_commit(&mut self) -> Result<Vec<PendingOp>> {
        if !self.is_active() {
            return Err(Error::TransactionState("no active transaction".into()));
        }
        self.state = TransactionState::Idle;
        Ok(std::mem::take(&mut self.pending))
    }

    /// End the transaction, discarding its queue unexecuted
    pub fn rollback(&mut self) -> Result<usize> {
        if !self.is_active() {
            return Err(Error::TransactionState("no active transaction to roll back".into()));
        }
        self.state = TransactionState::Idle;
        let discarded = self.pending.len();
        self.pending.clear();
        debug!("Transaction rolled back, {} operations discarded", discarded);
        Ok(discarded)
    }
}

impl Default for TransactionBuffer {
    fn default() -> Self {
        Self::new()
    }
}
