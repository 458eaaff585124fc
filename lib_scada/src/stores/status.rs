//! Per-operation `loading` / `error` bookkeeping.
//!
//! Each async store operation tracks its own status, so a snapshot load and an
//! acknowledge can be in flight together without one masking the other.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::Result;

/// Observable status of one store operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpStatus {
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Debug)]
struct Ledger<K> {
    ops: HashMap<K, OpStatus>,
    last_error: Option<String>,
}

/// Tracks [`OpStatus`] per operation kind `K`.
#[derive(Debug)]
pub(crate) struct OpTracker<K> {
    ledger: Mutex<Ledger<K>>,
}

impl<K: Copy + Eq + Hash + Debug> OpTracker<K> {
    pub(crate) fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                ops: HashMap::new(),
                last_error: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger<K>> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `fut` as operation `op`, recording loading and outcome around it.
    /// The lock is never held across the await.
    pub(crate) async fn track<T, F>(&self, op: K, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        {
            let mut ledger = self.lock();
            let status = ledger.ops.entry(op).or_default();
            status.loading = true;
            status.error = None;
        }

        let result = fut.await;

        let mut ledger = self.lock();
        let message = result.as_ref().err().map(|e| e.to_string());
        if let Some(msg) = &message {
            log::error!("{:?} failed: {}", op, msg);
            ledger.last_error = Some(msg.clone());
        }
        let status = ledger.ops.entry(op).or_default();
        status.loading = false;
        status.error = message;
        result
    }

    pub(crate) fn status(&self, op: K) -> OpStatus {
        self.lock().ops.get(&op).cloned().unwrap_or_default()
    }

    /// True while any operation is in flight.
    pub(crate) fn any_loading(&self) -> bool {
        self.lock().ops.values().any(|s| s.loading)
    }

    /// Most recent error message of any operation.
    pub(crate) fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub(crate) fn clear_errors(&self) {
        let mut ledger = self.lock();
        ledger.last_error = None;
        for status in ledger.ops.values_mut() {
            status.error = None;
        }
    }
}
