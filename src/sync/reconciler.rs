//! Pushes the pending-write queue to the server.
//!
//! One cycle is drain -> push -> clear, strictly in that order. The queue is
//! only cleared after the server confirmed the bulk write, and only the
//! entries that were part of the pushed snapshot are removed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use color_eyre::Result;
use sha2::{Digest, Sha256};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::api::error::ApiError;
use crate::api::http::Fetch;
use crate::api::BudgetApi;
use crate::db::{Database, PendingQueue};

/// What started a reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
  /// Application start while online
  Startup,
  /// offline -> online transition
  Reconnected,
  /// Explicit user request
  Manual,
}

/// Where the reconciler currently is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  Idle,
  Draining,
  Pushing,
  Clearing,
}

/// Result of a reconciliation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
  /// Nothing was queued
  Empty,
  /// Records confirmed by the server and removed from the queue
  Pushed { count: usize },
  /// The push failed; the queue was left as it was. `pushed` counts records
  /// confirmed by earlier cycles of the same request.
  Failed {
    retained: usize,
    pushed: usize,
    error: ApiError,
  },
  /// Another cycle was already running; it will run once more afterwards
  Coalesced,
}

impl SyncOutcome {
  /// Records confirmed by the server and removed from the queue.
  pub fn pushed(&self) -> usize {
    match self {
      SyncOutcome::Pushed { count } => *count,
      SyncOutcome::Failed { pushed, .. } => *pushed,
      SyncOutcome::Empty | SyncOutcome::Coalesced => 0,
    }
  }

  fn then(self, next: SyncOutcome) -> SyncOutcome {
    let before = self.pushed();
    match next {
      SyncOutcome::Pushed { count } => SyncOutcome::Pushed {
        count: before + count,
      },
      SyncOutcome::Failed {
        retained,
        pushed,
        error,
      } => SyncOutcome::Failed {
        retained,
        pushed: before + pushed,
        error,
      },
      SyncOutcome::Empty | SyncOutcome::Coalesced => self,
    }
  }
}

/// Stable fingerprint of a queue snapshot, sent as the bulk request's
/// idempotency key. The same snapshot always yields the same key.
pub fn batch_fingerprint(keys: &[String]) -> String {
  let mut sorted: Vec<&str> = keys.iter().map(String::as_str).collect();
  sorted.sort_unstable();

  let mut hasher = Sha256::new();
  for key in sorted {
    hasher.update(key.as_bytes());
    hasher.update(b"\n");
  }
  hex::encode(hasher.finalize())
}

/// Drains the pending queue into bulk pushes, one cycle at a time.
pub struct Reconciler<F: Fetch, Q: PendingQueue = Database> {
  api: BudgetApi<F>,
  queue: Arc<Q>,
  in_flight: Mutex<()>,
  rerun: AtomicBool,
  state: watch::Sender<SyncState>,
}

impl<F: Fetch, Q: PendingQueue> Reconciler<F, Q> {
  pub fn new(api: BudgetApi<F>, queue: Arc<Q>) -> Self {
    let (state, _rx) = watch::channel(SyncState::Idle);
    Self {
      api,
      queue,
      in_flight: Mutex::new(()),
      rerun: AtomicBool::new(false),
      state,
    }
  }

  pub fn state(&self) -> SyncState {
    *self.state.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<SyncState> {
    self.state.subscribe()
  }

  fn set_state(&self, state: SyncState) {
    debug!(?state, "Sync state");
    self.state.send_replace(state);
  }

  /// Run a reconciliation cycle unless one is already running.
  ///
  /// A trigger arriving while a cycle runs returns `Coalesced` right away
  /// and makes the running cycle go around once more after a success.
  /// Storage errors are returned; push failures are reported in the outcome.
  pub async fn reconcile(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
    let _guard = match self.in_flight.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        debug!(?trigger, "Sync already running, coalescing trigger");
        self.rerun.store(true, Ordering::SeqCst);
        return Ok(SyncOutcome::Coalesced);
      }
    };

    let mut outcome = self.run_cycle(trigger).await?;
    loop {
      if matches!(outcome, SyncOutcome::Failed { .. }) {
        self.rerun.store(false, Ordering::SeqCst);
        break;
      }
      if !self.rerun.swap(false, Ordering::SeqCst) {
        break;
      }
      debug!(?trigger, "Running coalesced sync");
      let next = self.run_cycle(trigger).await?;
      outcome = outcome.then(next);
    }

    Ok(outcome)
  }

  async fn run_cycle(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
    let result = self.cycle(trigger).await;
    if result.is_err() {
      self.rerun.store(false, Ordering::SeqCst);
    }
    self.set_state(SyncState::Idle);
    result
  }

  async fn cycle(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
    self.set_state(SyncState::Draining);
    let entries = self.queue.drain_all()?;
    if entries.is_empty() {
      debug!(?trigger, "Nothing to sync");
      return Ok(SyncOutcome::Empty);
    }

    let keys: Vec<String> = entries.iter().map(|e| e.key.clone()).collect();
    let records: Vec<_> = entries.into_iter().map(|e| e.record).collect();
    let idempotency_key = batch_fingerprint(&keys);

    self.set_state(SyncState::Pushing);
    info!(?trigger, count = records.len(), "Pushing pending transactions");
    if let Err(error) = self.api.bulk(&records, &idempotency_key).await {
      warn!(?trigger, error = %error, retained = keys.len(), "Bulk push failed, keeping queue");
      return Ok(SyncOutcome::Failed {
        retained: keys.len(),
        pushed: 0,
        error,
      });
    }

    self.set_state(SyncState::Clearing);
    let removed = self.queue.remove(&keys)?;
    info!(?trigger, pushed = keys.len(), removed, "Pending transactions synced");
    Ok(SyncOutcome::Pushed { count: keys.len() })
  }
}
