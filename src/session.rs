//! Session state and the transaction write path.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use color_eyre::Result;
use tracing::{debug, info, warn};

use crate::api::error::ApiError;
use crate::api::http::Fetch;
use crate::api::types::{Transaction, TransactionDraft};
use crate::api::BudgetApi;
use crate::cache::CacheSource;
use crate::db::{Database, PendingQueue};
use crate::report;
use crate::sync::Connectivity;

/// Where the in-memory list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingSource {
  NotLoaded,
  Network,
  Cache {
    source: CacheSource,
    cached_at: Option<DateTime<Utc>>,
  },
  /// Neither the server nor the cache answered
  Unavailable,
}

impl fmt::Display for ListingSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ListingSource::NotLoaded => write!(f, "not loaded"),
      ListingSource::Network => write!(f, "network"),
      ListingSource::Cache {
        source,
        cached_at: Some(at),
      } => write!(f, "{} ({})", source, at.format("%Y-%m-%d %H:%M:%S")),
      ListingSource::Cache { source, .. } => write!(f, "{}", source),
      ListingSource::Unavailable => write!(f, "unavailable"),
    }
  }
}

/// Everything the session knows: the list as displayed, newest first.
pub struct SessionContext {
  pub transactions: Vec<Transaction>,
  pub connectivity: Connectivity,
  pub source: ListingSource,
}

impl SessionContext {
  pub fn new(connectivity: Connectivity) -> Self {
    Self {
      transactions: Vec::new(),
      connectivity,
      source: ListingSource::NotLoaded,
    }
  }

  pub fn total(&self) -> i64 {
    report::total(&self.transactions)
  }
}

/// Result of adding a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
  /// Stored on the server; carries the record with server-assigned fields
  Saved(Transaction),
  /// Could not reach the server; stored in the pending queue
  Queued { key: String },
  /// The server refused the record; it was dropped from the list
  Rejected { errors: Vec<String> },
  /// Blank name or missing amount; nothing happened
  Invalid,
}

/// Owns the session list and applies writes to it.
pub struct TransactionController<F: Fetch, Q: PendingQueue = Database> {
  api: BudgetApi<F>,
  queue: Arc<Q>,
  context: SessionContext,
}

impl<F: Fetch, Q: PendingQueue> TransactionController<F, Q> {
  pub fn new(api: BudgetApi<F>, queue: Arc<Q>, connectivity: Connectivity) -> Self {
    Self {
      api,
      queue,
      context: SessionContext::new(connectivity),
    }
  }

  pub fn context(&self) -> &SessionContext {
    &self.context
  }

  pub fn transactions(&self) -> &[Transaction] {
    &self.context.transactions
  }

  pub fn total(&self) -> i64 {
    self.context.total()
  }

  /// Replace the list with the server listing, falling back to the cache.
  pub async fn load_listing(&mut self) -> ListingSource {
    let source = match self.api.list().await {
      Ok(Some(result)) => {
        self.context.transactions = result.data;
        match result.source {
          CacheSource::Network => ListingSource::Network,
          source => ListingSource::Cache {
            source,
            cached_at: result.cached_at,
          },
        }
      }
      Ok(None) => {
        warn!("Transaction listing unavailable");
        self.context.transactions.clear();
        ListingSource::Unavailable
      }
      Err(e) => {
        warn!(error = %e, "Failed to load transactions");
        self.context.transactions.clear();
        ListingSource::Unavailable
      }
    };

    debug!(count = self.context.transactions.len(), %source, "Listing loaded");
    self.context.source = source;
    source
  }

  /// Replace the list with the live listing, keeping the current list when
  /// only a cached copy is available. Returns whether the list was replaced.
  pub async fn refresh_live(&mut self) -> Result<bool> {
    match self.api.list().await {
      Ok(Some(result)) if result.source == CacheSource::Network => {
        self.context.transactions = result.data;
        self.context.source = ListingSource::Network;
        self.hydrate_pending()?;
        Ok(true)
      }
      Ok(_) => {
        debug!("Live listing unavailable, keeping current list");
        Ok(false)
      }
      Err(e) => {
        warn!(error = %e, "Failed to refresh transactions, keeping current list");
        Ok(false)
      }
    }
  }

  /// Prepend queued records to the list.
  ///
  /// Each gets its queue key as id and version 0. Records already shown are
  /// skipped, so hydrating twice is harmless.
  pub fn hydrate_pending(&mut self) -> Result<usize> {
    let entries = self.queue.drain_all()?;
    let mut hydrated: Vec<Transaction> = entries
      .into_iter()
      .filter(|e| {
        !self
          .context
          .transactions
          .iter()
          .any(|t| t.id.as_deref() == Some(e.key.as_str()))
      })
      .map(|e| {
        let mut record = e.record;
        record.id = Some(e.key);
        record.version = Some(0);
        record
      })
      .collect();

    // queue is oldest first, the list newest first
    hydrated.reverse();
    let count = hydrated.len();
    hydrated.append(&mut self.context.transactions);
    self.context.transactions = hydrated;

    if count > 0 {
      info!(count, "Hydrated pending transactions");
    }
    Ok(count)
  }

  /// Add a transaction: optimistic insert, network write, queue on failure.
  ///
  /// Returns an error only when the record could not be queued.
  pub async fn add(&mut self, draft: TransactionDraft) -> Result<WriteOutcome> {
    let record = match draft.into_transaction() {
      Some(record) => record,
      None => {
        debug!("Rejecting incomplete transaction");
        return Ok(WriteOutcome::Invalid);
      }
    };

    self.context.transactions.insert(0, record.clone());

    match self.api.create(&record).await {
      Ok(ack) => {
        let mut saved = record.clone();
        ack.apply_to(&mut saved);
        if let Some(slot) = self.slot_of(&record) {
          *slot = saved.clone();
        }
        info!(name = %saved.name, value = saved.value, "Transaction saved");
        Ok(WriteOutcome::Saved(saved))
      }
      Err(e) if e.is_retryable() => {
        if e.is_network() {
          self.context.connectivity.set(false);
        }
        match self.queue.enqueue(&record) {
          Ok(key) => {
            info!(name = %record.name, %key, error = %e, "Transaction queued for sync");
            Ok(WriteOutcome::Queued { key })
          }
          Err(store_err) => {
            self.drop_optimistic(&record);
            Err(store_err)
          }
        }
      }
      Err(e) => {
        self.drop_optimistic(&record);
        let errors = match e {
          ApiError::Validation(errors) => errors,
          other => vec![other.to_string()],
        };
        warn!(name = %record.name, ?errors, "Transaction rejected");
        Ok(WriteOutcome::Rejected { errors })
      }
    }
  }

  fn slot_of(&mut self, record: &Transaction) -> Option<&mut Transaction> {
    self.context.transactions.iter_mut().find(|t| *t == record)
  }

  fn drop_optimistic(&mut self, record: &Transaction) {
    if let Some(pos) = self.context.transactions.iter().position(|t| t == record) {
      self.context.transactions.remove(pos);
    }
  }
}
