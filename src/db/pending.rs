//! Pending-write queue operations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use uuid::Uuid;

use super::Database;
use crate::api::types::Transaction;

/// A queued transaction and its store key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
  /// Generated at enqueue time, independent of the record's date
  pub key: String,
  pub record: Transaction,
  pub enqueued_at: DateTime<Utc>,
}

/// Durable queue of transactions awaiting a bulk push.
///
/// Records are immutable once enqueued; entries leave the queue only through
/// `remove` or `clear_all`.
pub trait PendingQueue: Send + Sync {
  /// Store a record under a fresh key and return the key.
  fn enqueue(&self, record: &Transaction) -> Result<String>;

  /// Snapshot of every queued entry, oldest first. Nothing is removed.
  fn drain_all(&self) -> Result<Vec<PendingEntry>>;

  /// Remove every entry. Returns how many were removed.
  fn clear_all(&self) -> Result<usize>;

  /// Remove exactly these keys in one transaction.
  fn remove(&self, keys: &[String]) -> Result<usize>;

  fn len(&self) -> Result<usize>;

  fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

impl PendingQueue for Database {
  fn enqueue(&self, record: &Transaction) -> Result<String> {
    let key = Uuid::new_v4().to_string();
    let data =
      serde_json::to_string(record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

    self
      .conn()?
      .execute(
        "INSERT INTO pending_transactions (queue_key, record, enqueued_at) VALUES (?, ?, ?)",
        params![key, data, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to enqueue transaction: {}", e))?;

    Ok(key)
  }

  fn drain_all(&self) -> Result<Vec<PendingEntry>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT queue_key, record, enqueued_at FROM pending_transactions ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, String)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to read pending transactions: {}", e))?
      .collect::<std::result::Result<_, _>>()
      .map_err(|e| eyre!("Failed to read pending transactions: {}", e))?;

    rows
      .into_iter()
      .map(|(key, data, enqueued_at)| {
        let record: Transaction = serde_json::from_str(&data)
          .map_err(|e| eyre!("Failed to parse pending record {}: {}", key, e))?;
        let enqueued_at = DateTime::parse_from_rfc3339(&enqueued_at)
          .map_err(|e| eyre!("Failed to parse enqueue time of {}: {}", key, e))?
          .with_timezone(&Utc);
        Ok(PendingEntry {
          key,
          record,
          enqueued_at,
        })
      })
      .collect()
  }

  fn clear_all(&self) -> Result<usize> {
    self
      .conn()?
      .execute("DELETE FROM pending_transactions", [])
      .map_err(|e| eyre!("Failed to clear pending transactions: {}", e))
  }

  fn remove(&self, keys: &[String]) -> Result<usize> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let mut removed = 0;
    for key in keys {
      removed += tx
        .execute(
          "DELETE FROM pending_transactions WHERE queue_key = ?",
          params![key],
        )
        .map_err(|e| eyre!("Failed to remove pending transaction {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(removed)
  }

  fn len(&self) -> Result<usize> {
    let count: i64 = self
      .conn()?
      .query_row("SELECT COUNT(*) FROM pending_transactions", [], |row| {
        row.get(0)
      })
      .map_err(|e| eyre!("Failed to count pending transactions: {}", e))?;
    Ok(count as usize)
  }
}
