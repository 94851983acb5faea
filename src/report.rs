//! Text rendering of the in-memory transaction list.

use chrono::Datelike;
use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, Table};

use crate::api::types::Transaction;
use crate::db::PendingEntry;

/// One point of the running-total chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartPoint {
  /// `M/D/YYYY`
  pub label: String,
  pub cumulative: i64,
}

pub fn total(transactions: &[Transaction]) -> i64 {
  transactions.iter().map(|t| t.value).sum()
}

/// Cumulative balance over time.
///
/// The list is kept newest first, so it is walked in reverse.
pub fn running_totals(transactions: &[Transaction]) -> Vec<ChartPoint> {
  let mut sum = 0;
  transactions
    .iter()
    .rev()
    .map(|t| {
      sum += t.value;
      ChartPoint {
        label: date_label(t),
        cumulative: sum,
      }
    })
    .collect()
}

fn date_label(t: &Transaction) -> String {
  format!("{}/{}/{}", t.date.month(), t.date.day(), t.date.year())
}

fn table(headers: &[&str]) -> Table {
  let mut t = Table::new();
  t.load_preset(UTF8_FULL);
  t.set_header(headers.iter().map(|h| Cell::new(*h)));
  t
}

pub fn transactions_table(transactions: &[Transaction]) -> Table {
  let mut t = table(&["Transaction", "Amount"]);
  for tx in transactions {
    t.add_row(vec![
      Cell::new(&tx.name),
      Cell::new(tx.value).set_alignment(CellAlignment::Right),
    ]);
  }
  t
}

pub fn pending_table(entries: &[PendingEntry]) -> Table {
  let mut t = table(&["Key", "Transaction", "Amount", "Queued at"]);
  for entry in entries {
    t.add_row(vec![
      Cell::new(&entry.key),
      Cell::new(&entry.record.name),
      Cell::new(entry.record.value).set_alignment(CellAlignment::Right),
      Cell::new(entry.enqueued_at.format("%Y-%m-%d %H:%M:%S")),
    ]);
  }
  t
}

pub fn chart_table(points: &[ChartPoint]) -> Table {
  let mut t = table(&["Date", "Balance"]);
  for point in points {
    t.add_row(vec![
      Cell::new(&point.label),
      Cell::new(point.cumulative).set_alignment(CellAlignment::Right),
    ]);
  }
  t
}
