//! Budget transaction types as they travel over the wire and sit in the
//! pending queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A single budget transaction.
///
/// `value` is signed: deposits are positive, withdrawals negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
  #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  pub name: String,
  #[serde(deserialize_with = "deserialize_lenient_i64")]
  pub value: i64,
  pub date: DateTime<Utc>,
  #[serde(rename = "__v", default, skip_serializing_if = "Option::is_none")]
  pub version: Option<i64>,
}

impl Transaction {
  /// Build a new, not yet persisted record stamped with the current time.
  pub fn new(name: impl Into<String>, value: i64) -> Self {
    Self {
      id: None,
      name: name.into(),
      value,
      date: Utc::now(),
      version: None,
    }
  }
}

/// Which button the user pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
  Deposit,
  Withdrawal,
}

/// Raw user input for a new transaction, before validation.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
  pub name: String,
  pub amount: Option<i64>,
  pub kind: EntryKind,
}

impl TransactionDraft {
  pub fn new(name: impl Into<String>, amount: Option<i64>, kind: EntryKind) -> Self {
    Self {
      name: name.into(),
      amount,
      kind,
    }
  }

  /// Validate the draft and turn it into a record.
  ///
  /// Returns `None` when the name is blank or the amount is missing or zero.
  pub fn into_transaction(self) -> Option<Transaction> {
    let name = self.name.trim();
    let amount = self.amount.filter(|a| *a != 0)?;
    if name.is_empty() {
      return None;
    }
    let magnitude = amount.checked_abs()?;
    let value = match self.kind {
      EntryKind::Deposit => magnitude,
      EntryKind::Withdrawal => -magnitude,
    };
    Some(Transaction::new(name, value))
  }
}

/// Fields the server assigns when it stores a record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerAck {
  #[serde(rename = "_id")]
  pub id: Option<String>,
  #[serde(rename = "__v")]
  pub version: Option<i64>,
}

impl ServerAck {
  /// Copy server-assigned fields onto a local record.
  pub fn apply_to(&self, record: &mut Transaction) {
    if let Some(id) = &self.id {
      record.id = Some(id.clone());
    }
    if let Some(version) = self.version {
      record.version = Some(version);
    }
  }
}

/// Extract validation messages from an `{ errors: ... }` body.
///
/// The backend reports errors either as an array of strings/objects or as a
/// map of field name to error object; both shapes are flattened to messages.
pub fn validation_errors(body: &Value) -> Option<Vec<String>> {
  let errors = body.get("errors")?;
  let messages = match errors {
    Value::Array(items) => items.iter().map(error_message).collect(),
    Value::Object(map) => map
      .iter()
      .map(|(field, err)| match err.get("message").and_then(Value::as_str) {
        Some(message) => message.to_string(),
        None => format!("{}: {}", field, error_message(err)),
      })
      .collect(),
    Value::Null => return None,
    other => vec![error_message(other)],
  };
  Some(messages)
}

fn error_message(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other
      .get("message")
      .and_then(Value::as_str)
      .map(String::from)
      .unwrap_or_else(|| other.to_string()),
  }
}

/// Accept an integer given either as a JSON number or as a numeric string.
fn deserialize_lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
  D: Deserializer<'de>,
{
  use serde::de::Error;

  match Value::deserialize(deserializer)? {
    Value::Number(n) => n
      .as_i64()
      .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
      .ok_or_else(|| D::Error::custom(format!("value out of range: {}", n))),
    Value::String(s) => s
      .trim()
      .parse::<i64>()
      .map_err(|e| D::Error::custom(format!("invalid value '{}': {}", s, e))),
    other => Err(D::Error::custom(format!("expected integer, got {}", other))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_withdrawal_draft_is_negative() {
    let draft = TransactionDraft::new("Rent", Some(1200), EntryKind::Withdrawal);
    let tx = draft.into_transaction().unwrap();
    assert_eq!(tx.name, "Rent");
    assert_eq!(tx.value, -1200);
    assert!(tx.id.is_none());
  }

  #[test]
  fn test_draft_missing_information() {
    assert!(TransactionDraft::new("  ", Some(5), EntryKind::Deposit)
      .into_transaction()
      .is_none());
    assert!(TransactionDraft::new("Coffee", None, EntryKind::Deposit)
      .into_transaction()
      .is_none());
    assert!(TransactionDraft::new("Coffee", Some(0), EntryKind::Deposit)
      .into_transaction()
      .is_none());
  }

  #[test]
  fn test_deserialize_server_record() {
    let tx: Transaction = serde_json::from_value(json!({
      "_id": "64b0c1",
      "name": "Salary",
      "value": "2500",
      "date": "2024-03-01T10:00:00.000Z",
      "__v": 0
    }))
    .unwrap();
    assert_eq!(tx.id.as_deref(), Some("64b0c1"));
    assert_eq!(tx.value, 2500);
    assert_eq!(tx.version, Some(0));
  }

  #[test]
  fn test_unsaved_record_omits_server_fields() {
    let tx = Transaction::new("Gift", 20);
    let value = serde_json::to_value(&tx).unwrap();
    assert!(value.get("_id").is_none());
    assert!(value.get("__v").is_none());
    assert_eq!(value["value"], 20);
  }

  #[test]
  fn test_validation_errors_shapes() {
    let map = json!({ "errors": { "name": { "message": "Enter a name for transaction" } } });
    assert_eq!(
      validation_errors(&map),
      Some(vec!["Enter a name for transaction".to_string()])
    );

    let list = json!({ "errors": ["value is required"] });
    assert_eq!(
      validation_errors(&list),
      Some(vec!["value is required".to_string()])
    );

    assert_eq!(validation_errors(&json!({ "name": "ok" })), None);
  }
}
