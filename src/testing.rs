//! In-process stand-in for the budget backend, used by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use url::Url;

use crate::api::error::ApiError;
use crate::api::http::{Fetch, Request, Response};
use crate::api::types::Transaction;

#[derive(Default)]
struct State {
  online: bool,
  transactions: Vec<Transaction>,
  assets: HashMap<String, Vec<u8>>,
  listing_status: Option<u16>,
  write_status: Option<u16>,
  write_errors: Option<serde_json::Value>,
  bulk_status: Option<u16>,
  bulk_fail_after: Option<(usize, u16)>,
  bulk_delay: Option<Duration>,
  bulk_payloads: Vec<Vec<Transaction>>,
  bulk_keys: Vec<Option<String>>,
  requests: Vec<(String, String)>,
  next_id: u64,
}

/// Fake budget server. Clones share state.
#[derive(Clone)]
pub struct FakeServer {
  base: Url,
  state: Arc<Mutex<State>>,
}

impl FakeServer {
  pub fn new() -> Self {
    let state = State {
      online: true,
      ..State::default()
    };
    Self {
      base: Url::parse("http://budget.test").unwrap(),
      state: Arc::new(Mutex::new(state)),
    }
  }

  fn state(&self) -> std::sync::MutexGuard<'_, State> {
    self.state.lock().unwrap()
  }

  pub fn base_url(&self) -> Url {
    self.base.clone()
  }

  pub fn url(&self, path: &str) -> Url {
    self.base.join(path).unwrap()
  }

  pub fn set_online(&self, online: bool) {
    self.state().online = online;
  }

  pub fn set_asset(&self, path: &str, body: &str) {
    self
      .state()
      .assets
      .insert(path.to_string(), body.as_bytes().to_vec());
  }

  pub fn seed_transaction(&self, name: &str, value: i64) {
    let mut state = self.state();
    state.next_id += 1;
    let mut tx = Transaction::new(name, value);
    tx.id = Some(format!("srv-{}", state.next_id));
    tx.version = Some(0);
    state.transactions.push(tx);
  }

  pub fn transactions(&self) -> Vec<Transaction> {
    let mut list = self.state().transactions.clone();
    list.sort_by(|a, b| b.date.cmp(&a.date));
    list
  }

  pub fn listing_body(&self) -> Vec<u8> {
    serde_json::to_vec(&self.transactions()).unwrap()
  }

  pub fn fail_listing_with(&self, status: u16) {
    self.state().listing_status = Some(status);
  }

  pub fn fail_writes_with(&self, status: u16) {
    self.state().write_status = Some(status);
  }

  pub fn reject_writes(&self, errors: serde_json::Value) {
    self.state().write_errors = Some(errors);
  }

  pub fn fail_bulk_with(&self, status: Option<u16>) {
    self.state().bulk_status = status;
  }

  /// Accept `successes` bulk writes, then answer every further one with
  /// `status`.
  pub fn fail_bulk_after(&self, successes: usize, status: u16) {
    self.state().bulk_fail_after = Some((successes, status));
  }

  pub fn delay_bulk(&self, delay: Duration) {
    self.state().bulk_delay = Some(delay);
  }

  pub fn bulk_payloads(&self) -> Vec<Vec<Transaction>> {
    self.state().bulk_payloads.clone()
  }

  pub fn bulk_idempotency_keys(&self) -> Vec<Option<String>> {
    self.state().bulk_keys.clone()
  }

  pub fn request_count(&self, method: &str, path: &str) -> usize {
    self
      .state()
      .requests
      .iter()
      .filter(|(m, p)| m == method && p == path)
      .count()
  }

  fn route(&self, request: &Request) -> Response {
    let mut state = self.state();
    let path = request.url.path().to_string();
    state
      .requests
      .push((request.method.to_string(), path.clone()));

    match (request.method.as_str(), path.as_str()) {
      ("GET", "/api/transaction") => {
        if let Some(status) = state.listing_status {
          return Response::new(status, "listing unavailable");
        }
        drop(state);
        Response::new(200, self.listing_body())
      }
      ("POST", "/api/transaction") => {
        if let Some(errors) = &state.write_errors {
          return Response::new(400, json!({ "errors": errors }).to_string());
        }
        if let Some(status) = state.write_status {
          return Response::new(status, "write failed");
        }
        let mut tx: Transaction = match serde_json::from_slice(request.body.as_deref().unwrap_or(b"")) {
          Ok(tx) => tx,
          Err(e) => return Response::new(400, json!({ "errors": [e.to_string()] }).to_string()),
        };
        state.next_id += 1;
        tx.id = Some(format!("srv-{}", state.next_id));
        tx.version = Some(0);
        state.transactions.push(tx.clone());
        Response::new(200, serde_json::to_vec(&tx).unwrap())
      }
      ("POST", "/api/transaction/bulk") => {
        let key = request
          .headers
          .iter()
          .find(|(k, _)| k.eq_ignore_ascii_case("idempotency-key"))
          .map(|(_, v)| v.clone());
        state.bulk_keys.push(key);
        let exhausted = state
          .bulk_fail_after
          .filter(|(successes, _)| state.bulk_payloads.len() >= *successes)
          .map(|(_, status)| status);
        if let Some(status) = state.bulk_status.or(exhausted) {
          return Response::new(status, json!({ "message": "bulk failed" }).to_string());
        }
        let records: Vec<Transaction> =
          serde_json::from_slice(request.body.as_deref().unwrap_or(b"[]")).unwrap();
        state.bulk_payloads.push(records.clone());
        for mut tx in records {
          state.next_id += 1;
          tx.id = Some(format!("srv-{}", state.next_id));
          tx.version = Some(0);
          state.transactions.push(tx);
        }
        Response::new(200, "")
      }
      ("GET", _) => match state.assets.get(&path) {
        Some(body) => Response::new(200, body.clone()),
        None => Response::new(404, "not found"),
      },
      _ => Response::new(405, "method not allowed"),
    }
  }
}

impl Default for FakeServer {
  fn default() -> Self {
    Self::new()
  }
}

impl Fetch for FakeServer {
  async fn fetch(&self, request: &Request) -> Result<Response, ApiError> {
    let (online, delay) = {
      let state = self.state();
      let is_bulk = request.url.path() == "/api/transaction/bulk";
      (state.online, if is_bulk { state.bulk_delay } else { None })
    };
    if !online {
      return Err(ApiError::Network("connection refused".to_string()));
    }
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    Ok(self.route(request))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_default_server_starts_online_and_empty() {
    let server = FakeServer::default();
    let response = server
      .fetch(&Request::get(server.url("/api/transaction")))
      .await
      .unwrap();

    assert_eq!(response.status, 200);
    assert!(server.transactions().is_empty());
    assert_eq!(server.base_url().as_str(), "http://budget.test/");
  }

  #[tokio::test]
  async fn test_bulk_fails_after_allowed_successes() {
    let server = FakeServer::default();
    server.fail_bulk_after(1, 503);
    let body = serde_json::to_vec(&vec![Transaction::new("Rent", -500)]).unwrap();
    let request = Request::post_json(server.url("/api/transaction/bulk"), body);

    assert!(server.fetch(&request).await.unwrap().status < 300);
    assert_eq!(server.fetch(&request).await.unwrap().status, 503);
    assert_eq!(server.bulk_payloads().len(), 1);
  }
}
