//! Typed budget API on top of the request interceptor.

use tracing::{debug, warn};
use url::Url;

use super::error::ApiError;
use super::http::{Fetch, Request};
use super::types::{validation_errors, ServerAck, Transaction};
use crate::cache::{CacheResult, Interceptor, ResponseStore, SqliteCacheStorage};

/// Live listing endpoint, also used for single writes
pub const TRANSACTION_PATH: &str = "/api/transaction";

/// Bulk write endpoint used by the reconciler
pub const BULK_PATH: &str = "/api/transaction/bulk";

/// Budget API client.
///
/// Every request goes through the interceptor, so listings are cached and
/// served offline while writes always hit the network.
pub struct BudgetApi<F: Fetch, S: ResponseStore = SqliteCacheStorage> {
  interceptor: Interceptor<F, S>,
  base_url: Url,
}

impl<F: Fetch, S: ResponseStore> BudgetApi<F, S> {
  pub fn new(interceptor: Interceptor<F, S>, base_url: Url) -> Self {
    Self {
      interceptor,
      base_url,
    }
  }

  pub fn interceptor(&self) -> &Interceptor<F, S> {
    &self.interceptor
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
    self
      .base_url
      .join(path)
      .map_err(|e| ApiError::InvalidRequest(format!("{}: {}", path, e)))
  }

  /// Fetch the transaction listing, network first.
  ///
  /// `Ok(None)` means neither the server nor the cache had an answer.
  pub async fn list(&self) -> Result<Option<CacheResult<Vec<Transaction>>>, ApiError> {
    let request = Request::get(self.endpoint(TRANSACTION_PATH)?);
    let served = match self.interceptor.handle(&request).await?.into_served() {
      Some(served) => served,
      None => return Ok(None),
    };

    if !served.data.is_success() {
      return Err(ApiError::from_status(served.data.status, &served.data.body));
    }
    let transactions: Vec<Transaction> = served.data.json()?;
    debug!(count = transactions.len(), source = %served.source, "Loaded transactions");
    Ok(Some(served.map(|_| transactions)))
  }

  /// Send a single new transaction.
  ///
  /// A body carrying `errors` is a validation failure whatever the status.
  pub async fn create(&self, record: &Transaction) -> Result<ServerAck, ApiError> {
    let body =
      serde_json::to_vec(record).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
    let request = Request::post_json(self.endpoint(TRANSACTION_PATH)?, body);
    let response = self.interceptor.pass_through(&request).await?;

    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(&response.body) {
      if let Some(errors) = validation_errors(&json) {
        return Err(ApiError::Validation(errors));
      }
      if response.is_success() {
        return Ok(serde_json::from_value(json).unwrap_or_default());
      }
    }

    if response.is_success() {
      warn!(status = response.status, "Write accepted without a readable body");
      return Ok(ServerAck::default());
    }
    Err(ApiError::from_status(response.status, &response.body))
  }

  /// Push a batch of pending records in one request.
  pub async fn bulk(&self, records: &[Transaction], idempotency_key: &str) -> Result<(), ApiError> {
    let body =
      serde_json::to_vec(records).map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
    let request = Request::post_json(self.endpoint(BULK_PATH)?, body)
      .with_header("Idempotency-Key", idempotency_key);
    let response = self.interceptor.pass_through(&request).await?;

    if response.is_success() {
      Ok(())
    } else {
      Err(ApiError::from_status(response.status, &response.body))
    }
  }
}

impl<F: Fetch, S: ResponseStore> Clone for BudgetApi<F, S> {
  fn clone(&self) -> Self {
    Self {
      interceptor: self.interceptor.clone(),
      base_url: self.base_url.clone(),
    }
  }
}
