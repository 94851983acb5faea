//! Request interceptor that picks a caching strategy for every outgoing
//! request and keeps the response cache up to date.

use std::sync::Arc;

use tracing::{debug, warn};

use super::lifecycle::CacheGeneration;
use super::storage::{CachedResponse, ResponseStore};
use super::traits::{CacheKey, CacheResult};
use crate::api::error::ApiError;
use crate::api::http::{Fetch, Request, Response};

/// How a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
  /// Writes go straight to the network and are never cached
  Mutation,
  /// Live API data: network first, cache as fallback
  LiveData,
  /// App shell and other static files: cache first
  StaticAsset,
}

/// Outcome of an intercepted read.
#[derive(Debug, Clone)]
pub enum Intercepted {
  Served(CacheResult<Response>),
  /// Neither the network nor the cache could answer
  Unavailable,
}

impl Intercepted {
  pub fn into_served(self) -> Option<CacheResult<Response>> {
    match self {
      Intercepted::Served(result) => Some(result),
      Intercepted::Unavailable => None,
    }
  }
}

/// Interceptor that sits between the application and the transport.
///
/// Reads never fail: transport and cache errors degrade to cached data or
/// [`Intercepted::Unavailable`]. Mutations pass straight through and their
/// transport errors are returned so the caller can queue the write.
pub struct Interceptor<F: Fetch, S: ResponseStore> {
  transport: Arc<F>,
  storage: Arc<S>,
  generation: CacheGeneration,
  /// Path prefix of the live data API (e.g. "/api/")
  api_prefix: String,
}

impl<F: Fetch, S: ResponseStore> Interceptor<F, S> {
  pub fn new(
    transport: Arc<F>,
    storage: Arc<S>,
    generation: CacheGeneration,
    api_prefix: impl Into<String>,
  ) -> Self {
    Self {
      transport,
      storage,
      generation,
      api_prefix: api_prefix.into(),
    }
  }

  pub fn transport(&self) -> &Arc<F> {
    &self.transport
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn generation(&self) -> &CacheGeneration {
    &self.generation
  }

  pub fn classify(&self, request: &Request) -> RequestKind {
    if request.is_mutation() {
      RequestKind::Mutation
    } else if request.url.path().starts_with(&self.api_prefix) {
      RequestKind::LiveData
    } else {
      RequestKind::StaticAsset
    }
  }

  /// Handle a request according to its kind.
  pub async fn handle(&self, request: &Request) -> Result<Intercepted, ApiError> {
    match self.classify(request) {
      RequestKind::Mutation => {
        let response = self.pass_through(request).await?;
        Ok(Intercepted::Served(CacheResult::from_network(response)))
      }
      RequestKind::LiveData => Ok(self.network_first(request).await),
      RequestKind::StaticAsset => Ok(self.cache_first(request).await),
    }
  }

  /// Send a request without touching the cache.
  pub async fn pass_through(&self, request: &Request) -> Result<Response, ApiError> {
    debug!(method = %request.method, url = %request.url, "Passing request through");
    self.transport.fetch(request).await
  }

  /// Fetch a read with network-first strategy.
  ///
  /// 1. Try the network; a successful answer overwrites the cached entry
  /// 2. On transport failure or a server error, return the cached entry
  /// 3. Nothing cached: return the server error as-is, or `Unavailable`
  pub async fn network_first(&self, request: &Request) -> Intercepted {
    let key = CacheKey::from(request);

    let network_error = match self.transport.fetch(request).await {
      Ok(response) if response.is_success() => {
        self.store(&key, &response);
        return Intercepted::Served(CacheResult::from_network(response));
      }
      Ok(response) if response.status < 500 => {
        return Intercepted::Served(CacheResult::from_network(response));
      }
      Ok(response) => {
        warn!(url = %key.url, status = response.status, "Server error, trying cache");
        Some(response)
      }
      Err(e) => {
        debug!(url = %key.url, error = %e, "Network unavailable, trying cache");
        None
      }
    };

    match self.lookup(&key) {
      Some(cached) => {
        debug!(url = %key.url, cache = %cached.cache_name, "Serving cached response");
        Intercepted::Served(CacheResult::offline(cached.response, cached.cached_at))
      }
      None => match network_error {
        Some(response) => Intercepted::Served(CacheResult::from_network(response)),
        None => Intercepted::Unavailable,
      },
    }
  }

  /// Fetch a read with cache-first strategy.
  ///
  /// 1. Cached entry present: return it without touching the network
  /// 2. Otherwise fetch, keep a copy of successful answers, return it
  pub async fn cache_first(&self, request: &Request) -> Intercepted {
    let key = CacheKey::from(request);

    if let Some(cached) = self.lookup(&key) {
      debug!(url = %key.url, cache = %cached.cache_name, "Cache hit");
      return Intercepted::Served(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    match self.transport.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(&key, &response);
        }
        Intercepted::Served(CacheResult::from_network(response))
      }
      Err(e) => {
        debug!(url = %key.url, error = %e, "Cache miss and network unavailable");
        Intercepted::Unavailable
      }
    }
  }

  fn lookup(&self, key: &CacheKey) -> Option<CachedResponse> {
    let preferred = [
      self.generation.static_cache.as_str(),
      self.generation.runtime_cache.as_str(),
    ];
    match self.storage.match_request(key, &preferred) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(url = %key.url, error = %e, "Cache lookup failed, treating as miss");
        None
      }
    }
  }

  fn store(&self, key: &CacheKey, response: &Response) {
    if let Err(e) = self
      .storage
      .put(&self.generation.runtime_cache, key, response)
    {
      warn!(url = %key.url, error = %e, "Failed to cache response");
    }
  }
}

impl<F: Fetch, S: ResponseStore> Clone for Interceptor<F, S> {
  fn clone(&self) -> Self {
    Self {
      transport: Arc::clone(&self.transport),
      storage: Arc::clone(&self.storage),
      generation: self.generation.clone(),
      api_prefix: self.api_prefix.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteCacheStorage;
  use crate::cache::traits::CacheSource;
  use crate::testing::FakeServer;

  fn interceptor(server: &FakeServer) -> Interceptor<FakeServer, SqliteCacheStorage> {
    Interceptor::new(
      Arc::new(server.clone()),
      Arc::new(SqliteCacheStorage::open_in_memory().unwrap()),
      CacheGeneration::new("budget", "1"),
      "/api/",
    )
  }

  fn served(result: Intercepted) -> CacheResult<Response> {
    result.into_served().expect("expected a response")
  }

  #[test]
  fn test_classify() {
    let server = FakeServer::new();
    let interceptor = interceptor(&server);
    assert_eq!(
      interceptor.classify(&Request::get(server.url("/api/transaction"))),
      RequestKind::LiveData
    );
    assert_eq!(
      interceptor.classify(&Request::get(server.url("/styles.css"))),
      RequestKind::StaticAsset
    );
    assert_eq!(
      interceptor.classify(&Request::post_json(server.url("/api/transaction"), vec![])),
      RequestKind::Mutation
    );
  }

  #[tokio::test]
  async fn test_static_asset_served_offline_after_first_fetch() {
    let server = FakeServer::new();
    server.set_asset("/styles.css", "body { color: teal; }");
    let interceptor = interceptor(&server);
    let request = Request::get(server.url("/styles.css"));

    let first = served(interceptor.handle(&request).await.unwrap());
    assert_eq!(first.source, CacheSource::Network);

    server.set_online(false);
    let second = served(interceptor.handle(&request).await.unwrap());
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(second.data.body, first.data.body);
  }

  #[tokio::test]
  async fn test_cache_first_does_not_refetch() {
    let server = FakeServer::new();
    server.set_asset("/index.js", "v1");
    let interceptor = interceptor(&server);
    let request = Request::get(server.url("/index.js"));

    interceptor.handle(&request).await.unwrap();
    server.set_asset("/index.js", "v2");
    let again = served(interceptor.handle(&request).await.unwrap());

    assert_eq!(again.data.body, b"v1");
    assert_eq!(server.request_count("GET", "/index.js"), 1);
  }

  #[tokio::test]
  async fn test_static_miss_offline_is_unavailable() {
    let server = FakeServer::new();
    server.set_online(false);
    let interceptor = interceptor(&server);

    let result = interceptor
      .handle(&Request::get(server.url("/icons/icon-192.png")))
      .await
      .unwrap();
    assert!(matches!(result, Intercepted::Unavailable));
  }

  #[tokio::test]
  async fn test_not_found_asset_is_not_cached() {
    let server = FakeServer::new();
    let interceptor = interceptor(&server);
    let request = Request::get(server.url("/missing.png"));

    let first = served(interceptor.handle(&request).await.unwrap());
    assert_eq!(first.data.status, 404);

    server.set_online(false);
    assert!(matches!(
      interceptor.handle(&request).await.unwrap(),
      Intercepted::Unavailable
    ));
  }

  #[tokio::test]
  async fn test_network_first_prefers_live_data() {
    let server = FakeServer::new();
    server.seed_transaction("Salary", 2500);
    let interceptor = interceptor(&server);
    let request = Request::get(server.url("/api/transaction"));

    let stale = served(interceptor.handle(&request).await.unwrap());

    server.seed_transaction("Coffee", -4);
    let live = served(interceptor.handle(&request).await.unwrap());

    assert_eq!(live.source, CacheSource::Network);
    assert_ne!(live.data.body, stale.data.body);
    assert_eq!(live.data.body, server.listing_body());
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_last_cached() {
    let server = FakeServer::new();
    server.seed_transaction("Salary", 2500);
    let interceptor = interceptor(&server);
    let request = Request::get(server.url("/api/transaction"));

    let live = served(interceptor.handle(&request).await.unwrap());

    server.set_online(false);
    let fallback = served(interceptor.handle(&request).await.unwrap());
    assert_eq!(fallback.source, CacheSource::Offline);
    assert!(fallback.cached_at.is_some());
    assert_eq!(fallback.data.body, live.data.body);
  }

  #[tokio::test]
  async fn test_network_first_without_cache_is_unavailable() {
    let server = FakeServer::new();
    server.set_online(false);
    let interceptor = interceptor(&server);

    let result = interceptor
      .handle(&Request::get(server.url("/api/transaction")))
      .await
      .unwrap();
    assert!(matches!(result, Intercepted::Unavailable));
  }

  #[tokio::test]
  async fn test_network_first_server_error_uses_cache() {
    let server = FakeServer::new();
    server.seed_transaction("Salary", 2500);
    let interceptor = interceptor(&server);
    let request = Request::get(server.url("/api/transaction"));

    let live = served(interceptor.handle(&request).await.unwrap());

    server.fail_listing_with(503);
    let fallback = served(interceptor.handle(&request).await.unwrap());
    assert_eq!(fallback.source, CacheSource::Offline);
    assert_eq!(fallback.data.body, live.data.body);
  }

  #[tokio::test]
  async fn test_mutation_errors_propagate_and_are_not_cached() {
    let server = FakeServer::new();
    let interceptor = interceptor(&server);
    let body = serde_json::to_vec(&crate::api::types::Transaction::new("Rent", -1200)).unwrap();
    let request = Request::post_json(server.url("/api/transaction"), body);

    interceptor.handle(&request).await.unwrap();
    let key = CacheKey::from(&request);
    assert!(interceptor
      .storage()
      .match_request(&key, &[])
      .unwrap()
      .is_none());

    server.set_online(false);
    let err = interceptor.handle(&request).await.unwrap_err();
    assert!(err.is_network());
  }
}
