//! Cache generations and their install/activate lifecycle.
//!
//! A generation is a pair of named caches (static assets and runtime
//! responses) tagged with a version. Installing a new version fills its
//! static cache from the asset manifest; activating it removes every other
//! cache. Older generations stay readable until activation succeeds.

use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use tracing::{debug, info, warn};
use url::Url;

use super::storage::ResponseStore;
use super::traits::CacheKey;
use crate::api::error::ApiError;
use crate::api::http::{Fetch, Request, Response};

/// Version tag of the cache generation shipped with this build.
/// Bump it to evict every previously cached asset and response on activation.
pub const DEFAULT_CACHE_VERSION: &str = "1";

/// The pair of caches owned by one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGeneration {
  pub version: String,
  pub static_cache: String,
  pub runtime_cache: String,
}

impl CacheGeneration {
  pub fn new(prefix: &str, version: &str) -> Self {
    Self {
      version: version.to_string(),
      static_cache: format!("{}-static-v{}", prefix, version),
      runtime_cache: format!("{}-runtime-v{}", prefix, version),
    }
  }

  /// Whether a cache name belongs to this generation.
  pub fn owns(&self, cache_name: &str) -> bool {
    cache_name == self.static_cache || cache_name == self.runtime_cache
  }
}

/// Lifecycle state of the current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Nothing attempted yet
  Pending,
  Installing,
  Installed,
  Activating,
  Active,
  /// Install failed; older generations remain in charge
  Redundant,
}

/// Drives one generation through install and activation.
pub struct CacheLifecycle<S: ResponseStore> {
  storage: Arc<S>,
  generation: CacheGeneration,
  base_url: Url,
  manifest: Vec<String>,
  state: LifecycleState,
}

impl<S: ResponseStore> CacheLifecycle<S> {
  pub fn new(
    storage: Arc<S>,
    generation: CacheGeneration,
    base_url: Url,
    manifest: Vec<String>,
  ) -> Self {
    Self {
      storage,
      generation,
      base_url,
      manifest,
      state: LifecycleState::Pending,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  pub fn generation(&self) -> &CacheGeneration {
    &self.generation
  }

  fn set_state(&mut self, state: LifecycleState) {
    debug!(version = %self.generation.version, from = ?self.state, to = ?state, "Cache lifecycle");
    self.state = state;
  }

  /// Pick up a generation installed by an earlier run.
  ///
  /// The earlier run may have stopped between install and activation, so
  /// other generations are pruned here as well.
  pub fn resume(&mut self) -> Result<bool> {
    if !self.storage.is_complete(&self.generation.static_cache)? {
      return Ok(false);
    }
    let removed = self.prune_others()?;
    if !removed.is_empty() {
      info!(version = %self.generation.version, pruned = ?removed, "Pruned caches left by an unfinished activation");
    }
    self.set_state(LifecycleState::Active);
    Ok(true)
  }

  /// Fetch every manifest asset and store them in the static cache.
  ///
  /// All assets must come back with a success status. When the generation
  /// was not installed before, a failure removes whatever was written and
  /// the state becomes `Redundant`. Reinstalling a complete generation
  /// leaves its cache untouched on failure and restores the previous state.
  pub async fn install<F: Fetch>(&mut self, transport: &F) -> Result<()> {
    let previous = self.state;
    let was_complete = self.storage.is_complete(&self.generation.static_cache)?;
    self.set_state(LifecycleState::Installing);

    let result = match self.fetch_manifest(transport).await {
      Ok(entries) => self
        .storage
        .put_all(&self.generation.static_cache, &entries)
        .and_then(|_| self.storage.mark_complete(&self.generation.static_cache))
        .map(|_| entries.len()),
      Err(e) => Err(eyre!(
        "Failed to install cache generation {}: {}",
        self.generation.version,
        e
      )),
    };

    match result {
      Ok(assets) => {
        info!(version = %self.generation.version, assets, "Installed cache generation");
        self.set_state(LifecycleState::Installed);
        Ok(())
      }
      Err(e) if was_complete => {
        warn!(version = %self.generation.version, error = %e, "Cache reinstall failed, keeping installed assets");
        self.set_state(previous);
        Err(e)
      }
      Err(e) => {
        warn!(version = %self.generation.version, error = %e, "Cache install failed");
        self.discard_static_cache();
        self.set_state(LifecycleState::Redundant);
        Err(e)
      }
    }
  }

  async fn fetch_manifest<F: Fetch>(
    &self,
    transport: &F,
  ) -> std::result::Result<Vec<(CacheKey, Response)>, ApiError> {
    let requests = self
      .manifest
      .iter()
      .map(|path| {
        self
          .base_url
          .join(path)
          .map(Request::get)
          .map_err(|e| ApiError::InvalidRequest(format!("{}: {}", path, e)))
      })
      .collect::<std::result::Result<Vec<_>, _>>()?;

    try_join_all(requests.iter().map(|request| async move {
      let response = transport.fetch(request).await?;
      if !response.is_success() {
        return Err(ApiError::from_status(response.status, &response.body));
      }
      Ok((CacheKey::from(request), response))
    }))
    .await
  }

  fn discard_static_cache(&self) {
    if let Err(e) = self.storage.delete_cache(&self.generation.static_cache) {
      warn!(cache = %self.generation.static_cache, error = %e, "Failed to discard partial cache");
    }
  }

  /// Remove every cache that does not belong to the current generation and
  /// take over immediately. Returns the names of the removed caches.
  pub fn activate(&mut self) -> Result<Vec<String>> {
    if self.state != LifecycleState::Installed {
      return Err(eyre!(
        "Cannot activate cache generation {} from state {:?}",
        self.generation.version,
        self.state
      ));
    }
    self.set_state(LifecycleState::Activating);
    let removed = self.prune_others()?;

    info!(version = %self.generation.version, pruned = ?removed, "Activated cache generation");
    self.set_state(LifecycleState::Active);
    Ok(removed)
  }

  fn prune_others(&self) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for name in self.storage.cache_names()? {
      if self.generation.owns(&name) {
        continue;
      }
      if self.storage.delete_cache(&name)? {
        removed.push(name);
      }
    }
    Ok(removed)
  }

  /// Resume an installed generation or install and activate it now.
  pub async fn ensure_active<F: Fetch>(&mut self, transport: &F) -> Result<()> {
    if self.state == LifecycleState::Active || self.resume()? {
      return Ok(());
    }
    self.install(transport).await?;
    self.activate()?;
    Ok(())
  }
}
