use crate::api::http::{Fetch, Request};
use crate::api::types::TransactionDraft;
use crate::api::BudgetApi;
use crate::cache::{
  CacheGeneration, CacheLifecycle, Interceptor, LifecycleState, ResponseStore, SqliteCacheStorage,
};
use crate::config::Config;
use crate::db::{Database, PendingEntry, PendingQueue};
use crate::event::{self, Event, EventHandler};
use crate::session::{ListingSource, TransactionController, WriteOutcome};
use crate::sync::{Connectivity, Reconciler, SyncOutcome, SyncTrigger, Transition};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

/// What happened while starting up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReport {
  pub online: bool,
  /// Only attempted when online
  pub sync: Option<SyncOutcome>,
  pub source: ListingSource,
  /// Pending records shown on top of the listing
  pub hydrated: usize,
}

/// Snapshot of the response cache
#[derive(Debug, Clone)]
pub struct CacheStatus {
  pub generation: CacheGeneration,
  pub state: LifecycleState,
  pub caches: Vec<String>,
}

/// Main application state
pub struct App<F: Fetch + 'static> {
  config: Config,
  base_url: Url,
  transport: Arc<F>,
  storage: Arc<SqliteCacheStorage>,
  queue: Arc<Database>,
  connectivity: Connectivity,
  lifecycle: CacheLifecycle<SqliteCacheStorage>,
  reconciler: Reconciler<F>,
  controller: TransactionController<F>,
}

impl<F: Fetch + 'static> App<F> {
  /// Open the on-disk stores from the configured data directory.
  pub fn open(config: Config, transport: F) -> Result<Self> {
    let queue = Database::open(&config.pending_db_path()?)?;
    let storage = SqliteCacheStorage::open(&config.cache_db_path()?)?;
    Self::with_stores(config, transport, Arc::new(queue), Arc::new(storage))
  }

  pub fn with_stores(
    config: Config,
    transport: F,
    queue: Arc<Database>,
    storage: Arc<SqliteCacheStorage>,
  ) -> Result<Self> {
    let base_url = config.server_url()?;
    let transport = Arc::new(transport);
    let generation = config.generation();
    // assume online until the first probe says otherwise
    let connectivity = Connectivity::new(true);

    let interceptor = Interceptor::new(
      Arc::clone(&transport),
      Arc::clone(&storage),
      generation.clone(),
      config.cache.api_prefix.clone(),
    );
    let api = BudgetApi::new(interceptor, base_url.clone());
    let lifecycle = CacheLifecycle::new(
      Arc::clone(&storage),
      generation,
      base_url.clone(),
      config.cache.assets.clone(),
    );

    Ok(Self {
      reconciler: Reconciler::new(api.clone(), Arc::clone(&queue)),
      controller: TransactionController::new(api, Arc::clone(&queue), connectivity.clone()),
      config,
      base_url,
      transport,
      storage,
      queue,
      connectivity,
      lifecycle,
    })
  }

  fn probe_request(&self) -> Result<Request> {
    let url = self
      .base_url
      .join(&self.config.sync.probe_path)
      .map_err(|e| eyre!("Invalid probe path '{}': {}", self.config.sync.probe_path, e))?;
    Ok(Request::get(url))
  }

  /// Page-load semantics.
  ///
  /// Online: make sure the cache generation is active, push the pending
  /// queue, then load the live listing. Offline: load the cached listing.
  /// Whatever is still queued afterwards is shown on top of the listing.
  pub async fn start(&mut self) -> Result<StartReport> {
    let online = event::probe(self.transport.as_ref(), &self.probe_request()?).await;
    self.connectivity.set(online);

    let mut sync = None;
    if online {
      if let Err(e) = self.lifecycle.ensure_active(self.transport.as_ref()).await {
        warn!(error = %e, "Continuing without an installed cache generation");
      }
      sync = Some(self.reconciler.reconcile(SyncTrigger::Startup).await?);
    } else {
      info!("Starting offline");
    }

    let source = self.controller.load_listing().await;
    let hydrated = self.controller.hydrate_pending()?;

    Ok(StartReport {
      online,
      sync,
      source,
      hydrated,
    })
  }

  pub async fn add_transaction(&mut self, draft: TransactionDraft) -> Result<WriteOutcome> {
    self.controller.add(draft).await
  }

  pub async fn sync_now(&self) -> Result<SyncOutcome> {
    self.reconciler.reconcile(SyncTrigger::Manual).await
  }

  /// React to an event. Returns the sync outcome when one ran.
  pub async fn handle_event(&mut self, event: Event) -> Result<Option<SyncOutcome>> {
    match event {
      Event::Connectivity(Transition::Online) => {
        let outcome = self.reconciler.reconcile(SyncTrigger::Reconnected).await?;
        if outcome.pushed() > 0 {
          self.controller.refresh_live().await?;
        }
        Ok(Some(outcome))
      }
      Event::Connectivity(Transition::Offline) => {
        info!("Offline, new transactions will be queued");
        Ok(None)
      }
      Event::Tick => Ok(None),
    }
  }

  /// Start the connectivity probe loop.
  pub fn event_handler(&self) -> Result<EventHandler> {
    Ok(EventHandler::new(
      Arc::clone(&self.transport),
      self.probe_request()?,
      self.connectivity.clone(),
      self.config.probe_interval(),
    ))
  }

  /// Handle events until Ctrl-C. `on_sync` sees every reconciliation outcome.
  pub async fn run(
    &mut self,
    mut events: EventHandler,
    mut on_sync: impl FnMut(&Self, &SyncOutcome),
  ) -> Result<()> {
    loop {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => {
          info!("Interrupted, shutting down");
          break;
        }
        event = events.next() => {
          let Some(event) = event else { break };
          if let Some(outcome) = self.handle_event(event).await? {
            on_sync(self, &outcome);
          }
        }
      }
    }
    Ok(())
  }

  pub fn pending(&self) -> Result<Vec<PendingEntry>> {
    self.queue.drain_all()
  }

  pub fn cache_status(&self) -> Result<CacheStatus> {
    Ok(CacheStatus {
      generation: self.lifecycle.generation().clone(),
      state: self.lifecycle.state(),
      caches: self.storage.cache_names()?,
    })
  }

  /// Reinstall the current generation and prune the others.
  pub async fn refresh_cache(&mut self) -> Result<Vec<String>> {
    self.lifecycle.install(self.transport.as_ref()).await?;
    self.lifecycle.activate()
  }

  pub fn controller(&self) -> &TransactionController<F> {
    &self.controller
  }

  pub fn connectivity(&self) -> &Connectivity {
    &self.connectivity
  }

  pub fn config(&self) -> &Config {
    &self.config
  }
}
