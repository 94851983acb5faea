use crate::api::http::{Fetch, Request};
use crate::sync::{Connectivity, Transition};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// Application events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
  /// Connectivity changed between two probes
  Connectivity(Transition),
  /// Probe completed without a change
  Tick,
}

/// Probe the server once. Any answer counts as online.
pub async fn probe<F: Fetch>(transport: &F, request: &Request) -> bool {
  match transport.fetch(request).await {
    Ok(response) => {
      trace!(status = response.status, "Probe answered");
      true
    }
    Err(e) => {
      trace!(error = %e, "Probe failed");
      false
    }
  }
}

/// Event handler that turns periodic connectivity probes into events
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Spawn the probe loop. The first probe runs after one `tick_rate`.
  pub fn new<F: Fetch + 'static>(
    transport: Arc<F>,
    probe_request: Request,
    connectivity: Connectivity,
    tick_rate: Duration,
  ) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      // the first tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        let online = probe(transport.as_ref(), &probe_request).await;
        let event = match connectivity.set(online) {
          Some(transition) => Event::Connectivity(transition),
          None => Event::Tick,
        };
        if tx.send(event).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::FakeServer;

  #[tokio::test]
  async fn test_emits_transitions() {
    let server = FakeServer::new();
    let connectivity = Connectivity::new(true);
    let mut events = EventHandler::new(
      Arc::new(server.clone()),
      Request::get(server.url("/")),
      connectivity.clone(),
      Duration::from_millis(5),
    );

    assert_eq!(events.next().await, Some(Event::Tick));

    server.set_online(false);
    loop {
      match events.next().await {
        Some(Event::Connectivity(t)) => {
          assert_eq!(t, Transition::Offline);
          break;
        }
        Some(Event::Tick) => continue,
        None => panic!("event channel closed"),
      }
    }
    assert!(!connectivity.is_online());

    server.set_online(true);
    loop {
      if let Some(Event::Connectivity(t)) = events.next().await {
        assert_eq!(t, Transition::Online);
        break;
      }
    }
  }

  #[tokio::test]
  async fn test_probe_counts_any_status_as_online() {
    let server = FakeServer::new();
    // no asset registered: 404
    assert!(probe(&server, &Request::get(server.url("/missing"))).await);
    server.set_online(false);
    assert!(!probe(&server, &Request::get(server.url("/missing"))).await);
  }
}
