//! Process-wide online/offline flag.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// A change of connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
  /// offline -> online
  Online,
  /// online -> offline
  Offline,
}

/// Shared connectivity state. Clones observe and update the same flag.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record the latest observation. Returns the transition if the flag
  /// actually changed.
  pub fn set(&self, online: bool) -> Option<Transition> {
    let was_online = self.tx.send_replace(online);
    match (was_online, online) {
      (false, true) => {
        info!("Connectivity restored");
        Some(Transition::Online)
      }
      (true, false) => {
        info!("Connectivity lost");
        Some(Transition::Offline)
      }
      _ => None,
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transitions_only_on_change() {
    let connectivity = Connectivity::new(true);
    assert_eq!(connectivity.set(true), None);
    assert_eq!(connectivity.set(false), Some(Transition::Offline));
    assert_eq!(connectivity.set(false), None);
    assert_eq!(connectivity.set(true), Some(Transition::Online));
    assert!(connectivity.is_online());
  }

  #[test]
  fn test_clones_share_state() {
    let connectivity = Connectivity::new(true);
    let other = connectivity.clone();
    let rx = connectivity.subscribe();

    other.set(false);
    assert!(!connectivity.is_online());
    assert!(!*rx.borrow());
  }
}
