//! Connectivity tracking and pending-write reconciliation.

pub mod connectivity;
pub mod reconciler;

pub use connectivity::{Connectivity, Transition};
pub use reconciler::{batch_fingerprint, Reconciler, SyncOutcome, SyncState, SyncTrigger};
