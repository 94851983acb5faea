//! Offline-first budget client.
//!
//! Writes that cannot reach the server are kept in a durable pending queue
//! and pushed in bulk once connectivity returns. Reads go through a request
//! interceptor that serves cached responses when the network is down.

pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod db;
pub mod event;
pub mod report;
pub mod session;
pub mod sync;

#[cfg(test)]
mod testing;
