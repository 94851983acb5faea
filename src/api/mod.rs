//! REST API client module for the budget backend.
//!
//! Requests are described by transport-neutral [`http::Request`] values and
//! sent through the cache interceptor. [`BudgetApi`] exposes the three
//! endpoints the client uses: listing, single write and bulk write.

pub mod client;
pub mod error;
pub mod http;
pub mod types;

pub use client::{BudgetApi, BULK_PATH, TRANSACTION_PATH};
pub use error::ApiError;
pub use http::{Fetch, HttpTransport, Request, Response};
pub use types::{EntryKind, Transaction, TransactionDraft};
