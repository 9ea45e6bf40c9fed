//! Edge cache and offline write queue.
//!
//! Reads are answered from a versioned local cache according to their
//! resource class. Writes that cannot reach the server are persisted and
//! replayed in order once connectivity returns.

pub mod cache;
pub mod config;
pub mod db;
pub mod edge;
pub mod http;
pub mod logging;
pub mod notify;
pub mod queue;

pub use edge::{EdgeCache, FetchError};
