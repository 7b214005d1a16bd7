//! Offline request cache.
//!
//! This module sits between the application and the network and:
//! - Precaches the application shell when a version is installed
//! - Purges caches of older versions on activation
//! - Serves static assets cache-first and everything else network-first
//! - Falls back to the cached shell for navigations when offline

mod engine;
mod lifecycle;
mod network;
mod request;
mod storage;
mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{
  CacheEngine, ControlMessage, FetchOutcome, LogNotifier, LoggingReconciler, Notifier,
  PushNotification, Reconciler, WorkerState, SYNC_TAG,
};
pub use lifecycle::Registration;
pub use network::{HttpNetwork, Network};
pub use request::{classify, Destination, Request, RequestClass, RequestMode, Response};
pub use storage::{CacheStorage, CachedResponse, MemoryCacheStorage, SqliteCacheStorage};
pub use strategy::{ResponseSource, Served, Strategy};
