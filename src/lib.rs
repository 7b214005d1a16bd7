//! Offline layer of the salon manager: a request cache engine that keeps the
//! application usable without a network, and a local record store that keeps
//! every open context in sync.

pub mod cache;
pub mod config;
pub mod db;
pub mod logging;
pub mod models;
pub mod store;
