//! In-process network double for engine tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::network::Network;
use super::request::{Request, Response};

/// Answers from a fixed table; unknown URLs behave like a dropped connection.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Response>>,
  calls: Mutex<HashMap<String, usize>>,
  offline: AtomicBool,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Response::new(status, vec![], body));
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self, url: &str) -> usize {
    self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
  }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.to_string();
    *self.calls.lock().unwrap().entry(url.clone()).or_insert(0) += 1;

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Network unreachable: {}", url));
    }

    self
      .routes
      .lock()
      .unwrap()
      .get(&url)
      .cloned()
      .ok_or_else(|| eyre!("Connection refused: {}", url))
  }
}
