//! Registration: the host-side view of which engine version is active and which is waiting.

use color_eyre::Result;
use tracing::{debug, info, warn};

use super::engine::{CacheEngine, ControlMessage, FetchOutcome, PushNotification};
use super::network::Network;
use super::request::Request;
use super::storage::CacheStorage;

/// Holds the active engine and, at most, one installed engine waiting to take over.
pub struct Registration<N: Network, S: CacheStorage> {
  active: Option<CacheEngine<N, S>>,
  waiting: Option<CacheEngine<N, S>>,
}

impl<N: Network, S: CacheStorage> Default for Registration<N, S> {
  fn default() -> Self {
    Self {
      active: None,
      waiting: None,
    }
  }
}

impl<N: Network, S: CacheStorage> Registration<N, S> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Take control with a version installed by an earlier run.
  pub fn resume(engine: CacheEngine<N, S>) -> Result<Self> {
    let mut registration = Self::new();
    registration.promote(engine)?;
    Ok(registration)
  }

  pub fn active(&self) -> Option<&CacheEngine<N, S>> {
    self.active.as_ref()
  }

  pub fn waiting(&self) -> Option<&CacheEngine<N, S>> {
    self.waiting.as_ref()
  }

  /// Install a new version.
  ///
  /// A failed install leaves the active version and its caches untouched.
  /// A successful one activates immediately if the engine asked to skip
  /// waiting, otherwise it waits for a `SKIP_WAITING` message.
  pub async fn register(&mut self, mut engine: CacheEngine<N, S>) -> Result<()> {
    engine.install().await?;

    if engine.skip_waiting_requested() {
      self.promote(engine)?;
    } else {
      info!(version = engine.version(), "installed version is waiting");
      if let Some(mut previous) = self.waiting.replace(engine) {
        previous.retire();
      }
    }
    Ok(())
  }

  /// Activate `engine`. A version still waiting was installed before it, so
  /// it becomes redundant and can no longer be promoted over `engine`.
  fn promote(&mut self, mut engine: CacheEngine<N, S>) -> Result<()> {
    engine.activate()?;
    if let Some(mut stale) = self.waiting.take() {
      debug!(version = stale.version(), "discarding superseded waiting version");
      stale.retire();
    }
    if let Some(mut previous) = self.active.replace(engine) {
      debug!(version = previous.version(), "retiring previous version");
      previous.retire();
    }
    Ok(())
  }

  /// Route a request through the active version, if any.
  pub async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
    match &self.active {
      Some(engine) => engine.fetch(request).await,
      None => Ok(FetchOutcome::Passthrough),
    }
  }

  /// Handle a message posted by an application context. Unknown messages are ignored.
  pub fn message(&mut self, raw: &str) -> Result<()> {
    let message = match ControlMessage::parse(raw) {
      Ok(m) => m,
      Err(e) => {
        debug!(error = %e, "ignoring message");
        return Ok(());
      }
    };

    match message {
      ControlMessage::SkipWaiting => match self.waiting.take() {
        Some(mut engine) => {
          engine.skip_waiting();
          self.promote(engine)?;
        }
        None => debug!("SKIP_WAITING with no waiting version"),
      },
      ControlMessage::CacheInvalidate => match &self.active {
        Some(engine) => {
          engine.invalidate()?;
        }
        None => warn!("CACHE_INVALIDATE with no active version"),
      },
    }
    Ok(())
  }

  pub async fn sync(&self, tag: &str) -> Result<()> {
    match &self.active {
      Some(engine) => engine.sync(tag).await,
      None => Ok(()),
    }
  }

  pub fn push(&self, payload: Option<&[u8]>) -> Result<Option<PushNotification>> {
    self
      .active
      .as_ref()
      .map(|engine| engine.push(payload))
      .transpose()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::engine::WorkerState;
  use crate::cache::storage::MemoryCacheStorage;
  use crate::cache::testing::FakeNetwork;
  use crate::config::CacheConfig;
  use std::sync::Arc;
  use url::Url;

  struct Fixture {
    network: Arc<FakeNetwork>,
    storage: Arc<MemoryCacheStorage>,
  }

  impl Fixture {
    fn new() -> Self {
      let network = FakeNetwork::new();
      network.respond("https://salao.example/", 200, "<html>v1</html>");
      network.respond("https://salao.example/manifest.json", 200, "{}");
      Self {
        network: Arc::new(network),
        storage: Arc::new(MemoryCacheStorage::new()),
      }
    }

    fn engine(&self, version: &str, skip: bool) -> CacheEngine<FakeNetwork, MemoryCacheStorage> {
      let config = CacheConfig {
        version: version.to_string(),
        origin: "https://salao.example".to_string(),
        shell_assets: vec!["/".to_string(), "/manifest.json".to_string()],
        skip_waiting_on_install: skip,
        ..CacheConfig::default()
      };
      CacheEngine::new(config, self.network.clone(), self.storage.clone()).unwrap()
    }
  }

  #[tokio::test]
  async fn test_new_version_replaces_old() {
    let fx = Fixture::new();
    let mut reg = Registration::new();

    reg.register(fx.engine("v1", true)).await.unwrap();
    fx.storage
      .put("salao-dynamic-v1", "GET /x", &crate::cache::Response::new(200, vec![], "x"))
      .unwrap();

    reg.register(fx.engine("v2", true)).await.unwrap();

    let active = reg.active().unwrap();
    assert_eq!(active.version(), "v2");
    assert_eq!(active.state(), WorkerState::Activated);
    assert_eq!(fx.storage.namespaces().unwrap(), vec!["salao-static-v2"]);
  }

  #[tokio::test]
  async fn test_failed_install_keeps_previous_version() {
    let fx = Fixture::new();
    let mut reg = Registration::new();
    reg.register(fx.engine("v1", true)).await.unwrap();

    fx.network
      .respond("https://salao.example/manifest.json", 404, "gone");
    assert!(reg.register(fx.engine("v2", true)).await.is_err());

    let active = reg.active().unwrap();
    assert_eq!(active.version(), "v1");
    assert!(active.is_controlling());
    assert!(reg.waiting().is_none());
    assert_eq!(fx.storage.namespaces().unwrap(), vec!["salao-static-v1"]);
    let shell = fx
      .storage
      .lookup("salao-static-v1", "GET https://salao.example/")
      .unwrap()
      .unwrap();
    assert_eq!(shell.response.body, b"<html>v1</html>");
  }

  #[tokio::test]
  async fn test_skip_waiting_message_promotes_waiting_version() {
    let fx = Fixture::new();
    let mut reg = Registration::new();
    reg.register(fx.engine("v1", true)).await.unwrap();
    reg.register(fx.engine("v2", false)).await.unwrap();

    assert_eq!(reg.active().unwrap().version(), "v1");
    assert_eq!(reg.waiting().unwrap().state(), WorkerState::Installed);

    reg.message(r#"{"type":"SKIP_WAITING"}"#).unwrap();
    assert_eq!(reg.active().unwrap().version(), "v2");
    assert!(reg.waiting().is_none());
  }

  #[tokio::test]
  async fn test_newer_install_supersedes_waiting_version() {
    let fx = Fixture::new();
    let mut reg = Registration::new();
    reg.register(fx.engine("v1", true)).await.unwrap();
    reg.register(fx.engine("v2", false)).await.unwrap();
    reg.register(fx.engine("v3", true)).await.unwrap();

    assert_eq!(reg.active().unwrap().version(), "v3");
    assert!(reg.waiting().is_none());

    // Nothing left to promote: v3 stays active with its shell cache
    reg.message(r#"{"type":"SKIP_WAITING"}"#).unwrap();
    assert_eq!(reg.active().unwrap().version(), "v3");
    assert_eq!(fx.storage.namespaces().unwrap(), vec!["salao-static-v3"]);

    fx.network.set_offline(true);
    let nav = Request::navigate(Url::parse("https://salao.example/agenda").unwrap());
    match reg.fetch(&nav).await.unwrap() {
      FetchOutcome::Served(served) => {
        assert_eq!(served.response.status, 200);
        assert_eq!(served.response.body, b"<html>v1</html>");
      }
      FetchOutcome::Passthrough => panic!("navigation must be served"),
    }
  }

  #[tokio::test]
  async fn test_cache_invalidate_message() {
    let fx = Fixture::new();
    fx.network
      .respond("https://salao.example/api/agenda", 200, "[]");
    let mut reg = Registration::new();
    reg.register(fx.engine("v1", true)).await.unwrap();

    let req = Request::get(Url::parse("https://salao.example/api/agenda").unwrap());
    reg.fetch(&req).await.unwrap();
    assert!(fx
      .storage
      .namespaces()
      .unwrap()
      .contains(&"salao-dynamic-v1".to_string()));

    reg.message(r#"{"type":"CACHE_INVALIDATE"}"#).unwrap();
    reg.message("not json").unwrap();
    assert_eq!(fx.storage.namespaces().unwrap(), vec!["salao-static-v1"]);
  }

  #[tokio::test]
  async fn test_resume_takes_control_without_install() {
    let fx = Fixture::new();
    fx.network.set_offline(true);

    let reg = Registration::resume(fx.engine("v1", true)).unwrap();
    let active = reg.active().unwrap();
    assert_eq!(active.state(), WorkerState::Activated);
    assert_eq!(fx.network.calls("https://salao.example/"), 0);
  }

  #[tokio::test]
  async fn test_no_active_version_passes_through() {
    let reg: Registration<FakeNetwork, MemoryCacheStorage> = Registration::new();
    let req = Request::navigate(Url::parse("https://salao.example/").unwrap());
    assert_eq!(reg.fetch(&req).await.unwrap(), FetchOutcome::Passthrough);
    assert!(reg.push(None).unwrap().is_none());
  }
}
