//! Cache-vs-network ordering policies.

use color_eyre::Result;
use tracing::{debug, warn};

use super::network::Network;
use super::request::{Request, RequestClass, Response};
use super::storage::CacheStorage;

/// Policy applied to one class of request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
  NetworkFirstWithShellFallback,
}

impl Strategy {
  pub fn for_class(class: RequestClass) -> Self {
    match class {
      RequestClass::StaticAsset => Self::CacheFirst,
      RequestClass::ApiOrCrossOrigin => Self::NetworkFirst,
      RequestClass::Document | RequestClass::Other => Self::NetworkFirstWithShellFallback,
    }
  }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live response from the network
  Network,
  /// Stored entry for this exact request
  Cache,
  /// Cached root document served in place of a failed navigation
  ShellFallback,
  /// Placeholder built by the engine, neither network nor cache could answer
  Synthesized,
}

/// A response handed back to the host, with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
}

impl Served {
  fn new(response: Response, source: ResponseSource) -> Self {
    Self { response, source }
  }
}

/// What a strategy needs to run one request.
pub struct StrategyContext<'a, N, S> {
  pub network: &'a N,
  pub storage: &'a S,
  /// Namespace that receives copies of successful responses
  pub namespace: &'a str,
  /// Cache key of the application shell's root document
  pub root_key: &'a str,
}

impl<N: Network, S: CacheStorage> StrategyContext<'_, N, S> {
  pub async fn run(&self, strategy: Strategy, request: &Request) -> Result<Served> {
    match strategy {
      Strategy::CacheFirst => self.cache_first(request).await,
      Strategy::NetworkFirst => Ok(self.network_first(request, false).await),
      Strategy::NetworkFirstWithShellFallback => Ok(self.network_first(request, true).await),
    }
  }

  /// Serve from cache when possible, otherwise fetch and keep a copy.
  ///
  /// A network failure on a miss propagates unless the request is a
  /// navigation, which always settles to a response.
  async fn cache_first(&self, request: &Request) -> Result<Served> {
    let key = request.cache_key();
    if let Some(cached) = self.lookup(&key) {
      debug!(key = %key, "cache hit");
      return Ok(Served::new(cached, ResponseSource::Cache));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(&key, &response);
        Ok(Served::new(response, ResponseSource::Network))
      }
      Err(e) if request.is_navigation() => {
        warn!(url = %request.url, error = %e, "navigation failed, serving shell");
        Ok(self.shell_or_offline())
      }
      Err(e) => Err(e),
    }
  }

  /// Always try the network; on failure fall back to the stored entry.
  async fn network_first(&self, request: &Request, shell_fallback: bool) -> Served {
    let key = request.cache_key();
    match self.network.fetch(request).await {
      Ok(response) => {
        self.store(&key, &response);
        Served::new(response, ResponseSource::Network)
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "network failed, trying cache");
        if let Some(cached) = self.lookup(&key) {
          return Served::new(cached, ResponseSource::Cache);
        }
        if shell_fallback && request.is_navigation() {
          return self.shell_or_offline();
        }
        Served::new(Response::offline(false), ResponseSource::Synthesized)
      }
    }
  }

  fn shell_or_offline(&self) -> Served {
    match self.lookup(self.root_key) {
      Some(shell) => Served::new(shell, ResponseSource::ShellFallback),
      None => Served::new(Response::offline(true), ResponseSource::Synthesized),
    }
  }

  /// Cache read that degrades to a miss on storage errors.
  fn lookup(&self, key: &str) -> Option<Response> {
    match self.storage.lookup_any(key) {
      Ok(hit) => hit.map(|c| c.response),
      Err(e) => {
        warn!(key = %key, error = %e, "cache lookup failed");
        None
      }
    }
  }

  /// Keep a copy of a successful response. Failures are logged, never surfaced.
  fn store(&self, key: &str, response: &Response) {
    if !response.is_success() {
      return;
    }
    if let Err(e) = self.storage.put(self.namespace, key, response) {
      warn!(key = %key, namespace = self.namespace, error = %e, "failed to cache response");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::request::{Destination, RequestClass};
  use crate::cache::storage::MemoryCacheStorage;
  use crate::cache::testing::FakeNetwork;
  use url::Url;

  const ROOT: &str = "GET https://salao.example/";

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn ctx<'a>(
    network: &'a FakeNetwork,
    storage: &'a MemoryCacheStorage,
    namespace: &'a str,
  ) -> StrategyContext<'a, FakeNetwork, MemoryCacheStorage> {
    StrategyContext {
      network,
      storage,
      namespace,
      root_key: ROOT,
    }
  }

  #[test]
  fn test_strategy_per_class() {
    assert_eq!(Strategy::for_class(RequestClass::StaticAsset), Strategy::CacheFirst);
    assert_eq!(Strategy::for_class(RequestClass::ApiOrCrossOrigin), Strategy::NetworkFirst);
    assert_eq!(
      Strategy::for_class(RequestClass::Document),
      Strategy::NetworkFirstWithShellFallback
    );
    assert_eq!(
      Strategy::for_class(RequestClass::Other),
      Strategy::NetworkFirstWithShellFallback
    );
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_network() {
    let network = FakeNetwork::new();
    network.respond("https://salao.example/assets/app.js", 200, "v1");
    let storage = MemoryCacheStorage::new();
    let ctx = ctx(&network, &storage, "static");
    let req = Request::get(url("https://salao.example/assets/app.js"))
      .with_destination(Destination::Script);

    let first = ctx.run(Strategy::CacheFirst, &req).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);

    network.respond("https://salao.example/assets/app.js", 200, "v2");
    for _ in 0..3 {
      let again = ctx.run(Strategy::CacheFirst, &req).await.unwrap();
      assert_eq!(again.source, ResponseSource::Cache);
      assert_eq!(again.response.body, first.response.body);
    }
    assert_eq!(network.calls("https://salao.example/assets/app.js"), 1);
  }

  #[tokio::test]
  async fn test_cache_first_miss_failure_propagates() {
    let network = FakeNetwork::new();
    let storage = MemoryCacheStorage::new();
    let ctx = ctx(&network, &storage, "static");
    let req = Request::get(url("https://salao.example/assets/app.css"))
      .with_destination(Destination::Style);

    assert!(ctx.run(Strategy::CacheFirst, &req).await.is_err());
  }

  #[tokio::test]
  async fn test_cache_first_navigation_falls_back_to_shell() {
    let network = FakeNetwork::new();
    let storage = MemoryCacheStorage::new();
    let ctx = ctx(&network, &storage, "static");
    let req = Request::navigate(url("https://salao.example/assets/ajuda.html"));

    let served = ctx.run(Strategy::CacheFirst, &req).await.unwrap();
    assert_eq!(served.source, ResponseSource::Synthesized);
    assert_eq!(served.response.status, 503);

    storage
      .put("static", ROOT, &Response::new(200, vec![], "<html>shell</html>"))
      .unwrap();
    let served = ctx.run(Strategy::CacheFirst, &req).await.unwrap();
    assert_eq!(served.source, ResponseSource::ShellFallback);
    assert_eq!(served.response.body, b"<html>shell</html>");
  }

  #[tokio::test]
  async fn test_cache_first_does_not_admit_errors() {
    let network = FakeNetwork::new();
    network.respond("https://salao.example/icons/missing.png", 404, "nope");
    let storage = MemoryCacheStorage::new();
    let ctx = ctx(&network, &storage, "static");
    let req = Request::get(url("https://salao.example/icons/missing.png"));

    let served = ctx.run(Strategy::CacheFirst, &req).await.unwrap();
    assert_eq!(served.response.status, 404);
    assert!(storage.lookup_any(&req.cache_key()).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_network_first_updates_cache() {
    let network = FakeNetwork::new();
    network.respond("https://salao.example/api/servicos", 200, "[1]");
    let storage = MemoryCacheStorage::new();
    let ctx = ctx(&network, &storage, "dynamic");
    let req = Request::get(url("https://salao.example/api/servicos"));

    storage
      .put("dynamic", &req.cache_key(), &Response::new(200, vec![], "[0]"))
      .unwrap();

    let served = ctx.run(Strategy::NetworkFirst, &req).await.unwrap();
    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.body, b"[1]");

    let cached = storage.lookup("dynamic", &req.cache_key()).unwrap().unwrap();
    assert_eq!(cached.response.body, b"[1]");
  }

  #[tokio::test]
  async fn test_network_first_falls_back() {
    let network = FakeNetwork::new();
    let storage = MemoryCacheStorage::new();
    let ctx = ctx(&network, &storage, "dynamic");
    let req = Request::get(url("https://salao.example/api/servicos"));

    let served = ctx.run(Strategy::NetworkFirst, &req).await.unwrap();
    assert_eq!(served.source, ResponseSource::Synthesized);
    assert_eq!(served.response.status, 503);

    storage
      .put("dynamic", &req.cache_key(), &Response::new(200, vec![], "[0]"))
      .unwrap();
    let served = ctx.run(Strategy::NetworkFirst, &req).await.unwrap();
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"[0]");
  }

  #[tokio::test]
  async fn test_shell_fallback_only_for_navigation() {
    let network = FakeNetwork::new();
    let storage = MemoryCacheStorage::new();
    storage
      .put("static", ROOT, &Response::new(200, vec![], "<html>shell</html>"))
      .unwrap();
    let ctx = ctx(&network, &storage, "dynamic");

    let nav = Request::navigate(url("https://salao.example/clientes"));
    let served = ctx
      .run(Strategy::NetworkFirstWithShellFallback, &nav)
      .await
      .unwrap();
    assert_eq!(served.source, ResponseSource::ShellFallback);

    let plain = Request::get(url("https://salao.example/robots.txt"));
    let served = ctx
      .run(Strategy::NetworkFirstWithShellFallback, &plain)
      .await
      .unwrap();
    assert_eq!(served.source, ResponseSource::Synthesized);
    assert_eq!(served.response.header("content-type"), Some("text/plain; charset=utf-8"));
  }

  #[tokio::test]
  async fn test_navigation_without_cache_settles_with_error_status() {
    let network = FakeNetwork::new();
    let storage = MemoryCacheStorage::new();
    let ctx = ctx(&network, &storage, "dynamic");
    let nav = Request::navigate(url("https://salao.example/financeiro"));

    let served = ctx
      .run(Strategy::NetworkFirstWithShellFallback, &nav)
      .await
      .unwrap();
    assert!(!served.response.is_success());
    assert_eq!(served.response.header("content-type"), Some("text/html; charset=utf-8"));
  }
}
