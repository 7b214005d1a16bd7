//! The request cache engine: install, activate, fetch, message, sync and push hooks.

use color_eyre::{eyre::eyre, Result};
use futures::future::{try_join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

use super::network::Network;
use super::request::{classify, Request};
use super::storage::CacheStorage;
use super::strategy::{Served, Strategy, StrategyContext};
use crate::config::CacheConfig;

/// Tag that triggers reconciliation of locally queued mutations.
pub const SYNC_TAG: &str = "background-sync";

/// Lifecycle position of one engine version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  Activated,
  /// Failed to install, or replaced by a newer version
  Redundant,
}

/// Inbound commands from application contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  SkipWaiting,
  CacheInvalidate,
}

/// Result of the fetch hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
  /// The engine does not handle this request; the host performs it as usual
  Passthrough,
  Served(Served),
}

/// Reconciles locally queued mutations with the remote system.
pub trait Reconciler: Send + Sync {
  fn reconcile(&self) -> BoxFuture<'_, Result<()>>;
}

/// Placeholder reconciler: nothing is queued yet, so there is nothing to send.
pub struct LoggingReconciler;

impl Reconciler for LoggingReconciler {
  fn reconcile(&self) -> BoxFuture<'_, Result<()>> {
    Box::pin(async {
      info!("background sync triggered, no queued mutations to reconcile");
      Ok(())
    })
  }
}

/// A notification to show for an incoming push message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
}

/// Displays push notifications.
pub trait Notifier: Send + Sync {
  fn notify(&self, notification: &PushNotification) -> Result<()>;
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn notify(&self, notification: &PushNotification) -> Result<()> {
    info!(title = %notification.title, body = %notification.body, "push notification");
    Ok(())
  }
}

#[derive(Deserialize)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
}

const DEFAULT_PUSH_BODY: &str = "Você tem uma nova notificação";
const NOTIFICATION_ICON: &str = "/icons/icon-192x192.png";
const NOTIFICATION_BADGE: &str = "/icons/icon-72x72.png";

/// One deployed version of the engine.
///
/// The engine sits between the application and the network. Which
/// [`Strategy`] runs for a request depends on its class; copies of good
/// responses land in the version's static or dynamic namespace.
pub struct CacheEngine<N: Network, S: CacheStorage> {
  config: CacheConfig,
  origin: Url,
  root_key: String,
  network: Arc<N>,
  storage: Arc<S>,
  reconciler: Arc<dyn Reconciler>,
  notifier: Arc<dyn Notifier>,
  app_name: String,
  state: WorkerState,
  skip_waiting: bool,
  controlling: bool,
}

impl<N: Network, S: CacheStorage> CacheEngine<N, S> {
  pub fn new(config: CacheConfig, network: Arc<N>, storage: Arc<S>) -> Result<Self> {
    let origin = config.origin_url()?;
    let root_key = Request::get(config.resolve(&config.root_document)?).cache_key();

    Ok(Self {
      config,
      origin,
      root_key,
      network,
      storage,
      reconciler: Arc::new(LoggingReconciler),
      notifier: Arc::new(LogNotifier),
      app_name: "Salão".to_string(),
      state: WorkerState::Parsed,
      skip_waiting: false,
      controlling: false,
    })
  }

  pub fn with_reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
    self.reconciler = reconciler;
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
    self.app_name = app_name.into();
    self
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn version(&self) -> &str {
    &self.config.version
  }

  /// Whether activation was requested without waiting for old contexts.
  pub fn skip_waiting_requested(&self) -> bool {
    self.skip_waiting
  }

  /// Whether this version controls the open contexts.
  pub fn is_controlling(&self) -> bool {
    self.controlling
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn skip_waiting(&mut self) {
    self.skip_waiting = true;
  }

  pub(crate) fn retire(&mut self) {
    self.state = WorkerState::Redundant;
    self.controlling = false;
  }

  /// Precache the shell. Every asset must fetch successfully or nothing is stored.
  pub async fn install(&mut self) -> Result<()> {
    self.state = WorkerState::Installing;
    info!(version = %self.config.version, assets = self.config.shell_assets.len(), "installing");

    match self.precache().await {
      Ok(()) => {
        self.state = WorkerState::Installed;
        if self.config.skip_waiting_on_install {
          self.skip_waiting();
        }
        info!(version = %self.config.version, "installed");
        Ok(())
      }
      Err(e) => {
        self.state = WorkerState::Redundant;
        error!(version = %self.config.version, error = %e, "install failed");
        Err(e)
      }
    }
  }

  async fn precache(&self) -> Result<()> {
    let requests = self
      .config
      .shell_assets
      .iter()
      .map(|path| self.config.resolve(path).map(Request::get))
      .collect::<Result<Vec<_>>>()?;

    let network = self.network.as_ref();
    let responses = try_join_all(requests.iter().map(|req| async move {
      let response = network.fetch(req).await?;
      if !response.is_success() {
        return Err(eyre!(
          "Shell asset {} returned status {}",
          req.url,
          response.status
        ));
      }
      Ok::<_, color_eyre::Report>((req.cache_key(), response))
    }))
    .await?;

    self
      .storage
      .put_all(&self.config.static_namespace(), &responses)
  }

  /// Purge every namespace that is not current, then take control.
  ///
  /// Returns the names of the deleted namespaces.
  pub fn activate(&mut self) -> Result<Vec<String>> {
    self.state = WorkerState::Activating;

    let keep = [
      self.config.static_namespace(),
      self.config.dynamic_namespace(),
    ];
    let mut deleted = Vec::new();
    for name in self.storage.namespaces()? {
      if !keep.contains(&name) {
        debug!(namespace = %name, "deleting stale cache");
        self.storage.delete(&name)?;
        deleted.push(name);
      }
    }

    self.state = WorkerState::Activated;
    self.controlling = true;
    info!(version = %self.config.version, purged = deleted.len(), "activated");

    Ok(deleted)
  }

  /// Answer an intercepted request.
  ///
  /// Navigation requests always settle to a response. A static asset that is
  /// neither cached nor reachable yields an `Err`.
  pub async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
    if !request.is_get() || request.is_extension() {
      return Ok(FetchOutcome::Passthrough);
    }

    let class = classify(request, &self.origin);
    let strategy = Strategy::for_class(class);
    let namespace = match strategy {
      Strategy::CacheFirst => self.config.static_namespace(),
      Strategy::NetworkFirst | Strategy::NetworkFirstWithShellFallback => {
        self.config.dynamic_namespace()
      }
    };
    debug!(url = %request.url, ?class, ?strategy, "fetch");

    let ctx = StrategyContext {
      network: self.network.as_ref(),
      storage: self.storage.as_ref(),
      namespace: &namespace,
      root_key: &self.root_key,
    };
    ctx.run(strategy, request).await.map(FetchOutcome::Served)
  }

  /// Drop every runtime response. The static shell stays.
  pub fn invalidate(&self) -> Result<bool> {
    let namespace = self.config.dynamic_namespace();
    let deleted = self.storage.delete(&namespace)?;
    info!(namespace = %namespace, deleted, "dynamic cache invalidated");
    Ok(deleted)
  }

  pub async fn sync(&self, tag: &str) -> Result<()> {
    if tag != SYNC_TAG {
      debug!(tag, "ignoring unknown sync tag");
      return Ok(());
    }
    self.reconciler.reconcile().await
  }

  /// Turn a push payload into a notification and show it.
  pub fn push(&self, payload: Option<&[u8]>) -> Result<PushNotification> {
    let (title, body) = match payload {
      None => (None, None),
      Some(bytes) => match serde_json::from_slice::<PushPayload>(bytes) {
        Ok(p) => (p.title, p.body),
        Err(_) => {
          let text = String::from_utf8_lossy(bytes).trim().to_string();
          (None, (!text.is_empty()).then_some(text))
        }
      },
    };

    let notification = PushNotification {
      title: title.unwrap_or_else(|| self.app_name.clone()),
      body: body.unwrap_or_else(|| DEFAULT_PUSH_BODY.to_string()),
      icon: NOTIFICATION_ICON.to_string(),
      badge: NOTIFICATION_BADGE.to_string(),
    };

    if let Err(e) = self.notifier.notify(&notification) {
      warn!(error = %e, "failed to show notification");
    }
    Ok(notification)
  }
}

impl ControlMessage {
  /// Parse a message posted by an application context.
  pub fn parse(raw: &str) -> Result<Self> {
    serde_json::from_str(raw).map_err(|e| eyre!("Unrecognized control message {}: {}", raw, e))
  }
}
