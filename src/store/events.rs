use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Name of the generic change event.
pub const DATA_UPDATED: &str = "data-updated";

/// Store events
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
  /// A collection has a new value, written here or in another context
  DataUpdated { key: String, data: Vec<Value> },
  /// A record was appended to a collection that announces additions
  ItemAdded { event: String, record: Value },
}

impl StoreEvent {
  pub fn name(&self) -> &str {
    match self {
      StoreEvent::DataUpdated { .. } => DATA_UPDATED,
      StoreEvent::ItemAdded { event, .. } => event,
    }
  }

  /// Payload as delivered to listeners: `{key, data}` or the added record.
  pub fn payload(&self) -> Value {
    match self {
      StoreEvent::DataUpdated { key, data } => json!({ "key": key, "data": data }),
      StoreEvent::ItemAdded { record, .. } => record.clone(),
    }
  }
}

/// Typed channel the store publishes on.
///
/// Sending happens synchronously inside the write call, so a subscriber in
/// the same context sees the event queued as soon as the write returns.
#[derive(Clone)]
pub struct EventBus {
  tx: broadcast::Sender<StoreEvent>,
}

impl Default for EventBus {
  fn default() -> Self {
    Self::new(256)
  }
}

impl EventBus {
  pub fn new(capacity: usize) -> Self {
    let (tx, _rx) = broadcast::channel(capacity);
    Self { tx }
  }

  pub fn emit(&self, event: StoreEvent) {
    if self.tx.send(event).is_err() {
      debug!("store event with no subscribers");
    }
  }

  /// Subscribe without recovery: events overwritten while lagging are lost.
  pub fn subscribe(&self) -> Subscription {
    Subscription {
      rx: self.tx.subscribe(),
      resync: None,
      pending: VecDeque::new(),
    }
  }

  /// Subscribe with a snapshot source used to catch up after lagging.
  ///
  /// When the subscriber falls more than the channel capacity behind, the
  /// events produced by `resync` are delivered before the ones still queued.
  pub fn subscribe_with_resync<F>(&self, resync: F) -> Subscription
  where
    F: Fn() -> Vec<StoreEvent> + Send + Sync + 'static,
  {
    Subscription {
      rx: self.tx.subscribe(),
      resync: Some(Arc::new(resync)),
      pending: VecDeque::new(),
    }
  }
}

type Resync = Arc<dyn Fn() -> Vec<StoreEvent> + Send + Sync>;

/// Receiving end handed to one consumer.
pub struct Subscription {
  rx: broadcast::Receiver<StoreEvent>,
  resync: Option<Resync>,
  pending: VecDeque<StoreEvent>,
}

impl Subscription {
  /// Receive the next event. `None` once the bus is gone.
  pub async fn next(&mut self) -> Option<StoreEvent> {
    loop {
      if let Some(event) = self.pending.pop_front() {
        return Some(event);
      }
      match self.rx.recv().await {
        Ok(event) => return Some(event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => self.catch_up(skipped),
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }

  /// Take an already queued event without waiting.
  pub fn try_next(&mut self) -> Option<StoreEvent> {
    loop {
      if let Some(event) = self.pending.pop_front() {
        return Some(event);
      }
      match self.rx.try_recv() {
        Ok(event) => return Some(event),
        Err(broadcast::error::TryRecvError::Lagged(skipped)) => self.catch_up(skipped),
        Err(_) => return None,
      }
    }
  }

  fn catch_up(&mut self, skipped: u64) {
    match &self.resync {
      Some(resync) => {
        debug!(skipped, "subscriber lagged, resynchronizing");
        self.pending.extend(resync());
      }
      None => warn!(skipped, "subscriber lagged, events dropped"),
    }
  }
}
