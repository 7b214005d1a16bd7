//! Collections of JSON records persisted in a shared storage area.

use color_eyre::{eyre::eyre, Result};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::area::{ContextId, StorageArea, StorageChange};
use super::events::{EventBus, StoreEvent, Subscription};
use super::schema::SchemaRegistry;

/// One context's view of the record store.
///
/// Every write replaces the whole collection and then emits
/// [`StoreEvent::DataUpdated`] on this store's bus before returning. After
/// [`RecordStore::init`], writes made by other contexts on the same
/// [`StorageArea`] are republished on the same bus with the same event.
///
/// Read-modify-write operations are not atomic across contexts: the last
/// writer wins.
pub struct RecordStore {
  context: ContextId,
  area: Arc<StorageArea>,
  schemas: Arc<SchemaRegistry>,
  events: EventBus,
  listener: Option<JoinHandle<()>>,
}

impl RecordStore {
  pub fn new(area: Arc<StorageArea>, schemas: SchemaRegistry) -> Self {
    Self {
      context: ContextId::next(),
      area,
      schemas: Arc::new(schemas),
      events: EventBus::default(),
      listener: None,
    }
  }

  pub fn context(&self) -> ContextId {
    self.context
  }

  pub fn schemas(&self) -> &SchemaRegistry {
    &self.schemas
  }

  /// Subscribe to this context's events.
  ///
  /// A subscriber that falls behind receives a `data-updated` snapshot of
  /// every recognized collection instead of losing changes.
  pub fn subscribe(&self) -> Subscription {
    let area = Arc::clone(&self.area);
    let schemas = Arc::clone(&self.schemas);
    self
      .events
      .subscribe_with_resync(move || snapshot(&area, &schemas))
  }

  /// Start listening for changes made by other contexts.
  ///
  /// Must be called inside a tokio runtime. Calling it twice is a no-op.
  pub fn init(&mut self) -> Result<()> {
    if self.listener.is_some() {
      return Ok(());
    }

    let handle = tokio::runtime::Handle::try_current()
      .map_err(|e| eyre!("Record store needs a tokio runtime: {}", e))?;

    let mut changes = self.area.subscribe();
    let area = Arc::clone(&self.area);
    let context = self.context;
    let schemas = Arc::clone(&self.schemas);
    let events = self.events.clone();

    self.listener = Some(handle.spawn(async move {
      loop {
        match changes.recv().await {
          Ok(change) => republish(context, &schemas, &events, change),
          Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
            // Overwritten changes are unrecoverable; republish current state instead
            warn!(%context, skipped, "missed storage changes, resynchronizing");
            for event in snapshot(&area, &schemas) {
              events.emit(event);
            }
          }
          Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
      }
    }));

    debug!(context = %self.context, "record store listening");
    Ok(())
  }

  /// Stop listening for other contexts' changes.
  pub fn dispose(&mut self) {
    if let Some(listener) = self.listener.take() {
      listener.abort();
      debug!(context = %self.context, "record store disposed");
    }
  }

  /// Read a collection. Missing, unreadable or malformed values read as empty.
  pub fn get(&self, key: &str) -> Vec<Value> {
    match self.area.get_item(key) {
      Ok(raw) => parse_collection(key, raw.as_deref()),
      Err(e) => {
        warn!(key, error = %e, "failed to read collection");
        Vec::new()
      }
    }
  }

  /// Replace a collection and announce it.
  ///
  /// On failure nothing is announced and the previous value stays in place.
  pub fn set(&self, key: &str, data: &[Value]) -> Result<()> {
    let serialized = serde_json::to_string(data).map_err(|e| {
      error!(key, error = %e, "failed to serialize collection");
      eyre!("Failed to serialize {}: {}", key, e)
    })?;

    self
      .area
      .set_item(key, &serialized, self.context)
      .map_err(|e| {
        error!(key, error = %e, "failed to persist collection");
        e
      })?;

    self.events.emit(StoreEvent::DataUpdated {
      key: key.to_string(),
      data: data.to_vec(),
    });
    Ok(())
  }

  /// Append a record. Uniqueness of its identity is the caller's concern.
  pub fn add(&self, key: &str, record: Value) -> Result<()> {
    let mut data = self.get(key);
    data.push(record.clone());
    self.set(key, &data)?;

    if let Some(event) = self.schemas.added_event(key) {
      self.events.emit(StoreEvent::ItemAdded {
        event: event.to_string(),
        record,
      });
    }
    Ok(())
  }

  /// Shallow-merge `patch` into the record with identity `id`.
  ///
  /// The collection is written back and announced even when no record
  /// matched.
  pub fn update(&self, key: &str, id: &str, patch: &Map<String, Value>) -> Result<()> {
    let identity = self.schemas.identity_field(key);
    let mut data = self.get(key);

    for record in data.iter_mut() {
      if has_identity(record, identity, id) {
        if let Value::Object(fields) = record {
          for (field, value) in patch {
            fields.insert(field.clone(), value.clone());
          }
        }
      }
    }

    self.set(key, &data)
  }

  /// Drop the record with identity `id`.
  pub fn remove(&self, key: &str, id: &str) -> Result<()> {
    let identity = self.schemas.identity_field(key);
    let data: Vec<Value> = self
      .get(key)
      .into_iter()
      .filter(|record| !has_identity(record, identity, id))
      .collect();

    self.set(key, &data)
  }

  /// Forget a collection entirely. Announced as an empty collection.
  pub fn clear(&self, key: &str) -> Result<()> {
    self
      .area
      .remove_item(key, self.context)
      .map_err(|e| {
        error!(key, error = %e, "failed to clear collection");
        e
      })?;

    self.events.emit(StoreEvent::DataUpdated {
      key: key.to_string(),
      data: Vec::new(),
    });
    Ok(())
  }

  /// Find one record by identity.
  pub fn find(&self, key: &str, id: &str) -> Option<Value> {
    let identity = self.schemas.identity_field(key);
    self
      .get(key)
      .into_iter()
      .find(|record| has_identity(record, identity, id))
  }
}

impl Drop for RecordStore {
  fn drop(&mut self) {
    self.dispose();
  }
}

fn republish(context: ContextId, schemas: &SchemaRegistry, events: &EventBus, change: StorageChange) {
  // The writing context already announced its own change
  if change.origin == context || !schemas.is_recognized(&change.key) {
    return;
  }

  let data = parse_collection(&change.key, change.new_value.as_deref());
  debug!(%context, key = %change.key, from = %change.origin, "change from another context");
  events.emit(StoreEvent::DataUpdated {
    key: change.key,
    data,
  });
}

/// Current value of every recognized collection, as `data-updated` events.
fn snapshot(area: &StorageArea, schemas: &SchemaRegistry) -> Vec<StoreEvent> {
  schemas
    .keys()
    .filter_map(|key| match area.get_item(key) {
      Ok(raw) => Some(StoreEvent::DataUpdated {
        key: key.to_string(),
        data: parse_collection(key, raw.as_deref()),
      }),
      Err(e) => {
        warn!(key, error = %e, "failed to read collection during resync");
        None
      }
    })
    .collect()
}

fn parse_collection(key: &str, raw: Option<&str>) -> Vec<Value> {
  let Some(raw) = raw else {
    return Vec::new();
  };

  match serde_json::from_str::<Vec<Value>>(raw) {
    Ok(data) => data,
    Err(e) => {
      warn!(key, error = %e, "malformed collection, reading as empty");
      Vec::new()
    }
  }
}

/// Whether `record[identity]` equals `id`. Numeric identities compare by value,
/// so `7`, `7.0` and `"7"` all match.
fn has_identity(record: &Value, identity: &str, id: &str) -> bool {
  match record.get(identity) {
    Some(Value::String(s)) => s == id,
    Some(Value::Number(n)) => numeric_identity_matches(n, id),
    _ => false,
  }
}

fn numeric_identity_matches(n: &serde_json::Number, id: &str) -> bool {
  if let (Some(a), Ok(b)) = (n.as_i64(), id.parse::<i64>()) {
    return a == b;
  }
  if let (Some(a), Ok(b)) = (n.as_u64(), id.parse::<u64>()) {
    return a == b;
  }
  match (n.as_f64(), id.parse::<f64>()) {
    (Some(a), Ok(b)) => a == b,
    _ => n.to_string() == id,
  }
}
