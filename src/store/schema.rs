//! Per-collection schema descriptors.

use std::collections::HashMap;

/// Identity field used by collections with no registered schema.
pub const DEFAULT_IDENTITY_FIELD: &str = "id";

/// How the store treats one persisted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
  pub key: String,
  /// Field that uniquely identifies a record
  pub identity_field: String,
  /// Event emitted after `add`, for collections that have one
  pub added_event: Option<String>,
  /// Version of the record layout stored under this key
  pub version: u32,
}

impl CollectionSchema {
  pub fn new(key: &str) -> Self {
    Self {
      key: key.to_string(),
      identity_field: DEFAULT_IDENTITY_FIELD.to_string(),
      added_event: None,
      version: 1,
    }
  }

  pub fn identity(mut self, field: &str) -> Self {
    self.identity_field = field.to_string();
    self
  }

  pub fn added_event(mut self, event: &str) -> Self {
    self.added_event = Some(event.to_string());
    self
  }

  pub fn version(mut self, version: u32) -> Self {
    self.version = version;
    self
  }
}

/// Schemas known to a store, supplied at construction.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
  schemas: HashMap<String, CollectionSchema>,
}

impl SchemaRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// The salon application's collections.
  pub fn salon() -> Self {
    Self::new()
      .with(CollectionSchema::new("usuario"))
      .with(CollectionSchema::new("servicos").added_event("servico-added"))
      .with(CollectionSchema::new("clientes").added_event("cliente-added"))
      .with(CollectionSchema::new("agendamentos").added_event("agendamento-added"))
      .with(CollectionSchema::new("cronogramas").identity("id_cronograma"))
      .with(CollectionSchema::new("lancamentos"))
      .with(CollectionSchema::new("notification-settings"))
      .with(CollectionSchema::new("configuracoes"))
  }

  pub fn with(mut self, schema: CollectionSchema) -> Self {
    self.register(schema);
    self
  }

  pub fn register(&mut self, schema: CollectionSchema) {
    self.schemas.insert(schema.key.clone(), schema);
  }

  pub fn get(&self, key: &str) -> Option<&CollectionSchema> {
    self.schemas.get(key)
  }

  pub fn is_recognized(&self, key: &str) -> bool {
    self.schemas.contains_key(key)
  }

  pub fn identity_field(&self, key: &str) -> &str {
    self
      .get(key)
      .map(|s| s.identity_field.as_str())
      .unwrap_or(DEFAULT_IDENTITY_FIELD)
  }

  pub fn added_event(&self, key: &str) -> Option<&str> {
    self.get(key).and_then(|s| s.added_event.as_deref())
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.schemas.keys().map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_salon_identity_fields() {
    let registry = SchemaRegistry::salon();
    assert_eq!(registry.identity_field("clientes"), "id");
    assert_eq!(registry.identity_field("cronogramas"), "id_cronograma");
    assert_eq!(registry.identity_field("desconhecido"), "id");
    assert_eq!(registry.keys().count(), 8);
  }

  #[test]
  fn test_added_events_only_where_defined() {
    let registry = SchemaRegistry::salon();
    assert_eq!(registry.added_event("servicos"), Some("servico-added"));
    assert_eq!(registry.added_event("clientes"), Some("cliente-added"));
    assert_eq!(registry.added_event("agendamentos"), Some("agendamento-added"));
    assert_eq!(registry.added_event("lancamentos"), None);
    assert_eq!(registry.added_event("cronogramas"), None);
  }

  #[test]
  fn test_new_collection_without_core_changes() {
    let registry = SchemaRegistry::salon()
      .with(CollectionSchema::new("produtos").identity("sku").added_event("produto-added"));
    assert!(registry.is_recognized("produtos"));
    assert_eq!(registry.identity_field("produtos"), "sku");
  }
}
