//! Typed access to a collection, validated at the read boundary.

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::marker::PhantomData;
use tracing::warn;

use super::records::RecordStore;

/// A record type stored under a fixed key.
pub trait Record: Clone + Serialize + DeserializeOwned {
  /// Persisted key of the collection (e.g. "clientes")
  const COLLECTION: &'static str;
  /// Field that holds the identity
  const IDENTITY_FIELD: &'static str = "id";
  /// Record layout version this type reads and writes
  const VERSION: u32 = 1;

  fn identity(&self) -> String;
}

/// Typed handle over one collection of a [`RecordStore`].
pub struct Collection<'a, T: Record> {
  store: &'a RecordStore,
  _marker: PhantomData<T>,
}

impl RecordStore {
  /// Typed handle for `T`'s collection.
  ///
  /// Fails if the store's schema for that key disagrees with `T` on identity
  /// field or version.
  pub fn collection<T: Record>(&self) -> Result<Collection<'_, T>> {
    if let Some(schema) = self.schemas().get(T::COLLECTION) {
      if schema.identity_field != T::IDENTITY_FIELD {
        return Err(eyre!(
          "Collection {} is keyed by {}, record type uses {}",
          T::COLLECTION,
          schema.identity_field,
          T::IDENTITY_FIELD
        ));
      }
      if schema.version != T::VERSION {
        return Err(eyre!(
          "Collection {} is at version {}, record type reads version {}",
          T::COLLECTION,
          schema.version,
          T::VERSION
        ));
      }
    }

    Ok(Collection {
      store: self,
      _marker: PhantomData,
    })
  }
}

impl<T: Record> Collection<'_, T> {
  /// All records. A collection that does not match `T` reads as empty.
  pub fn all(&self) -> Vec<T> {
    let raw = self.store.get(T::COLLECTION);
    match serde_json::from_value(Value::Array(raw)) {
      Ok(records) => records,
      Err(e) => {
        warn!(collection = T::COLLECTION, error = %e, "records failed validation, reading as empty");
        Vec::new()
      }
    }
  }

  pub fn find(&self, id: &str) -> Option<T> {
    self.all().into_iter().find(|r| r.identity() == id)
  }

  pub fn add(&self, record: &T) -> Result<()> {
    self.store.add(T::COLLECTION, to_value(record)?)
  }

  pub fn replace_all(&self, records: &[T]) -> Result<()> {
    let values = records.iter().map(to_value).collect::<Result<Vec<_>>>()?;
    self.store.set(T::COLLECTION, &values)
  }

  pub fn update(&self, id: &str, patch: &Map<String, Value>) -> Result<()> {
    self.store.update(T::COLLECTION, id, patch)
  }

  pub fn remove(&self, id: &str) -> Result<()> {
    self.store.remove(T::COLLECTION, id)
  }
}

fn to_value<T: Serialize>(record: &T) -> Result<Value> {
  serde_json::to_value(record).map_err(|e| eyre!("Failed to serialize record: {}", e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{Agendamento, AgendamentoStatus, Cliente, Cronograma};
  use crate::store::{CollectionSchema, SchemaRegistry, StorageArea};
  use serde_json::json;
  use std::sync::Arc;

  fn store() -> RecordStore {
    RecordStore::new(Arc::new(StorageArea::in_memory()), SchemaRegistry::salon())
  }

  fn cliente(id: &str, nome: &str) -> Cliente {
    Cliente {
      id: id.to_string(),
      nome: nome.to_string(),
      telefone: Some("81999990000".to_string()),
      email: None,
      data_nascimento: None,
      observacoes: None,
      extra: Map::new(),
    }
  }

  #[test]
  fn test_typed_add_and_find() {
    let store = store();
    let clientes = store.collection::<Cliente>().unwrap();
    clientes.add(&cliente("1", "Ana")).unwrap();
    clientes.add(&cliente("2", "Bia")).unwrap();

    assert_eq!(clientes.all().len(), 2);
    assert_eq!(clientes.find("2").unwrap().nome, "Bia");
    assert!(clientes.find("3").is_none());
  }

  #[test]
  fn test_typed_update_through_patch() {
    let store = store();
    let agenda = store.collection::<Agendamento>().unwrap();
    agenda
      .replace_all(&[Agendamento {
        id: "a1".into(),
        cliente_id: "1".into(),
        servico_id: "s1".into(),
        data: "2024-05-10".into(),
        hora: "14:00".into(),
        status: AgendamentoStatus::Agendado,
        valor: Some(80.0),
        observacoes: None,
        extra: Map::new(),
      }])
      .unwrap();

    let patch = json!({"status": "concluido"});
    agenda.update("a1", patch.as_object().unwrap()).unwrap();
    assert_eq!(agenda.find("a1").unwrap().status, AgendamentoStatus::Concluido);
  }

  #[test]
  fn test_invalid_records_read_as_empty() {
    let store = store();
    store
      .set("clientes", &[json!({"id": "1", "nome": 42})])
      .unwrap();
    assert!(store.collection::<Cliente>().unwrap().all().is_empty());
    // The untyped view is untouched
    assert_eq!(store.get("clientes").len(), 1);
  }

  #[test]
  fn test_unknown_fields_survive_typed_writes() {
    let store = store();
    store
      .set("clientes", &[json!({"id": "1", "nome": "Ana", "instagram": "@ana"})])
      .unwrap();

    let clientes = store.collection::<Cliente>().unwrap();
    let all = clientes.all();
    clientes.replace_all(&all).unwrap();

    assert_eq!(store.get("clientes")[0]["instagram"], json!("@ana"));
  }

  #[test]
  fn test_schema_mismatch_is_rejected() {
    let registry = SchemaRegistry::salon().with(CollectionSchema::new("cronogramas"));
    let store = RecordStore::new(Arc::new(StorageArea::in_memory()), registry);
    assert!(store.collection::<Cronograma>().is_err());

    let registry = SchemaRegistry::salon().with(CollectionSchema::new("clientes").version(2));
    let store = RecordStore::new(Arc::new(StorageArea::in_memory()), registry);
    assert!(store.collection::<Cliente>().is_err());
  }
}
