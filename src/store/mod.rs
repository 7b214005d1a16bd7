//! Local record store.
//!
//! Typed collections persisted as JSON arrays in a key-value area shared by
//! every context of the application:
//! - Whole-collection writes followed by a `data-updated` event
//! - Identity lookup driven by per-collection schema descriptors
//! - Changes from other contexts republished as the same event

mod area;
mod collection;
mod events;
mod records;
mod schema;

pub use area::{
  ContextId, KeyValueBackend, MemoryBackend, SqliteBackend, StorageArea, StorageChange,
};
pub use collection::{Collection, Record};
pub use events::{EventBus, StoreEvent, Subscription, DATA_UPDATED};
pub use records::RecordStore;
pub use schema::{CollectionSchema, SchemaRegistry, DEFAULT_IDENTITY_FIELD};
