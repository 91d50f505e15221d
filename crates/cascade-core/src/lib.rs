pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod notifier;
pub mod observe;
pub mod record;
pub mod schema;
pub mod store;
pub mod traverse;

pub use config::*;
pub use dispatch::*;
pub use engine::{Engine, Propagation};
pub use error::*;
pub use notifier::{BatchNotifier, Notifier, NotifierRegistry, SetFieldNotifier};
pub use observe::{NotifierBinding, ObserveSpec};
pub use record::*;
pub use schema::{
    Cardinality, EntityBuilder, RelationKind, RelationSpec, RelationshipDescriptor, Schema,
    SchemaBuilder, TraversalKind, TypeSchema,
};
pub use store::{CollectionSpec, Condition, MemoryStore, Store, StoreResult};
pub use traverse::Reach;
