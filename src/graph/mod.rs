
pub mod models;
pub mod store;
pub mod types;

pub use models::{Clue, ClueStage, Entity, EntityKind, Event, NodeId, Section};
pub use store::{GraphStore, InMemoryGraph};
pub use types::{EntityTypeConfig, TypeRegistry};
