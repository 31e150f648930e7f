//! Domain Layer
//!
//! Planning entities and core abstractions.
//! No storage logic lives here; only serde and error conversions.

mod entity;
mod group;
mod item;
mod marker;

pub use entity::{position_of, DomainError, DomainResult, Entity};
pub use group::{task_group_id, task_id_from_group, Group, TASK_GROUP_PREFIX};
pub use item::{header_item_id, Item};
pub use marker::{Marker, MarkerKind};
