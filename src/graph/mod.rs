//! 宇宙图：数据模型、Entity Store 与空间布局

pub mod ids;
pub mod layout;
pub mod store;
pub mod types;

pub use ids::IdClock;
pub use layout::{place, Level, LayoutConfig, GOLDEN_ANGLE};
pub use store::{derive_title, EntityRef, EntityStore, GraphError, NewNode};
pub use types::{EntityId, Nexus, NexusKind, Node, NodeKind, NodeMetadata, Snapshot, Universe, Vec3};
