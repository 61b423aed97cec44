//! Capability mapping: declarative chord maps and the engine that applies them.
//!
//! - [`capability_map`] - map documents, validation and the id registry
//! - [`engine`] - per-device chord state machine

pub mod capability_map;
pub mod engine;
pub mod error;

pub use capability_map::{
    CapabilityMap, CapabilityMapDocument, CapabilityMapRegistry, MappingDocument, MappingRule,
    PASSTHROUGH_MAP_ID,
};
pub use engine::{ChordEngine, DEFAULT_AXIS_THRESHOLD};
pub use error::MapError;
