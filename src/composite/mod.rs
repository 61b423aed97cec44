//! Composite devices: profiles, assembly and the running instances.
//!
//! - [`profile`] - CompositeDevice documents
//! - [`assembly`] - cardinality and group satisfaction of one instance
//! - [`device`] - instance task driving the chord engine and its targets
//! - [`manager`] - hot-plug handling, claims and instance lifecycle

pub mod assembly;
pub mod device;
pub mod error;
pub mod manager;
pub mod profile;

pub use assembly::{Assembly, Binding, Rejection};
pub use device::{
    spawn_instance, CompositeClient, CompositeCommand, CompositeDevice, InstanceSettings,
    LifecycleState,
};
pub use error::CompositeError;
pub use manager::{CompositeDeviceManager, InstanceStatus, ManagerClient, ManagerCommand};
pub use profile::{load_composite_profiles, CompositeDeviceDocument, CompositeProfile, ProfileError};
