//! Physical devices: identity, the global table and per-device forwarders.

pub mod physical;
pub mod registry;
pub mod source;

pub use physical::{BackendInfo, DeviceId, PhysicalDevice};
pub use registry::{Claim, ClaimError, DeviceEntry, DeviceRegistry};
pub use source::{SourceClient, SourceCommand, SourceDevice, SourceHandle};
