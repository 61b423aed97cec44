//! Device matching
//!
//! ```text
//! PhysicalDevice ──► DeviceMatcher ──► [(profile, spec), ...]
//!                        │
//!                        ├─ SourceMatchSpec (evdev | hidraw | udev | iio)
//!                        └─ glob Pattern fields
//! ```
//!
//! Host predicates (`matches` in a profile) decide whether a profile may
//! become active on this machine at all.

pub mod host;
pub mod matcher;
pub mod pattern;
pub mod source_spec;

pub use host::{host_eligible, DmiMatch, HostInfo, HostMatch};
pub use matcher::{Candidate, DeviceMatcher};
pub use pattern::Pattern;
pub use source_spec::{
    BackendMatch, EvdevMatch, HidrawMatch, IioMatch, SourceMatchSpec, SourceMatchSpecDocument,
    SpecError, UdevMatch,
};
