//! Source device match specifications
//!
//! A `source_devices` entry of a CompositeDevice document names a `group`, the
//! binding flags and exactly one backend block:
//!
//! ```yaml
//! - group: gamepad
//!   blocked: true
//!   evdev:
//!     name: "Asus Keyboard"
//!     phys_path: "usb-0000:0?:00.3-*/input0"
//! ```

use super::pattern::Pattern;
use crate::device::{BackendInfo, PhysicalDevice};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum SpecError {
    #[error("Source device in group '{0}' has no backend matcher")]
    NoBackend(String),

    #[error("Source device in group '{0}' has more than one backend matcher")]
    MultipleBackends(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EvdevMatch {
    pub name: Option<Pattern>,
    pub phys_path: Option<Pattern>,
    pub handler: Option<Pattern>,
    /// Hexadecimal, e.g. "045e"
    pub vendor_id: Option<Pattern>,
    pub product_id: Option<Pattern>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HidrawMatch {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub interface_num: Option<i32>,
    pub name: Option<Pattern>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UdevMatch {
    #[serde(default)]
    pub attributes: BTreeMap<String, Pattern>,
    pub sys_name: Option<Pattern>,
    pub subsystem: Option<Pattern>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct IioMatch {
    pub name: Option<Pattern>,
    pub id: Option<Pattern>,
}

/// Exactly one backend predicate
#[derive(Clone, Debug, PartialEq)]
pub enum BackendMatch {
    Evdev(EvdevMatch),
    Hidraw(HidrawMatch),
    Udev(UdevMatch),
    Iio(IioMatch),
}

fn field(pattern: &Option<Pattern>, value: &str) -> bool {
    pattern.as_ref().map_or(true, |p| p.matches(value))
}

impl BackendMatch {
    /// Udev predicates apply to any backend, the others only to their own
    pub fn matches(&self, device: &PhysicalDevice) -> bool {
        match (self, &device.backend) {
            (
                BackendMatch::Evdev(m),
                BackendInfo::Evdev {
                    name,
                    phys_path,
                    handler,
                    vendor_id,
                    product_id,
                },
            ) => {
                field(&m.name, name)
                    && field(&m.phys_path, phys_path)
                    && field(&m.handler, handler)
                    && field(&m.vendor_id, &format!("{:04x}", vendor_id))
                    && field(&m.product_id, &format!("{:04x}", product_id))
            }
            (
                BackendMatch::Hidraw(m),
                BackendInfo::Hidraw {
                    name,
                    vendor_id,
                    product_id,
                    interface_num,
                },
            ) => {
                m.vendor_id.map_or(true, |v| v == *vendor_id)
                    && m.product_id.map_or(true, |p| p == *product_id)
                    && m.interface_num.map_or(true, |i| i == *interface_num)
                    && field(&m.name, name)
            }
            (BackendMatch::Iio(m), BackendInfo::Iio { name, id }) => {
                field(&m.name, name) && field(&m.id, id)
            }
            (BackendMatch::Udev(m), _) => {
                field(&m.sys_name, &device.sys_name)
                    && field(&m.subsystem, &device.subsystem)
                    && m.attributes.iter().all(|(key, pattern)| {
                        device
                            .attributes
                            .get(key)
                            .map_or(false, |value| pattern.matches(value))
                    })
            }
            _ => false,
        }
    }
}

/// Document form of one `source_devices` entry
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SourceMatchSpecDocument {
    pub group: String,
    pub unique: Option<bool>,
    pub blocked: Option<bool>,
    pub optional: Option<bool>,
    pub evdev: Option<EvdevMatch>,
    pub hidraw: Option<HidrawMatch>,
    pub udev: Option<UdevMatch>,
    pub iio: Option<IioMatch>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourceMatchSpec {
    pub group: String,
    pub matcher: BackendMatch,
    /// At most one device may be bound through this spec's group
    pub unique: bool,
    /// Bound devices are hidden from the host and claimed exclusively
    pub blocked: bool,
    /// The group does not need this spec to be satisfied
    pub optional: bool,
}

impl SourceMatchSpec {
    pub fn new(group: &str, matcher: BackendMatch) -> Self {
        Self {
            group: group.to_string(),
            matcher,
            unique: true,
            blocked: false,
            optional: false,
        }
    }

    pub fn matches(&self, device: &PhysicalDevice) -> bool {
        self.matcher.matches(device)
    }
}

impl TryFrom<SourceMatchSpecDocument> for SourceMatchSpec {
    type Error = SpecError;

    fn try_from(doc: SourceMatchSpecDocument) -> Result<Self, Self::Error> {
        let mut backends = Vec::with_capacity(1);
        if let Some(m) = doc.evdev {
            backends.push(BackendMatch::Evdev(m));
        }
        if let Some(m) = doc.hidraw {
            backends.push(BackendMatch::Hidraw(m));
        }
        if let Some(m) = doc.udev {
            backends.push(BackendMatch::Udev(m));
        }
        if let Some(m) = doc.iio {
            backends.push(BackendMatch::Iio(m));
        }

        let matcher = match backends.len() {
            0 => return Err(SpecError::NoBackend(doc.group)),
            1 => backends.remove(0),
            _ => return Err(SpecError::MultipleBackends(doc.group)),
        };

        Ok(Self {
            group: doc.group,
            matcher,
            unique: doc.unique.unwrap_or(true),
            blocked: doc.blocked.unwrap_or(false),
            optional: doc.optional.unwrap_or(false),
        })
    }
}
