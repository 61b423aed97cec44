use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable identity of a physical device, e.g. `event3` or `hidraw1`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Backend specific identification, as delivered by enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendInfo {
    Evdev {
        name: String,
        phys_path: String,
        handler: String,
        vendor_id: u16,
        product_id: u16,
    },
    Hidraw {
        name: String,
        vendor_id: u16,
        product_id: u16,
        interface_num: i32,
    },
    Iio {
        name: String,
        id: String,
    },
}

impl BackendInfo {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendInfo::Evdev { .. } => "evdev",
            BackendInfo::Hidraw { .. } => "hidraw",
            BackendInfo::Iio { .. } => "iio",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            BackendInfo::Evdev { name, .. }
            | BackendInfo::Hidraw { name, .. }
            | BackendInfo::Iio { name, .. } => name,
        }
    }
}

/// A device discovered on the host. Supplied by the external enumerator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalDevice {
    pub id: DeviceId,
    pub sys_name: String,
    pub subsystem: String,
    /// Enumerable bus attributes (udev properties)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub backend: BackendInfo,
}

impl PhysicalDevice {
    pub fn evdev(
        id: &str,
        name: &str,
        phys_path: &str,
        vendor_id: u16,
        product_id: u16,
    ) -> Self {
        Self {
            id: DeviceId::new(id),
            sys_name: id.to_string(),
            subsystem: "input".to_string(),
            attributes: BTreeMap::new(),
            backend: BackendInfo::Evdev {
                name: name.to_string(),
                phys_path: phys_path.to_string(),
                handler: id.to_string(),
                vendor_id,
                product_id,
            },
        }
    }

    pub fn hidraw(
        id: &str,
        name: &str,
        vendor_id: u16,
        product_id: u16,
        interface_num: i32,
    ) -> Self {
        Self {
            id: DeviceId::new(id),
            sys_name: id.to_string(),
            subsystem: "hidraw".to_string(),
            attributes: BTreeMap::new(),
            backend: BackendInfo::Hidraw {
                name: name.to_string(),
                vendor_id,
                product_id,
                interface_num,
            },
        }
    }

    pub fn iio(id: &str, name: &str) -> Self {
        Self {
            id: DeviceId::new(id),
            sys_name: id.to_string(),
            subsystem: "iio".to_string(),
            attributes: BTreeMap::new(),
            backend: BackendInfo::Iio {
                name: name.to_string(),
                id: id.to_string(),
            },
        }
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }
}

impl fmt::Display for PhysicalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} '{}')",
            self.id,
            self.backend.kind(),
            self.backend.name()
        )
    }
}
