//! CompositeDevice documents
//!
//! ```yaml
//! version: 1
//! kind: CompositeDevice
//! name: ASUS ROG Ally
//! matches:
//!   - dmi_data:
//!       board_name: RC71L
//! maximum_sources: 8
//! source_devices:
//!   - group: keyboard
//!     evdev:
//!       name: Asus Keyboard
//! target_devices: [xb360, keyboard, mouse]
//! capability_map_id: aly1
//! options:
//!   auto_manage: true
//! ```

use crate::matching::{HostMatch, SourceMatchSpec, SourceMatchSpecDocument, SpecError};
use crate::target::TargetKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Failed to read composite device {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse composite device: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Unsupported document kind '{0}', expected 'CompositeDevice'")]
    WrongKind(String),

    #[error("Profile '{profile}': {source}")]
    InvalidSource {
        profile: String,
        #[source]
        source: SpecError,
    },

    #[error("Profile '{0}' declares no source devices")]
    NoSources(String),

    #[error("Profile '{0}' has maximum_sources 0")]
    ZeroSources(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProfileOptions {
    pub auto_manage: Option<bool>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CompositeDeviceDocument {
    pub version: u32,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub matches: Vec<HostMatch>,
    pub maximum_sources: Option<usize>,
    pub single_source: Option<bool>,
    pub source_devices: Vec<SourceMatchSpecDocument>,
    #[serde(default)]
    pub target_devices: Vec<TargetKind>,
    pub capability_map_id: Option<String>,
    pub options: Option<ProfileOptions>,
}

/// Declarative description of one composite device
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeProfile {
    pub name: String,
    /// Empty means eligible on every host
    pub host_matches: Vec<HostMatch>,
    /// `None` means unbounded
    pub maximum_sources: Option<usize>,
    pub single_source: bool,
    pub source_specs: Vec<SourceMatchSpec>,
    pub target_kinds: Vec<TargetKind>,
    pub capability_map_id: Option<String>,
    pub auto_manage: bool,
}

impl CompositeProfile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            host_matches: Vec::new(),
            maximum_sources: None,
            single_source: false,
            source_specs: Vec::new(),
            target_kinds: Vec::new(),
            capability_map_id: None,
            auto_manage: true,
        }
    }

    /// Names of groups that need at least one bound device
    pub fn required_groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = Vec::new();
        for spec in &self.source_specs {
            if !spec.optional && !groups.contains(&spec.group.as_str()) {
                groups.push(&spec.group);
            }
        }
        groups
    }

    pub fn from_yaml(content: &str) -> Result<Self, ProfileError> {
        let doc: CompositeDeviceDocument = serde_yaml::from_str(content)?;
        Self::try_from(doc)
    }

    pub async fn load(path: &Path) -> Result<Self, ProfileError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ProfileError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml(&content)
    }
}

impl TryFrom<CompositeDeviceDocument> for CompositeProfile {
    type Error = ProfileError;

    fn try_from(doc: CompositeDeviceDocument) -> Result<Self, Self::Error> {
        if doc.kind != "CompositeDevice" {
            return Err(ProfileError::WrongKind(doc.kind));
        }
        if doc.source_devices.is_empty() {
            return Err(ProfileError::NoSources(doc.name));
        }
        if doc.maximum_sources == Some(0) {
            return Err(ProfileError::ZeroSources(doc.name));
        }

        let source_specs = doc
            .source_devices
            .into_iter()
            .map(SourceMatchSpec::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| ProfileError::InvalidSource {
                profile: doc.name.clone(),
                source,
            })?;

        Ok(Self {
            name: doc.name,
            host_matches: doc.matches,
            maximum_sources: doc.maximum_sources,
            single_source: doc.single_source.unwrap_or(false),
            source_specs,
            target_kinds: doc.target_devices,
            capability_map_id: doc.capability_map_id,
            auto_manage: doc.options.and_then(|o| o.auto_manage).unwrap_or(false),
        })
    }
}

/// Loads every profile document in `dirs`, in file order. Invalid documents
/// are reported and skipped. The first profile with a given name wins.
pub async fn load_composite_profiles(dirs: &[PathBuf]) -> Vec<Arc<CompositeProfile>> {
    let mut profiles: Vec<Arc<CompositeProfile>> = Vec::new();
    for path in crate::config::document_paths(dirs).await {
        match CompositeProfile::load(&path).await {
            Ok(profile) => {
                if profiles.iter().any(|p| p.name == profile.name) {
                    warn!(
                        "Ignoring {}: profile '{}' already loaded",
                        path.display(),
                        profile.name
                    );
                    continue;
                }
                profiles.push(Arc::new(profile));
            }
            Err(e) => warn!("Rejected composite device {}: {}", path.display(), e),
        }
    }
    info!("Loaded {} composite device profiles", profiles.len());
    profiles
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// ROG Ally style profile: eight specs over four groups
    pub(crate) const ASUS_ALLY: &str = r#"
version: 1
kind: CompositeDevice
name: ASUS ROG Ally
matches:
  - dmi_data:
      board_name: RC71L
      sys_vendor: ASUSTeK COMPUTER INC.
source_devices:
  - group: gamepad
    evdev:
      name: Microsoft X-Box 360 pad
      phys_path: usb-0000:0?:00.3-*/input0
  - group: gamepad
    evdev:
      name: "Asus Keyboard"
      phys_path: usb-0000:0?:00.3-*/input2
    blocked: true
    optional: true
  - group: keyboard
    evdev:
      name: "Asus Keyboard"
      phys_path: usb-0000:0?:00.3-*/input0
    blocked: true
  - group: keyboard
    evdev:
      name: AT Translated Set 2 keyboard
    optional: true
  - group: mouse
    evdev:
      name: "Asus Keyboard"
      phys_path: usb-0000:0?:00.3-*/input1
    unique: false
  - group: mouse
    udev:
      subsystem: input
      attributes:
        ID_INPUT_MOUSE: "1"
    optional: true
    unique: false
  - group: imu
    iio:
      name: bmi323-imu
    optional: true
  - group: imu
    iio:
      name: bmi260-imu
    optional: true
target_devices:
  - xbox-elite
  - keyboard
  - mouse
capability_map_id: aly1
options:
  auto_manage: true
"#;

    #[test]
    fn parses_asus_profile() {
        let profile = CompositeProfile::from_yaml(ASUS_ALLY).unwrap();
        assert_eq!(profile.name, "ASUS ROG Ally");
        assert_eq!(profile.source_specs.len(), 8);
        assert_eq!(profile.maximum_sources, None);
        assert!(!profile.single_source);
        assert!(profile.auto_manage);
        assert_eq!(
            profile.target_kinds,
            vec![TargetKind::XboxElite, TargetKind::Keyboard, TargetKind::Mouse]
        );
        assert_eq!(profile.required_groups(), vec!["gamepad", "keyboard", "mouse"]);
        assert!(profile.source_specs[2].blocked);
        assert!(!profile.source_specs[4].unique);
    }

    #[test]
    fn rejects_invalid_documents() {
        let wrong_kind = ASUS_ALLY.replace("kind: CompositeDevice", "kind: CapabilityMap");
        assert!(matches!(
            CompositeProfile::from_yaml(&wrong_kind),
            Err(ProfileError::WrongKind(_))
        ));

        let no_backend = r#"
version: 1
kind: CompositeDevice
name: Broken
source_devices:
  - group: gamepad
target_devices: [gamepad]
"#;
        assert!(matches!(
            CompositeProfile::from_yaml(no_backend),
            Err(ProfileError::InvalidSource {
                source: SpecError::NoBackend(_),
                ..
            })
        ));

        let unknown_key = ASUS_ALLY.replace("options:", "extras:");
        assert!(matches!(
            CompositeProfile::from_yaml(&unknown_key),
            Err(ProfileError::Parse(_))
        ));
    }

    #[test]
    fn auto_manage_defaults_to_off() {
        let doc = r#"
version: 1
kind: CompositeDevice
name: Plain
source_devices:
  - group: gamepad
    evdev:
      name: Pad
target_devices: [gamepad]
"#;
        assert!(!CompositeProfile::from_yaml(doc).unwrap().auto_manage);
    }

    #[tokio::test]
    async fn loads_directory_and_keeps_first_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("10-ally.yaml"), ASUS_ALLY).unwrap();
        std::fs::write(
            dir.path().join("20-ally-copy.yaml"),
            ASUS_ALLY.replace("aly1", "other"),
        )
        .unwrap();
        std::fs::write(dir.path().join("30-broken.yaml"), "kind: [").unwrap();

        let profiles = load_composite_profiles(&[dir.path().to_path_buf()]).await;
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].capability_map_id.as_deref(), Some("aly1"));
    }
}
