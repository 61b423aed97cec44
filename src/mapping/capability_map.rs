//! Capability maps: declarative chord → output translation tables.
//!
//! A map is loaded from a `CapabilityMap` document, validated, and then shared
//! read-only (`Arc`) by every composite device that references its id. A
//! composite device without a usable map runs on [`CapabilityMap::passthrough`],
//! the degenerate map with no rules and no filtered capabilities.

use crate::input::{Capability, CapabilityConfig};
use crate::mapping::MapError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Id used by the degenerate pass-through map
pub const PASSTHROUGH_MAP_ID: &str = "passthrough";

/// One chord rule: all of `trigger_set` held → `output` active
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRule {
    pub name: String,
    pub trigger_set: BTreeSet<Capability>,
    pub output: Capability,
}

impl MappingRule {
    /// Whether every trigger of this rule is contained in `held`
    pub fn is_satisfied_by(&self, held: &HashSet<Capability>) -> bool {
        self.trigger_set.iter().all(|capability| held.contains(capability))
    }
}

/// Validated capability map
#[derive(Debug, Clone)]
pub struct CapabilityMap {
    pub id: String,
    pub name: String,
    pub rules: Vec<MappingRule>,
    pub filtered: HashSet<Capability>,
    // Union of all trigger sets
    claimed: HashSet<Capability>,
}

impl CapabilityMap {
    /// Builds a map from already-validated parts.
    ///
    /// Fails on an empty trigger set or on two rules sharing the same trigger set.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        rules: Vec<MappingRule>,
        filtered: HashSet<Capability>,
    ) -> Result<Self, MapError> {
        let mut seen: HashMap<&BTreeSet<Capability>, &str> = HashMap::new();
        for rule in &rules {
            if rule.trigger_set.is_empty() {
                return Err(MapError::EmptyTriggerSet {
                    rule: rule.name.clone(),
                });
            }
            if let Some(existing) = seen.insert(&rule.trigger_set, &rule.name) {
                return Err(MapError::DuplicateRule {
                    rule: rule.name.clone(),
                    existing: existing.to_string(),
                });
            }
        }

        let claimed = rules
            .iter()
            .flat_map(|rule| rule.trigger_set.iter().copied())
            .collect();

        Ok(Self {
            id: id.into(),
            name: name.into(),
            rules,
            filtered,
            claimed,
        })
    }

    /// Map without rules or filters; every event is forwarded 1:1
    pub fn passthrough() -> Self {
        Self {
            id: PASSTHROUGH_MAP_ID.to_string(),
            name: "Pass-through".to_string(),
            rules: Vec::new(),
            filtered: HashSet::new(),
            claimed: HashSet::new(),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.rules.is_empty() && self.filtered.is_empty()
    }

    /// Capability appears in the trigger set of at least one rule
    pub fn claims(&self, capability: &Capability) -> bool {
        self.claimed.contains(capability)
    }

    pub fn filters(&self, capability: &Capability) -> bool {
        self.filtered.contains(capability)
    }

    /// Non-fatal load-time findings.
    ///
    /// A rule whose single trigger is also filtered can never arm.
    pub fn lint(&self) -> Vec<String> {
        self.rules
            .iter()
            .filter(|rule| rule.trigger_set.len() == 1)
            .filter_map(|rule| {
                let trigger = rule.trigger_set.iter().next()?;
                self.filtered.contains(trigger).then(|| {
                    format!(
                        "rule '{}' is triggered only by {} which is also filtered; it can never arm",
                        rule.name, trigger
                    )
                })
            })
            .collect()
    }

    /// Parses and validates a `CapabilityMap` YAML document
    pub fn from_yaml(content: &str) -> Result<Self, MapError> {
        let document: CapabilityMapDocument = serde_yaml::from_str(content)?;
        Self::try_from(document)
    }

    pub async fn load(path: &Path) -> Result<Self, MapError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| MapError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml(&content)
    }
}

impl Default for CapabilityMap {
    fn default() -> Self {
        Self::passthrough()
    }
}

/// `CapabilityMap` document as found on disk. All fields are required.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct CapabilityMapDocument {
    pub version: u32,
    pub kind: String,
    pub name: String,
    pub id: String,
    pub mapping: Vec<MappingDocument>,
    pub filtered_events: Vec<CapabilityConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct MappingDocument {
    pub name: String,
    pub source_events: Vec<CapabilityConfig>,
    pub target_event: CapabilityConfig,
}

impl TryFrom<CapabilityMapDocument> for CapabilityMap {
    type Error = MapError;

    fn try_from(document: CapabilityMapDocument) -> Result<Self, Self::Error> {
        if document.kind != "CapabilityMap" {
            return Err(MapError::WrongKind(document.kind));
        }

        let mut rules = Vec::with_capacity(document.mapping.len());
        for mapping in &document.mapping {
            let invalid = |source| MapError::InvalidCapability {
                rule: mapping.name.clone(),
                source,
            };

            let trigger_set = mapping
                .source_events
                .iter()
                .map(Capability::try_from)
                .collect::<Result<BTreeSet<_>, _>>()
                .map_err(invalid)?;
            let output = Capability::try_from(&mapping.target_event).map_err(invalid)?;

            rules.push(MappingRule {
                name: mapping.name.clone(),
                trigger_set,
                output,
            });
        }

        let filtered = document
            .filtered_events
            .iter()
            .map(Capability::try_from)
            .collect::<Result<HashSet<_>, _>>()
            .map_err(MapError::InvalidFiltered)?;

        CapabilityMap::new(document.id, document.name, rules, filtered)
    }
}

/// All capability maps loaded at startup, keyed by id
#[derive(Debug, Default, Clone)]
pub struct CapabilityMapRegistry {
    maps: HashMap<String, Arc<CapabilityMap>>,
    passthrough: Arc<CapabilityMap>,
}

impl CapabilityMapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a map; the first map registered under an id wins
    pub fn insert(&mut self, map: CapabilityMap) -> bool {
        if self.maps.contains_key(&map.id) {
            warn!(
                "Capability map id '{}' already loaded, ignoring '{}'",
                map.id, map.name
            );
            return false;
        }
        for finding in map.lint() {
            warn!("Capability map '{}': {}", map.id, finding);
        }
        debug!(
            "Registered capability map '{}' ({} rules, {} filtered)",
            map.id,
            map.rules.len(),
            map.filtered.len()
        );
        self.maps.insert(map.id.clone(), Arc::new(map));
        true
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Resolves a profile's `capability_map_id`. A missing or unknown id
    /// resolves to the pass-through map.
    pub fn resolve(&self, id: Option<&str>) -> Arc<CapabilityMap> {
        match id {
            Some(id) => match self.maps.get(id) {
                Some(map) => map.clone(),
                None => {
                    warn!(
                        "Capability map '{}' is not loaded, falling back to pass-through",
                        id
                    );
                    self.passthrough.clone()
                }
            },
            None => self.passthrough.clone(),
        }
    }

    /// Loads every `*.yaml`/`*.yml` document in `dirs`. Invalid documents are
    /// reported and skipped.
    pub async fn load_dirs(dirs: &[PathBuf]) -> Self {
        let mut registry = Self::new();
        for path in crate::config::document_paths(dirs).await {
            match CapabilityMap::load(&path).await {
                Ok(map) => {
                    registry.insert(map);
                }
                Err(e) => warn!("Rejected capability map {}: {}", path.display(), e),
            }
        }
        info!("Loaded {} capability maps", registry.len());
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{GamepadButton, KeyCode};

    const AYANEO_TYPE2: &str = r#"
version: 1
kind: CapabilityMap
name: AYANEO Type 2
id: aya2
mapping:
  - name: Custom v1
    source_events:
      - keyboard: KeyApostrophe
      - keyboard: KeyCopy
    target_event:
      gamepad:
        button: QuickAccess
  - name: Aya Space v2
    source_events:
      - keyboard: KeyF12
      - keyboard: KeyRightCtrl
      - keyboard: KeyLeftMeta
    target_event:
      gamepad:
        button: Guide
filtered_events: []
"#;

    #[test]
    fn loads_a_valid_document() {
        let map = CapabilityMap::from_yaml(AYANEO_TYPE2).unwrap();
        assert_eq!(map.id, "aya2");
        assert_eq!(map.rules.len(), 2);
        assert_eq!(
            map.rules[1].output,
            Capability::GamepadButton(GamepadButton::Guide)
        );
        assert!(map.claims(&Capability::Keyboard(KeyCode::KeyCopy)));
        assert!(!map.claims(&Capability::Keyboard(KeyCode::KeyA)));
        assert!(!map.is_passthrough());
    }

    #[test]
    fn rejects_rule_without_source_events() {
        let doc = r#"
version: 1
kind: CapabilityMap
name: Broken
id: broken
mapping:
  - name: Nothing
    source_events: []
    target_event:
      keyboard: KeyA
filtered_events: []
"#;
        assert!(matches!(
            CapabilityMap::from_yaml(doc),
            Err(MapError::EmptyTriggerSet { rule }) if rule == "Nothing"
        ));
    }

    #[test]
    fn rejects_duplicate_trigger_sets_regardless_of_order() {
        let doc = r#"
version: 1
kind: CapabilityMap
name: Dupes
id: dupes
mapping:
  - name: First
    source_events:
      - keyboard: KeyLeftMeta
      - keyboard: KeyD
    target_event:
      keyboard: KeyVolumeUp
  - name: Second
    source_events:
      - keyboard: KeyD
      - keyboard: KeyLeftMeta
    target_event:
      keyboard: KeyVolumeDown
filtered_events: []
"#;
        assert!(matches!(
            CapabilityMap::from_yaml(doc),
            Err(MapError::DuplicateRule { rule, existing }) if rule == "Second" && existing == "First"
        ));
    }

    #[test]
    fn rejects_unknown_capability_missing_fields_and_wrong_kind() {
        let unknown = AYANEO_TYPE2.replace("KeyCopy", "KeyNotAKey");
        assert!(matches!(
            CapabilityMap::from_yaml(&unknown),
            Err(MapError::Parse(_))
        ));

        let missing = AYANEO_TYPE2.replace("filtered_events: []", "");
        assert!(matches!(
            CapabilityMap::from_yaml(&missing),
            Err(MapError::Parse(_))
        ));

        let kind = AYANEO_TYPE2.replace("kind: CapabilityMap", "kind: CompositeDevice");
        assert!(matches!(
            CapabilityMap::from_yaml(&kind),
            Err(MapError::WrongKind(_))
        ));
    }

    #[test]
    fn lint_flags_filtered_sole_trigger() {
        let doc = r#"
version: 1
kind: CapabilityMap
name: Lint
id: lint
mapping:
  - name: Shadowed
    source_events:
      - gamepad:
          button: QuickAccess2
    target_event:
      gamepad:
        button: Guide
filtered_events:
  - gamepad:
      button: QuickAccess2
"#;
        let map = CapabilityMap::from_yaml(doc).unwrap();
        let findings = map.lint();
        assert_eq!(findings.len(), 1);
        assert!(findings[0].contains("Shadowed"));
    }

    #[test]
    fn registry_resolves_unknown_ids_to_passthrough() {
        let mut registry = CapabilityMapRegistry::new();
        assert!(registry.insert(CapabilityMap::from_yaml(AYANEO_TYPE2).unwrap()));
        assert!(!registry.insert(CapabilityMap::from_yaml(AYANEO_TYPE2).unwrap()));

        assert_eq!(registry.resolve(Some("aya2")).id, "aya2");
        assert!(registry.resolve(Some("missing")).is_passthrough());
        assert!(registry.resolve(None).is_passthrough());
    }

    #[tokio::test]
    async fn loads_directories_and_skips_invalid_documents() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("20-aya2.yaml"), AYANEO_TYPE2)
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("10-broken.yaml"), "version: [")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "ignored")
            .await
            .unwrap();

        let registry = CapabilityMapRegistry::load_dirs(&[dir.path().to_path_buf()]).await;
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve(Some("aya2")).id, "aya2");
    }
}
