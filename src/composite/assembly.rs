//! Bound-device bookkeeping of one composite instance
//!
//! Pure cardinality logic, no channels: which device is bound through which
//! spec, whether another binding is allowed, and whether every required group
//! is filled.

use super::profile::CompositeProfile;
use crate::device::DeviceId;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("maximum of {0} sources reached")]
    MaximumSources(usize),

    #[error("single source profile already has its device")]
    SingleSource,

    #[error("unique group '{0}' is already filled")]
    UniqueGroup(String),

    #[error("device is already bound")]
    AlreadyBound,

    #[error("no source spec {0}")]
    UnknownSpec(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub device: DeviceId,
    pub spec: usize,
}

#[derive(Debug, Clone)]
pub struct Assembly {
    profile: Arc<CompositeProfile>,
    bound: BTreeMap<String, Vec<Binding>>,
}

impl Assembly {
    pub fn new(profile: Arc<CompositeProfile>) -> Self {
        Self {
            profile,
            bound: BTreeMap::new(),
        }
    }

    pub fn profile(&self) -> &Arc<CompositeProfile> {
        &self.profile
    }

    pub fn total(&self) -> usize {
        self.bound.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn contains(&self, device: &DeviceId) -> bool {
        self.bound
            .values()
            .any(|bindings| bindings.iter().any(|b| &b.device == device))
    }

    pub fn spec_of(&self, device: &DeviceId) -> Option<usize> {
        self.bound
            .values()
            .flatten()
            .find(|b| &b.device == device)
            .map(|b| b.spec)
    }

    /// Whether `device` may be bound through spec `spec`
    pub fn check(&self, device: &DeviceId, spec: usize) -> Result<(), Rejection> {
        let source = self
            .profile
            .source_specs
            .get(spec)
            .ok_or(Rejection::UnknownSpec(spec))?;

        if self.contains(device) {
            return Err(Rejection::AlreadyBound);
        }
        let total = self.total();
        if self.profile.single_source && total >= 1 {
            return Err(Rejection::SingleSource);
        }
        if let Some(max) = self.profile.maximum_sources {
            if total >= max {
                return Err(Rejection::MaximumSources(max));
            }
        }

        if let Some(group) = self.bound.get(&source.group) {
            let group_has_unique = group
                .iter()
                .any(|b| self.profile.source_specs[b.spec].unique);
            if !group.is_empty() && (source.unique || group_has_unique) {
                return Err(Rejection::UniqueGroup(source.group.clone()));
            }
        }
        Ok(())
    }

    pub fn bind(&mut self, device: DeviceId, spec: usize) -> Result<(), Rejection> {
        self.check(&device, spec)?;
        let group = self.profile.source_specs[spec].group.clone();
        self.bound
            .entry(group)
            .or_default()
            .push(Binding { device, spec });
        Ok(())
    }

    pub fn unbind(&mut self, device: &DeviceId) -> Option<Binding> {
        let mut removed = None;
        for bindings in self.bound.values_mut() {
            if let Some(pos) = bindings.iter().position(|b| &b.device == device) {
                removed = Some(bindings.remove(pos));
                break;
            }
        }
        self.bound.retain(|_, bindings| !bindings.is_empty());
        removed
    }

    /// Required groups without a bound device
    pub fn missing_groups(&self) -> Vec<&str> {
        self.profile
            .required_groups()
            .into_iter()
            .filter(|group| !self.bound.contains_key(*group))
            .collect()
    }

    pub fn is_satisfied(&self) -> bool {
        let satisfied = self.missing_groups().is_empty();
        if self.profile.single_source {
            satisfied && self.total() == 1
        } else {
            satisfied && !self.is_empty()
        }
    }

    pub fn devices(&self) -> Vec<DeviceId> {
        self.bound.values().flatten().map(|b| b.device.clone()).collect()
    }

    pub fn groups(&self) -> BTreeMap<String, Vec<DeviceId>> {
        self.bound
            .iter()
            .map(|(group, bindings)| {
                (
                    group.clone(),
                    bindings.iter().map(|b| b.device.clone()).collect(),
                )
            })
            .collect()
    }

    /// Whether a device bound through `spec` is hidden from the host
    pub fn is_exclusive(&self, spec: usize) -> bool {
        self.profile
            .source_specs
            .get(spec)
            .map_or(false, |s| s.blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{BackendMatch, IioMatch, SourceMatchSpec};

    fn spec(group: &str, unique: bool, optional: bool) -> SourceMatchSpec {
        let mut spec = SourceMatchSpec::new(group, BackendMatch::Iio(IioMatch::default()));
        spec.unique = unique;
        spec.optional = optional;
        spec
    }

    fn assembly(specs: Vec<SourceMatchSpec>, max: Option<usize>, single: bool) -> Assembly {
        let mut profile = CompositeProfile::new("test");
        profile.source_specs = specs;
        profile.maximum_sources = max;
        profile.single_source = single;
        Assembly::new(Arc::new(profile))
    }

    fn id(name: &str) -> DeviceId {
        DeviceId::from(name)
    }

    #[test]
    fn unique_group_holds_one_device() {
        let mut assembly = assembly(vec![spec("gamepad", true, false)], None, false);
        assembly.bind(id("a"), 0).unwrap();
        assert_eq!(
            assembly.bind(id("b"), 0),
            Err(Rejection::UniqueGroup("gamepad".to_string()))
        );
        assert_eq!(assembly.bind(id("a"), 0), Err(Rejection::AlreadyBound));
        assert_eq!(assembly.total(), 1);
    }

    #[test]
    fn unique_binding_blocks_shared_spec_of_same_group() {
        let mut assembly = assembly(
            vec![spec("mouse", true, false), spec("mouse", false, true)],
            None,
            false,
        );
        assembly.bind(id("a"), 0).unwrap();
        assert!(matches!(assembly.bind(id("b"), 1), Err(Rejection::UniqueGroup(_))));
    }

    #[test]
    fn shared_group_holds_many() {
        let mut assembly = assembly(vec![spec("mouse", false, false)], None, false);
        for name in ["a", "b", "c"] {
            assembly.bind(id(name), 0).unwrap();
        }
        assert_eq!(assembly.groups()["mouse"].len(), 3);
        assert!(assembly.is_satisfied());
    }

    #[test]
    fn maximum_sources_is_enforced() {
        let mut assembly = assembly(
            vec![spec("keyboard", false, false), spec("mouse", false, false)],
            Some(2),
            false,
        );
        assembly.bind(id("a"), 0).unwrap();
        assembly.bind(id("b"), 1).unwrap();
        assert_eq!(assembly.bind(id("c"), 1), Err(Rejection::MaximumSources(2)));
        assert!(assembly.total() <= 2);
    }

    #[test]
    fn single_source_binds_exactly_one() {
        let mut assembly = assembly(
            vec![spec("gamepad", false, false), spec("gamepad", false, true)],
            None,
            true,
        );
        assert!(!assembly.is_satisfied());
        assembly.bind(id("a"), 0).unwrap();
        assert_eq!(assembly.bind(id("b"), 1), Err(Rejection::SingleSource));
        assert!(assembly.is_satisfied());
    }

    #[test]
    fn satisfaction_needs_every_required_group() {
        let mut assembly = assembly(
            vec![
                spec("gamepad", true, false),
                spec("keyboard", true, false),
                spec("imu", true, true),
            ],
            None,
            false,
        );
        assembly.bind(id("pad"), 0).unwrap();
        assert_eq!(assembly.missing_groups(), vec!["keyboard"]);
        assembly.bind(id("kbd"), 1).unwrap();
        assert!(assembly.is_satisfied());

        assert_eq!(assembly.unbind(&id("kbd")), Some(Binding { device: id("kbd"), spec: 1 }));
        assert!(!assembly.is_satisfied());
        assert_eq!(assembly.unbind(&id("kbd")), None);
        assert_eq!(assembly.devices(), vec![id("pad")]);
    }
}
