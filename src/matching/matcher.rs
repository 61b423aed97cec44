use crate::composite::CompositeProfile;
use crate::device::PhysicalDevice;
use std::sync::Arc;
use tracing::trace;

/// A `(profile, source_spec)` pair whose predicate holds for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub profile: usize,
    pub spec: usize,
}

/// Evaluates source specs of the loaded profiles. Stateless: every call only
/// looks at the device and the profile list.
#[derive(Debug, Clone, Default)]
pub struct DeviceMatcher {
    profiles: Vec<Arc<CompositeProfile>>,
}

impl DeviceMatcher {
    pub fn new(profiles: Vec<Arc<CompositeProfile>>) -> Self {
        Self { profiles }
    }

    pub fn profiles(&self) -> &[Arc<CompositeProfile>] {
        &self.profiles
    }

    pub fn profile(&self, index: usize) -> Option<&Arc<CompositeProfile>> {
        self.profiles.get(index)
    }

    /// All matching pairs in profile order, then spec order
    pub fn match_device(&self, device: &PhysicalDevice) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for (profile_index, profile) in self.profiles.iter().enumerate() {
            for (spec_index, spec) in profile.source_specs.iter().enumerate() {
                if spec.matches(device) {
                    trace!(
                        "{} matches spec {} (group '{}') of '{}'",
                        device,
                        spec_index,
                        spec.group,
                        profile.name
                    );
                    candidates.push(Candidate {
                        profile: profile_index,
                        spec: spec_index,
                    });
                }
            }
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{BackendMatch, EvdevMatch, Pattern, SourceMatchSpec};

    fn evdev_spec(group: &str, name: &str) -> SourceMatchSpec {
        SourceMatchSpec::new(
            group,
            BackendMatch::Evdev(EvdevMatch {
                name: Some(Pattern::new(name).unwrap()),
                ..Default::default()
            }),
        )
    }

    fn profile(name: &str, specs: Vec<SourceMatchSpec>) -> Arc<CompositeProfile> {
        let mut profile = CompositeProfile::new(name);
        profile.source_specs = specs;
        Arc::new(profile)
    }

    #[test]
    fn candidates_follow_declaration_order() {
        let matcher = DeviceMatcher::new(vec![
            profile(
                "first",
                vec![
                    evdev_spec("keyboard", "Other*"),
                    evdev_spec("keyboard", "AT Translated*"),
                    evdev_spec("keyboard", "*keyboard"),
                ],
            ),
            profile("second", vec![evdev_spec("kbd", "*")]),
        ]);
        let device = PhysicalDevice::evdev("event0", "AT Translated Set 2 keyboard", "", 1, 1);

        assert_eq!(
            matcher.match_device(&device),
            vec![
                Candidate { profile: 0, spec: 1 },
                Candidate { profile: 0, spec: 2 },
                Candidate { profile: 1, spec: 0 },
            ]
        );
    }

    #[test]
    fn no_match_is_empty() {
        let matcher = DeviceMatcher::new(vec![profile("only", vec![evdev_spec("g", "Pad")])]);
        let device = PhysicalDevice::iio("iio:device0", "Pad");
        assert!(matcher.match_device(&device).is_empty());
    }
}
