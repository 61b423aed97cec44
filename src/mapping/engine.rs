//! Chord engine: translates the merged event stream of one composite device
//!
//! The engine owns the chord state of exactly one composite device and is only
//! ever driven from that device's event loop, so it needs no locking.
//!
//! # Algorithm
//!
//! ```text
//! NativeEvent ──► filtered? ──yes──► drop
//!                    │no
//!                    ▼
//!               update held
//!                    │
//!          claimed? ─┴─ no ──► pass through to target
//!             │yes
//!             ▼
//!   armed rule still satisfied? ──no──► emit output off, disarm
//!             │
//!             ▼
//!   unarmed: most specific satisfied rule ──► emit output on, arm
//! ```
//!
//! Claimed capabilities (any capability in any trigger set) never reach a
//! target on their own. A pass-through map has no rules and no filter, so the
//! same code path forwards every event 1:1.

use crate::input::{Capability, InputValue, NativeEvent, TargetEvent};
use crate::mapping::{CapabilityMap, MappingRule};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Default magnitude above which an analog capability counts as held
pub const DEFAULT_AXIS_THRESHOLD: f64 = 0.35;

#[derive(Debug)]
pub struct ChordEngine {
    map: Arc<CapabilityMap>,
    axis_threshold: f64,
    // Union of active, unfiltered capabilities across all sources
    held: HashSet<Capability>,
    // Index into map.rules
    armed: Option<usize>,
    // Pass-through capabilities currently active at a target
    forwarded: HashSet<Capability>,
}

impl ChordEngine {
    pub fn new(map: Arc<CapabilityMap>, axis_threshold: f64) -> Self {
        debug!(
            "Creating chord engine for map '{}' ({} rules)",
            map.id,
            map.rules.len()
        );
        Self {
            map,
            axis_threshold,
            held: HashSet::new(),
            armed: None,
            forwarded: HashSet::new(),
        }
    }

    pub fn held(&self) -> &HashSet<Capability> {
        &self.held
    }

    pub fn armed(&self) -> Option<&MappingRule> {
        self.armed.and_then(|index| self.map.rules.get(index))
    }

    /// Feeds one raw event and returns the target events it produces, in order
    pub fn process(&mut self, event: &NativeEvent) -> Vec<TargetEvent> {
        let capability = event.capability;
        if self.map.filters(&capability) {
            trace!("Dropping filtered capability {}", capability);
            return Vec::new();
        }

        let active = event.value.is_active(self.axis_threshold);
        let changed = if active {
            self.held.insert(capability)
        } else {
            self.held.remove(&capability)
        };

        let mut emitted = Vec::new();
        if self.map.claims(&capability) {
            if changed {
                self.evaluate(&mut emitted);
            } else {
                trace!("Claimed capability {} did not change held state", capability);
            }
            return emitted;
        }

        if active {
            self.forwarded.insert(capability);
        } else {
            self.forwarded.remove(&capability);
        }
        // Digital capabilities only forward edges, analog ones every value
        if matches!(event.value, InputValue::Bool(_)) && !changed {
            return emitted;
        }
        emitted.push(TargetEvent {
            capability,
            activated: active,
            value: match event.value {
                InputValue::Bool(_) => None,
                value => Some(value),
            },
        });
        emitted
    }

    /// Clears all chord state. Returns the releases needed so that nothing
    /// stays pressed on a target: the armed output and every forwarded
    /// capability still active.
    pub fn reset(&mut self) -> Vec<TargetEvent> {
        let mut emitted = Vec::new();

        if let Some(rule) = self.armed() {
            info!("Releasing armed rule '{}' on reset", rule.name);
            emitted.push(TargetEvent::deactivate(rule.output));
        }

        let mut forwarded: Vec<Capability> = self.forwarded.drain().collect();
        forwarded.sort();
        emitted.extend(forwarded.into_iter().map(TargetEvent::deactivate));

        self.held.clear();
        self.armed = None;
        emitted
    }

    // Disarm when the armed chord broke, then arm the most specific satisfied
    // rule if nothing is armed. One pass only.
    fn evaluate(&mut self, emitted: &mut Vec<TargetEvent>) {
        if let Some(index) = self.armed {
            let rule = &self.map.rules[index];
            if !rule.is_satisfied_by(&self.held) {
                debug!("Chord '{}' released, deactivating {}", rule.name, rule.output);
                emitted.push(TargetEvent::deactivate(rule.output));
                self.armed = None;
            }
        }

        if self.armed.is_some() {
            return;
        }

        if let Some(index) = self.most_specific_match() {
            let rule = &self.map.rules[index];
            debug!("Chord '{}' armed, activating {}", rule.name, rule.output);
            emitted.push(TargetEvent::activate(rule.output));
            self.armed = Some(index);
        }
    }

    // Largest satisfied trigger set wins, ties go to declaration order
    fn most_specific_match(&self) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for (index, rule) in self.map.rules.iter().enumerate() {
            if !rule.is_satisfied_by(&self.held) {
                continue;
            }
            let size = rule.trigger_set.len();
            match best {
                Some((_, best_size)) if best_size >= size => {}
                _ => best = Some((index, size)),
            }
        }
        best.map(|(index, _)| index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{GamepadAxis, GamepadButton, KeyCode, MouseButton};

    const ONEXPLAYER_TYPE4: &str = r#"
version: 1
kind: CapabilityMap
name: OneXPlayer Type 4
id: oxp4
mapping:
  - name: Volume Up
    source_events:
      - keyboard: KeyLeftMeta
      - keyboard: KeyD
    target_event:
      keyboard: KeyVolumeUp
  - name: Volume Down
    source_events:
      - keyboard: KeyLeftMeta
      - keyboard: KeyA
    target_event:
      keyboard: KeyVolumeDown
  - name: Turbo
    source_events:
      - keyboard: KeyLeftCtrl
      - keyboard: KeyLeftAlt
      - keyboard: KeyLeftMeta
    target_event:
      gamepad:
        button: QuickAccess
filtered_events:
  - keyboard: KeyF23
"#;

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

    fn engine(doc: &str) -> ChordEngine {
        let map = CapabilityMap::from_yaml(doc).unwrap();
        ChordEngine::new(Arc::new(map), DEFAULT_AXIS_THRESHOLD)
    }

    fn key(code: KeyCode) -> Capability {
        Capability::Keyboard(code)
    }

    fn press(engine: &mut ChordEngine, capability: Capability) -> Vec<TargetEvent> {
        engine.process(&NativeEvent::pressed(capability))
    }

    fn release(engine: &mut ChordEngine, capability: Capability) -> Vec<TargetEvent> {
        engine.process(&NativeEvent::released(capability))
    }

    #[test]
    fn onexplayer_volume_up_chord() {
        let mut engine = engine(ONEXPLAYER_TYPE4);
        let mut emitted = Vec::new();

        emitted.extend(press(&mut engine, key(KeyCode::KeyLeftMeta)));
        assert!(emitted.is_empty());

        emitted.extend(press(&mut engine, key(KeyCode::KeyD)));
        assert_eq!(
            emitted,
            vec![TargetEvent::activate(key(KeyCode::KeyVolumeUp))]
        );
        assert_eq!(engine.armed().map(|r| r.name.as_str()), Some("Volume Up"));

        emitted.extend(release(&mut engine, key(KeyCode::KeyD)));
        emitted.extend(release(&mut engine, key(KeyCode::KeyLeftMeta)));
        assert_eq!(
            emitted,
            vec![
                TargetEvent::activate(key(KeyCode::KeyVolumeUp)),
                TargetEvent::deactivate(key(KeyCode::KeyVolumeUp)),
            ]
        );
        assert!(emitted
            .iter()
            .all(|e| e.capability != key(KeyCode::KeyLeftMeta) && e.capability != key(KeyCode::KeyD)));
        assert!(engine.armed().is_none());
    }

    #[test]
    fn ayaneo_disjoint_rules() {
        let mut engine = engine(AYANEO_TYPE2);
        let mut emitted = press(&mut engine, key(KeyCode::KeyApostrophe));
        emitted.extend(press(&mut engine, key(KeyCode::KeyCopy)));
        assert_eq!(
            emitted,
            vec![TargetEvent::activate(Capability::GamepadButton(
                GamepadButton::QuickAccess
            ))]
        );
        release(&mut engine, key(KeyCode::KeyApostrophe));
        release(&mut engine, key(KeyCode::KeyCopy));

        let mut emitted = press(&mut engine, key(KeyCode::KeyF12));
        emitted.extend(press(&mut engine, key(KeyCode::KeyRightCtrl)));
        emitted.extend(press(&mut engine, key(KeyCode::KeyLeftMeta)));
        assert_eq!(
            emitted,
            vec![TargetEvent::activate(Capability::GamepadButton(
                GamepadButton::Guide
            ))]
        );
    }

    #[test]
    fn arms_and_disarms_exactly_once_per_cycle() {
        let mut engine = engine(ONEXPLAYER_TYPE4);
        let mut emitted = Vec::new();
        emitted.extend(press(&mut engine, key(KeyCode::KeyLeftMeta)));
        emitted.extend(press(&mut engine, key(KeyCode::KeyD)));
        // Repeated activation of a held key is not an edge
        emitted.extend(press(&mut engine, key(KeyCode::KeyD)));
        emitted.extend(press(&mut engine, key(KeyCode::KeyLeftMeta)));
        emitted.extend(release(&mut engine, key(KeyCode::KeyLeftMeta)));
        emitted.extend(release(&mut engine, key(KeyCode::KeyD)));
        emitted.extend(release(&mut engine, key(KeyCode::KeyD)));

        let on = emitted.iter().filter(|e| e.activated).count();
        let off = emitted.iter().filter(|e| !e.activated).count();
        assert_eq!((on, off), (1, 1));
    }

    #[test]
    fn most_specific_rule_wins() {
        let mut engine = engine(ONEXPLAYER_TYPE4);
        press(&mut engine, key(KeyCode::KeyLeftCtrl));
        press(&mut engine, key(KeyCode::KeyLeftAlt));
        let emitted = press(&mut engine, key(KeyCode::KeyLeftMeta));
        assert_eq!(
            emitted,
            vec![TargetEvent::activate(Capability::GamepadButton(
                GamepadButton::QuickAccess
            ))]
        );
    }

    #[test]
    fn superset_rule_arms_over_subset_when_both_match() {
        let doc = r#"
version: 1
kind: CapabilityMap
name: Nested
id: nested
mapping:
  - name: Small
    source_events:
      - keyboard: KeyLeftMeta
      - keyboard: KeyD
    target_event:
      keyboard: KeyVolumeUp
  - name: Large
    source_events:
      - keyboard: KeyLeftMeta
      - keyboard: KeyD
      - keyboard: KeyLeftShift
    target_event:
      keyboard: KeyMute
filtered_events: []
"#;
        let mut engine = engine(doc);
        press(&mut engine, key(KeyCode::KeyLeftMeta));
        press(&mut engine, key(KeyCode::KeyLeftShift));
        let emitted = press(&mut engine, key(KeyCode::KeyD));
        assert_eq!(emitted, vec![TargetEvent::activate(key(KeyCode::KeyMute))]);

        // Dropping to the smaller chord re-arms in the same pass
        let emitted = release(&mut engine, key(KeyCode::KeyLeftShift));
        assert_eq!(
            emitted,
            vec![
                TargetEvent::deactivate(key(KeyCode::KeyMute)),
                TargetEvent::activate(key(KeyCode::KeyVolumeUp)),
            ]
        );
    }

    #[test]
    fn equal_size_ties_follow_declaration_order() {
        let doc = r#"
version: 1
kind: CapabilityMap
name: Ties
id: ties
mapping:
  - name: First
    source_events:
      - keyboard: KeyA
      - keyboard: KeyB
    target_event:
      keyboard: KeyF1
  - name: Second
    source_events:
      - keyboard: KeyB
      - keyboard: KeyC
    target_event:
      keyboard: KeyF2
filtered_events: []
"#;
        let mut engine = engine(doc);
        press(&mut engine, key(KeyCode::KeyC));
        press(&mut engine, key(KeyCode::KeyA));
        let emitted = press(&mut engine, key(KeyCode::KeyB));
        assert_eq!(emitted, vec![TargetEvent::activate(key(KeyCode::KeyF1))]);
    }

    #[test]
    fn partial_chords_produce_no_output() {
        let mut engine = engine(ONEXPLAYER_TYPE4);
        assert!(press(&mut engine, key(KeyCode::KeyLeftMeta)).is_empty());
        assert!(press(&mut engine, key(KeyCode::KeyLeftCtrl)).is_empty());
        assert!(release(&mut engine, key(KeyCode::KeyLeftMeta)).is_empty());
        assert!(release(&mut engine, key(KeyCode::KeyLeftCtrl)).is_empty());
    }

    #[test]
    fn filtered_capabilities_never_enter_held() {
        let mut engine = engine(ONEXPLAYER_TYPE4);
        assert!(press(&mut engine, key(KeyCode::KeyF23)).is_empty());
        assert!(!engine.held().contains(&key(KeyCode::KeyF23)));
        assert!(release(&mut engine, key(KeyCode::KeyF23)).is_empty());
    }

    #[test]
    fn unclaimed_capabilities_pass_through() {
        let mut engine = engine(ONEXPLAYER_TYPE4);
        let south = Capability::GamepadButton(GamepadButton::South);
        assert_eq!(press(&mut engine, south), vec![TargetEvent::activate(south)]);
        assert!(press(&mut engine, south).is_empty());
        assert_eq!(release(&mut engine, south), vec![TargetEvent::deactivate(south)]);
        assert!(release(&mut engine, south).is_empty());

        let stick = Capability::GamepadAxis(GamepadAxis::LeftStick);
        let value = InputValue::Vector2 {
            x: Some(0.1),
            y: Some(0.0),
        };
        let emitted = engine.process(&NativeEvent::new(stick, value));
        assert_eq!(
            emitted,
            vec![TargetEvent {
                capability: stick,
                activated: false,
                value: Some(value),
            }]
        );
    }

    #[test]
    fn passthrough_map_forwards_everything() {
        let mut engine = ChordEngine::new(
            Arc::new(CapabilityMap::passthrough()),
            DEFAULT_AXIS_THRESHOLD,
        );
        let meta = key(KeyCode::KeyLeftMeta);
        let d = key(KeyCode::KeyD);
        assert_eq!(press(&mut engine, meta), vec![TargetEvent::activate(meta)]);
        assert_eq!(press(&mut engine, d), vec![TargetEvent::activate(d)]);
        assert!(engine.armed().is_none());
    }

    #[test]
    fn reset_releases_armed_output_and_forwarded_presses() {
        let mut engine = engine(ONEXPLAYER_TYPE4);
        let click = Capability::MouseButton(MouseButton::Left);
        press(&mut engine, click);
        press(&mut engine, key(KeyCode::KeyLeftMeta));
        press(&mut engine, key(KeyCode::KeyD));

        let released = engine.reset();
        assert_eq!(
            released,
            vec![
                TargetEvent::deactivate(key(KeyCode::KeyVolumeUp)),
                TargetEvent::deactivate(click),
            ]
        );
        assert!(engine.held().is_empty());
        assert!(engine.armed().is_none());
        assert!(engine.reset().is_empty());
    }

    #[test]
    fn reset_without_armed_rule_emits_no_stray_release() {
        let mut engine = engine(ONEXPLAYER_TYPE4);
        press(&mut engine, key(KeyCode::KeyLeftMeta));
        assert!(engine.reset().is_empty());
    }
}
