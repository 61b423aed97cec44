use crate::input::capability::Capability;
use chrono::{DateTime, Local, TimeDelta};
use std::fmt;

/// Value carried by a raw input event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputValue {
    Bool(bool),
    Float(f64),
    Vector2 { x: Option<f64>, y: Option<f64> },
}

impl InputValue {
    /// Magnitude of the value; booleans map to 0.0/1.0
    pub fn magnitude(&self) -> f64 {
        match self {
            InputValue::Bool(pressed) => {
                if *pressed {
                    1.0
                } else {
                    0.0
                }
            }
            InputValue::Float(value) => value.abs(),
            InputValue::Vector2 { x, y } => {
                let x = x.unwrap_or(0.0);
                let y = y.unwrap_or(0.0);
                (x.powi(2) + y.powi(2)).sqrt()
            }
        }
    }

    /// Resting value of a capability: released, centered or zero
    pub fn neutral(capability: Capability) -> Self {
        match capability {
            Capability::GamepadAxis(_) | Capability::MouseMotion => InputValue::Vector2 {
                x: Some(0.0),
                y: Some(0.0),
            },
            Capability::GamepadTrigger(_) => InputValue::Float(0.0),
            _ => InputValue::Bool(false),
        }
    }

    /// Whether this value counts as an activation. Analog values are active
    /// strictly above `threshold`.
    pub fn is_active(&self, threshold: f64) -> bool {
        match self {
            InputValue::Bool(pressed) => *pressed,
            _ => self.magnitude() > threshold,
        }
    }
}

// Raw event from one physical source, with local timestamp
#[derive(Debug, Clone)]
pub struct NativeEvent {
    pub capability: Capability,
    pub value: InputValue,
    pub timestamp: DateTime<Local>,
}

impl NativeEvent {
    pub fn new(capability: Capability, value: InputValue) -> Self {
        Self {
            capability,
            value,
            timestamp: Local::now(),
        }
    }

    pub fn pressed(capability: Capability) -> Self {
        Self::new(capability, InputValue::Bool(true))
    }

    pub fn released(capability: Capability) -> Self {
        Self::new(capability, InputValue::Bool(false))
    }

    /// Time since the reader stamped the event
    pub fn age(&self) -> TimeDelta {
        Local::now().signed_duration_since(self.timestamp)
    }
}

/// Event submitted to a target emulator
#[derive(Debug, Clone, PartialEq)]
pub struct TargetEvent {
    pub capability: Capability,
    pub activated: bool,
    /// Analog payload; `None` for digital capabilities and chord outputs
    pub value: Option<InputValue>,
}

impl TargetEvent {
    pub fn activate(capability: Capability) -> Self {
        Self {
            capability,
            activated: true,
            value: None,
        }
    }

    pub fn deactivate(capability: Capability) -> Self {
        Self {
            capability,
            activated: false,
            value: None,
        }
    }
}

impl fmt::Display for TargetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.activated { "on" } else { "off" };
        match self.value {
            Some(InputValue::Float(value)) => {
                write!(f, "{} {} ({:.3})", self.capability, state, value)
            }
            Some(InputValue::Vector2 { x, y }) => write!(
                f,
                "{} {} ({:.3}, {:.3})",
                self.capability,
                state,
                x.unwrap_or(0.0),
                y.unwrap_or(0.0)
            ),
            Some(InputValue::Bool(_)) | None => write!(f, "{} {}", self.capability, state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analog_values_activate_above_threshold() {
        assert!(!InputValue::Float(0.35).is_active(0.35));
        assert!(InputValue::Float(-0.6).is_active(0.35));
        assert!(InputValue::Vector2 {
            x: Some(0.3),
            y: Some(0.3)
        }
        .is_active(0.35));
        assert!(!InputValue::Vector2 { x: None, y: None }.is_active(0.35));
        assert!(InputValue::Bool(true).is_active(0.99));
    }

    #[test]
    fn age_counts_from_the_read_timestamp() {
        let mut event = NativeEvent::pressed(Capability::MouseMotion);
        assert!(event.age() >= TimeDelta::zero());

        event.timestamp = Local::now() - TimeDelta::milliseconds(250);
        assert!(event.age() >= TimeDelta::milliseconds(250));
        assert!(event.age() < TimeDelta::seconds(5));
    }
}
