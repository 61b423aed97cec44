use crate::input::CapabilityClass;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Virtual output device classes a profile can request
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    Gamepad,
    Xb360,
    XboxElite,
    XboxSeries,
    Ds5,
    Ds5Edge,
    Deck,
    Keyboard,
    Mouse,
    Touchpad,
    /// Overlay sink, accepts everything
    Dbus,
}

impl TargetKind {
    pub fn accepts(&self, class: CapabilityClass) -> bool {
        match self {
            TargetKind::Gamepad
            | TargetKind::Xb360
            | TargetKind::XboxElite
            | TargetKind::XboxSeries
            | TargetKind::Ds5
            | TargetKind::Ds5Edge
            | TargetKind::Deck => class == CapabilityClass::Gamepad,
            TargetKind::Keyboard => class == CapabilityClass::Keyboard,
            TargetKind::Mouse => class == CapabilityClass::Mouse,
            // Touch input is not part of the capability model
            TargetKind::Touchpad => false,
            TargetKind::Dbus => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Gamepad => "gamepad",
            TargetKind::Xb360 => "xb360",
            TargetKind::XboxElite => "xbox-elite",
            TargetKind::XboxSeries => "xbox-series",
            TargetKind::Ds5 => "ds5",
            TargetKind::Ds5Edge => "ds5-edge",
            TargetKind::Deck => "deck",
            TargetKind::Keyboard => "keyboard",
            TargetKind::Mouse => "mouse",
            TargetKind::Touchpad => "touchpad",
            TargetKind::Dbus => "dbus",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
