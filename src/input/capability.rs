//! Closed capability model shared by every subsystem.
//!
//! A [`Capability`] names one discrete or continuous input signal. All
//! vocabularies (keys, buttons, axes, triggers) are closed enums so that
//! capabilities hash exactly and the set of claimed capabilities in a
//! [`crate::mapping::CapabilityMap`] is total.
//!
//! The document form ([`CapabilityConfig`]) is the tagged representation used in
//! YAML documents:
//!
//! ```text
//! keyboard: KeyLeftMeta
//! gamepad: { button: QuickAccess }
//! gamepad: { axis: LeftStick }
//! mouse:   { motion: {} }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A single input signal class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Keyboard(KeyCode),
    GamepadButton(GamepadButton),
    GamepadAxis(GamepadAxis),
    GamepadTrigger(GamepadTrigger),
    MouseButton(MouseButton),
    MouseMotion,
}

/// Coarse class of a capability, used to route events to a target kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityClass {
    Keyboard,
    Gamepad,
    Mouse,
}

impl Capability {
    pub fn class(&self) -> CapabilityClass {
        match self {
            Capability::Keyboard(_) => CapabilityClass::Keyboard,
            Capability::GamepadButton(_)
            | Capability::GamepadAxis(_)
            | Capability::GamepadTrigger(_) => CapabilityClass::Gamepad,
            Capability::MouseButton(_) | Capability::MouseMotion => CapabilityClass::Mouse,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Keyboard(key) => write!(f, "Keyboard:{:?}", key),
            Capability::GamepadButton(button) => write!(f, "Gamepad:Button:{:?}", button),
            Capability::GamepadAxis(axis) => write!(f, "Gamepad:Axis:{:?}", axis),
            Capability::GamepadTrigger(trigger) => write!(f, "Gamepad:Trigger:{:?}", trigger),
            Capability::MouseButton(button) => write!(f, "Mouse:Button:{:?}", button),
            Capability::MouseMotion => write!(f, "Mouse:Motion"),
        }
    }
}

impl fmt::Display for CapabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityClass::Keyboard => write!(f, "keyboard"),
            CapabilityClass::Gamepad => write!(f, "gamepad"),
            CapabilityClass::Mouse => write!(f, "mouse"),
        }
    }
}

// Gamepad buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GamepadButton {
    South,
    East,
    North,
    West,
    Start,
    Select,
    Guide,
    QuickAccess,
    QuickAccess2,
    Keyboard,
    Screenshot,
    Mute,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
    LeftBumper,
    RightBumper,
    LeftTrigger,
    RightTrigger,
    LeftStick,
    RightStick,
    LeftStickTouch,
    RightStickTouch,
    LeftPaddle1,
    LeftPaddle2,
    LeftPaddle3,
    RightPaddle1,
    RightPaddle2,
    RightPaddle3,
    LeftTop,
    RightTop,
}

// Gamepad axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GamepadAxis {
    LeftStick,
    RightStick,
    Hat0,
    Hat1,
    Hat2,
    Hat3,
}

// Gamepad triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GamepadTrigger {
    LeftTrigger,
    RightTrigger,
    LeftTouchpadForce,
    RightTouchpadForce,
    LeftStickForce,
    RightStickForce,
}

// Mouse buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    WheelUp,
    WheelDown,
    WheelLeft,
    WheelRight,
    Extra,
    Side,
}

/// Keyboard key codes, named after the Linux input event codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyCode {
    KeyEsc,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,
    Key0,
    KeyMinus,
    KeyEqual,
    KeyBackspace,
    KeyTab,
    KeyQ,
    KeyW,
    KeyE,
    KeyR,
    KeyT,
    KeyY,
    KeyU,
    KeyI,
    KeyO,
    KeyP,
    KeyLeftBrace,
    KeyRightBrace,
    KeyEnter,
    KeyLeftCtrl,
    KeyA,
    KeyS,
    KeyD,
    KeyF,
    KeyG,
    KeyH,
    KeyJ,
    KeyK,
    KeyL,
    KeySemicolon,
    KeyApostrophe,
    KeyGrave,
    KeyLeftShift,
    KeyBackslash,
    KeyZ,
    KeyX,
    KeyC,
    KeyV,
    KeyB,
    KeyN,
    KeyM,
    KeyComma,
    KeyDot,
    KeySlash,
    KeyRightShift,
    KeyKpAsterisk,
    KeyLeftAlt,
    KeySpace,
    KeyCapsLock,
    KeyF1,
    KeyF2,
    KeyF3,
    KeyF4,
    KeyF5,
    KeyF6,
    KeyF7,
    KeyF8,
    KeyF9,
    KeyF10,
    KeyF11,
    KeyF12,
    KeyF13,
    KeyF14,
    KeyF15,
    KeyF16,
    KeyF17,
    KeyF18,
    KeyF19,
    KeyF20,
    KeyF21,
    KeyF22,
    KeyF23,
    KeyF24,
    KeyNumLock,
    KeyScrollLock,
    KeyKp0,
    KeyKp1,
    KeyKp2,
    KeyKp3,
    KeyKp4,
    KeyKp5,
    KeyKp6,
    KeyKp7,
    KeyKp8,
    KeyKp9,
    KeyKpMinus,
    KeyKpPlus,
    KeyKpDot,
    KeyKpEnter,
    KeyKpSlash,
    KeyRightCtrl,
    KeySysrq,
    KeyRightAlt,
    KeyHome,
    KeyUp,
    KeyPageUp,
    KeyLeft,
    KeyRight,
    KeyEnd,
    KeyDown,
    KeyPageDown,
    KeyInsert,
    KeyDelete,
    KeyMute,
    KeyVolumeDown,
    KeyVolumeUp,
    KeyPower,
    KeyPause,
    KeyLeftMeta,
    KeyRightMeta,
    KeyCompose,
    KeyStop,
    KeyAgain,
    KeyProps,
    KeyUndo,
    KeyFront,
    KeyCopy,
    KeyOpen,
    KeyPaste,
    KeyFind,
    KeyCut,
    KeyHelp,
    KeyMenu,
    KeyCalc,
    KeySleep,
    KeyWakeup,
    KeyProg1,
    KeyProg2,
    KeyProg3,
    KeyProg4,
    KeyMail,
    KeyBack,
    KeyForward,
    KeyNextSong,
    KeyPlayPause,
    KeyPreviousSong,
    KeyStopCd,
    KeyRefresh,
    KeyBrightnessDown,
    KeyBrightnessUp,
    KeyKbdIllumToggle,
    KeyKbdIllumDown,
    KeyKbdIllumUp,
    KeyMicMute,
    KeyZenkakuhankaku,
    Key102nd,
    KeyRo,
    KeyKatakana,
    KeyHiragana,
    KeyHenkan,
    KeyKatakanaHiragana,
    KeyMuhenkan,
    KeyKpJpComma,
    KeyHanguel,
    KeyHanja,
    KeyYen,
}

/// Errors produced when converting the document form into a [`Capability`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("capability declares no input")]
    Empty,

    #[error("capability declares more than one input: {0}")]
    Ambiguous(String),
}

/// Document form of a capability: exactly one of `keyboard`, `gamepad`, `mouse`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CapabilityConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<KeyCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamepad: Option<GamepadCapabilityConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouse: Option<MouseCapabilityConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GamepadCapabilityConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis: Option<GamepadAxis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<GamepadButton>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<GamepadTrigger>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MouseCapabilityConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<MouseButton>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion: Option<MouseMotionConfig>,
}

/// Mouse motion block. The speed hint belongs to the emulator and is not
/// interpreted by the mapping engine.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MouseMotionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_pps: Option<u64>,
}

impl TryFrom<&CapabilityConfig> for Capability {
    type Error = CapabilityError;

    fn try_from(config: &CapabilityConfig) -> Result<Self, Self::Error> {
        let mut found: Vec<Capability> = Vec::new();

        if let Some(key) = config.keyboard {
            found.push(Capability::Keyboard(key));
        }
        if let Some(gamepad) = &config.gamepad {
            if let Some(axis) = gamepad.axis {
                found.push(Capability::GamepadAxis(axis));
            }
            if let Some(button) = gamepad.button {
                found.push(Capability::GamepadButton(button));
            }
            if let Some(trigger) = gamepad.trigger {
                found.push(Capability::GamepadTrigger(trigger));
            }
        }
        if let Some(mouse) = &config.mouse {
            if let Some(button) = mouse.button {
                found.push(Capability::MouseButton(button));
            }
            if mouse.motion.is_some() {
                found.push(Capability::MouseMotion);
            }
        }

        match found.as_slice() {
            [] => Err(CapabilityError::Empty),
            [capability] => Ok(*capability),
            many => Err(CapabilityError::Ambiguous(
                many.iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            )),
        }
    }
}

impl From<Capability> for CapabilityConfig {
    fn from(capability: Capability) -> Self {
        let mut config = CapabilityConfig::default();
        match capability {
            Capability::Keyboard(key) => config.keyboard = Some(key),
            Capability::GamepadButton(button) => {
                config.gamepad = Some(GamepadCapabilityConfig {
                    button: Some(button),
                    ..Default::default()
                })
            }
            Capability::GamepadAxis(axis) => {
                config.gamepad = Some(GamepadCapabilityConfig {
                    axis: Some(axis),
                    ..Default::default()
                })
            }
            Capability::GamepadTrigger(trigger) => {
                config.gamepad = Some(GamepadCapabilityConfig {
                    trigger: Some(trigger),
                    ..Default::default()
                })
            }
            Capability::MouseButton(button) => {
                config.mouse = Some(MouseCapabilityConfig {
                    button: Some(button),
                    ..Default::default()
                })
            }
            Capability::MouseMotion => {
                config.mouse = Some(MouseCapabilityConfig {
                    motion: Some(MouseMotionConfig::default()),
                    ..Default::default()
                })
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<Capability, String> {
        let config: CapabilityConfig = serde_yaml::from_str(yaml).map_err(|e| e.to_string())?;
        Capability::try_from(&config).map_err(|e| e.to_string())
    }

    #[test]
    fn parses_each_document_form() {
        assert_eq!(
            parse("keyboard: KeyLeftMeta"),
            Ok(Capability::Keyboard(KeyCode::KeyLeftMeta))
        );
        assert_eq!(
            parse("gamepad:\n  button: QuickAccess"),
            Ok(Capability::GamepadButton(GamepadButton::QuickAccess))
        );
        assert_eq!(
            parse("gamepad:\n  axis: LeftStick"),
            Ok(Capability::GamepadAxis(GamepadAxis::LeftStick))
        );
        assert_eq!(
            parse("gamepad:\n  trigger: RightTrigger"),
            Ok(Capability::GamepadTrigger(GamepadTrigger::RightTrigger))
        );
        assert_eq!(
            parse("mouse:\n  button: Middle"),
            Ok(Capability::MouseButton(MouseButton::Middle))
        );
        assert_eq!(parse("mouse:\n  motion: {}"), Ok(Capability::MouseMotion));
    }

    #[test]
    fn rejects_unknown_identifiers_and_fields() {
        assert!(parse("keyboard: KeyDoesNotExist").is_err());
        assert!(parse("touchscreen: {}").is_err());
        assert!(parse("gamepad:\n  button: South\n  hat: 1").is_err());
    }

    #[test]
    fn rejects_empty_and_ambiguous_capabilities() {
        assert_eq!(parse("gamepad: {}"), Err(CapabilityError::Empty.to_string()));
        let ambiguous = parse("keyboard: KeyA\nmouse:\n  button: Left");
        assert!(matches!(ambiguous, Err(msg) if msg.contains("more than one")));
    }

    #[test]
    fn class_follows_the_tag() {
        assert_eq!(
            Capability::Keyboard(KeyCode::KeyD).class(),
            CapabilityClass::Keyboard
        );
        assert_eq!(
            Capability::GamepadTrigger(GamepadTrigger::LeftTrigger).class(),
            CapabilityClass::Gamepad
        );
        assert_eq!(Capability::MouseMotion.class(), CapabilityClass::Mouse);
    }

    #[test]
    fn document_form_round_trips_a_gamepad_button() {
        let capability = Capability::GamepadButton(GamepadButton::Guide);
        let config = CapabilityConfig::from(capability);
        assert_eq!(Capability::try_from(&config), Ok(capability));
    }
}
