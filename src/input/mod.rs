//! Input model: the closed capability vocabulary and the events built on it.
//!
//! ```text
//! PhysicalDevice ──► NativeEvent ──► ChordEngine ──► TargetEvent ──► TargetEmulator
//! ```

pub mod capability;
pub mod event;

pub use capability::{
    Capability, CapabilityClass, CapabilityConfig, CapabilityError, GamepadAxis, GamepadButton,
    GamepadTrigger, KeyCode, MouseButton,
};
pub use event::{InputValue, NativeEvent, TargetEvent};
