//! Target emulator gateway: the only write path out of a composite device.

pub mod device;
pub mod emulator;
pub mod kind;
pub mod router;

pub use device::{TargetClient, TargetCommand, TargetDevice, TargetFailure};
pub use emulator::{
    EmulatorError, LoggingEmulator, LoggingTargetFactory, TargetEmulator, TargetFactory,
};
pub use kind::TargetKind;
pub use router::TargetRouter;
