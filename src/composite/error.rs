use crate::device::{ClaimError, DeviceId};
use crate::target::EmulatorError;
use thiserror::Error;

/// Errors of composite instances and the manager
#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("Channel to {0} closed")]
    ChannelClosed(String),

    #[error("Unknown profile '{0}'")]
    UnknownProfile(String),

    #[error("Device {0} is already registered")]
    DuplicateDevice(DeviceId),

    #[error("Device {0} is unknown")]
    UnknownDevice(DeviceId),

    #[error("Profile '{0}' has no live instance")]
    NoInstance(String),

    #[error("Instance '{0}' cannot resume: a required group is empty")]
    NotSatisfied(String),

    #[error("Instance failed to start: {0}")]
    Start(#[from] EmulatorError),

    #[error(transparent)]
    Claim(#[from] ClaimError),
}
