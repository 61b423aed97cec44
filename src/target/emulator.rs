//! Gateway contract toward virtual output devices
//!
//! The OS side (uinput, overlay bus) lives outside this crate. An emulator only
//! has to accept target events in submission order and report failures.

use super::kind::TargetKind;
use crate::input::{Capability, TargetEvent};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmulatorError {
    #[error("Write to {kind} target failed: {reason}")]
    WriteFailed { kind: TargetKind, reason: String },

    #[error("{kind} target cannot emit {capability}")]
    Unsupported {
        kind: TargetKind,
        capability: Capability,
    },

    #[error("{0} target is closed")]
    Closed(TargetKind),

    #[error("Failed to create {kind} target: {reason}")]
    Create { kind: TargetKind, reason: String },
}

/// Sink for one virtual device. Called from a blocking worker thread.
pub trait TargetEmulator: Send + 'static {
    fn kind(&self) -> TargetKind;

    fn apply(&mut self, event: &TargetEvent) -> Result<(), EmulatorError>;

    /// Called once when the owning instance tears the target down
    fn close(&mut self) {}
}

/// Creates emulators when an instance starts
pub trait TargetFactory: Send + Sync + 'static {
    fn create(&self, kind: TargetKind, instance: &str)
        -> Result<Box<dyn TargetEmulator>, EmulatorError>;
}

/// Emulator that only logs what it would emit
#[derive(Debug)]
pub struct LoggingEmulator {
    kind: TargetKind,
    instance: String,
    written: u64,
}

impl TargetEmulator for LoggingEmulator {
    fn kind(&self) -> TargetKind {
        self.kind
    }

    fn apply(&mut self, event: &TargetEvent) -> Result<(), EmulatorError> {
        self.written += 1;
        info!("[{}/{}] {}", self.instance, self.kind, event);
        Ok(())
    }

    fn close(&mut self) {
        debug!(
            "[{}/{}] closed after {} events",
            self.instance, self.kind, self.written
        );
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTargetFactory;

impl TargetFactory for LoggingTargetFactory {
    fn create(
        &self,
        kind: TargetKind,
        instance: &str,
    ) -> Result<Box<dyn TargetEmulator>, EmulatorError> {
        Ok(Box::new(LoggingEmulator {
            kind,
            instance: instance.to_string(),
            written: 0,
        }))
    }
}
