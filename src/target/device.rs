//! Target worker: owns one emulator on a blocking thread
//!
//! ```text
//! CompositeDevice ──TargetCommand──► TargetDevice (spawn_blocking)
//!        ▲                                 │ apply() with bounded retry
//!        └─────────── TargetFailure ───────┘
//! ```
//!
//! Submitting never waits on the emulator. A slow or failing emulator only
//! grows its own queue, so the owning instance keeps serving its channel.

use super::emulator::{EmulatorError, TargetEmulator};
use super::kind::TargetKind;
use crate::config::EmulatorConfig;
use crate::input::TargetEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub enum TargetCommand {
    WriteEvent(TargetEvent),
    Stop,
}

/// Persistent write failure reported back to the owning instance
#[derive(Debug, Clone)]
pub struct TargetFailure {
    pub kind: TargetKind,
    pub error: EmulatorError,
}

#[derive(Debug, Clone)]
pub struct TargetClient {
    kind: TargetKind,
    tx: mpsc::UnboundedSender<TargetCommand>,
}

impl TargetClient {
    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn write_event(&self, event: TargetEvent) -> Result<(), EmulatorError> {
        self.tx
            .send(TargetCommand::WriteEvent(event))
            .map_err(|_| EmulatorError::Closed(self.kind))
    }

    /// Queued behind every earlier write
    pub fn stop(&self) -> Result<(), EmulatorError> {
        self.tx
            .send(TargetCommand::Stop)
            .map_err(|_| EmulatorError::Closed(self.kind))
    }
}

pub struct TargetDevice {
    emulator: Box<dyn TargetEmulator>,
    rx: mpsc::UnboundedReceiver<TargetCommand>,
    failures: mpsc::Sender<TargetFailure>,
    retry: EmulatorConfig,
    instance: String,
}

impl TargetDevice {
    pub fn spawn(
        emulator: Box<dyn TargetEmulator>,
        instance: &str,
        retry: EmulatorConfig,
        failures: mpsc::Sender<TargetFailure>,
    ) -> (TargetClient, JoinHandle<()>) {
        let kind = emulator.kind();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = TargetDevice {
            emulator,
            rx,
            failures,
            retry,
            instance: instance.to_string(),
        };

        info!("Starting {} target for '{}'", kind, instance);
        let handle = tokio::task::spawn_blocking(move || worker.run());
        (TargetClient { kind, tx }, handle)
    }

    fn run(mut self) {
        let kind = self.emulator.kind();
        while let Some(command) = self.rx.blocking_recv() {
            match command {
                TargetCommand::WriteEvent(event) => match self.write(&event) {
                    Ok(()) => {}
                    Err(e @ EmulatorError::Unsupported { .. }) => {
                        warn!("[{}] dropping {}: {}", self.instance, event, e);
                    }
                    Err(e) => {
                        error!(
                            "[{}] {} target gave up on {}: {}",
                            self.instance, kind, event, e
                        );
                        // Die Instanz kennt den Fehler bereits, wenn der Kanal voll ist
                        if let Err(e) = self.failures.try_send(TargetFailure { kind, error: e }) {
                            debug!("Failure report for {} target dropped: {}", kind, e);
                        }
                    }
                },
                TargetCommand::Stop => break,
            }
        }
        self.emulator.close();
        info!("[{}] {} target stopped", self.instance, kind);
    }

    fn write(&mut self, event: &TargetEvent) -> Result<(), EmulatorError> {
        let mut attempt = 1;
        loop {
            match self.emulator.apply(event) {
                Ok(()) => return Ok(()),
                Err(e @ EmulatorError::Unsupported { .. }) => return Err(e),
                Err(e) if attempt >= self.retry.max_attempts => return Err(e),
                Err(e) => {
                    warn!(
                        "[{}] write attempt {}/{} failed: {}",
                        self.instance, attempt, self.retry.max_attempts, e
                    );
                    attempt += 1;
                    std::thread::sleep(self.retry.retry_delay());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{Capability, KeyCode};
    use crate::target::emulator::testing::RecordingFactory;
    use crate::target::TargetFactory;
    use std::time::Duration;
    use tokio::time::timeout;

    fn spawn(
        factory: &RecordingFactory,
        failures: mpsc::Sender<TargetFailure>,
    ) -> (TargetClient, JoinHandle<()>) {
        let emulator = factory.create(TargetKind::Keyboard, "test").unwrap();
        TargetDevice::spawn(
            emulator,
            "test",
            EmulatorConfig {
                max_attempts: 3,
                retry_delay_ms: 1,
            },
            failures,
        )
    }

    fn volume_up() -> TargetEvent {
        TargetEvent::activate(Capability::Keyboard(KeyCode::KeyVolumeUp))
    }

    #[tokio::test]
    async fn writes_in_submission_order() {
        let factory = RecordingFactory::default();
        let (failures_tx, _failures_rx) = mpsc::channel(4);
        let (client, handle) = spawn(&factory, failures_tx);

        client.write_event(volume_up()).unwrap();
        client
            .write_event(TargetEvent::deactivate(Capability::Keyboard(
                KeyCode::KeyVolumeUp,
            )))
            .unwrap();
        client.stop().unwrap();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        let events = factory.events();
        assert_eq!(events.len(), 2);
        assert!(events[0].activated);
        assert!(!events[1].activated);
        assert_eq!(factory.closed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let factory = RecordingFactory::default();
        factory.fail(TargetKind::Keyboard, 2);
        let (failures_tx, mut failures_rx) = mpsc::channel(4);
        let (client, handle) = spawn(&factory, failures_tx);

        client.write_event(volume_up()).unwrap();
        client.stop().unwrap();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        assert_eq!(factory.events(), vec![volume_up()]);
        assert!(failures_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn persistent_failure_is_reported() {
        let factory = RecordingFactory::default();
        factory.fail(TargetKind::Keyboard, u32::MAX);
        let (failures_tx, mut failures_rx) = mpsc::channel(4);
        let (client, _handle) = spawn(&factory, failures_tx);

        client.write_event(volume_up()).unwrap();
        let failure = timeout(Duration::from_secs(1), failures_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failure.kind, TargetKind::Keyboard);
        assert!(matches!(failure.error, EmulatorError::WriteFailed { .. }));
        assert!(factory.events().is_empty());
    }

    #[tokio::test]
    async fn unsupported_capability_is_dropped_not_reported() {
        let factory = RecordingFactory::default();
        factory.reject(Capability::Keyboard(KeyCode::KeyVolumeUp));
        let (failures_tx, mut failures_rx) = mpsc::channel(4);
        let (client, handle) = spawn(&factory, failures_tx);

        let mute = TargetEvent::activate(Capability::Keyboard(KeyCode::KeyMute));
        client.write_event(volume_up()).unwrap();
        client.write_event(mute.clone()).unwrap();
        client.stop().unwrap();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

        assert_eq!(factory.events(), vec![mute]);
        assert!(failures_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn writes_never_wait_on_a_slow_emulator() {
        let factory = RecordingFactory::default();
        factory.set_delay(Duration::from_millis(20));
        let (failures_tx, _failures_rx) = mpsc::channel(4);
        let (client, handle) = spawn(&factory, failures_tx);

        let started = std::time::Instant::now();
        for _ in 0..50 {
            client.write_event(volume_up()).unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(100));

        client.stop().unwrap();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(factory.events().len(), 50);
    }
}
