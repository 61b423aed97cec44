//! Composite device instance
//!
//! One task per live instance. Every event of every bound source, every
//! hot-plug notice and every lifecycle command goes through the same channel,
//! so the chord engine has exactly one writer.
//!
//! ```text
//! SourceDevice ─┐
//! SourceDevice ─┼─► CompositeCommand ──► ChordEngine ──► TargetRouter ──► TargetDevice(s)
//! manager ──────┘                                                             │
//!         ▲                                                                   │
//!         └── watch<LifecycleState>          TargetFailure ◄──────────────────┘
//! ```

use super::error::CompositeError;
use crate::config::{EmulatorConfig, ServiceConfig};
use crate::device::DeviceId;
use crate::input::{Capability, InputValue, NativeEvent, TargetEvent};
use crate::mapping::{CapabilityMap, ChordEngine};
use crate::target::{
    EmulatorError, TargetClient, TargetDevice, TargetFactory, TargetFailure, TargetKind,
    TargetRouter,
};
use statum::{machine, state};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Assembling,
    Active,
    Suspended,
    Removed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Assembling => "assembling",
            LifecycleState::Active => "active",
            LifecycleState::Suspended => "suspended",
            LifecycleState::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// Runtime knobs of an instance, taken from the service config
#[derive(Debug, Clone, Copy)]
pub struct InstanceSettings {
    pub axis_threshold: f64,
    pub instance_buffer: usize,
    pub emulator: EmulatorConfig,
}

impl From<&ServiceConfig> for InstanceSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            axis_threshold: config.axis_threshold,
            instance_buffer: config.channels.instance_buffer,
            emulator: config.emulator,
        }
    }
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self::from(&ServiceConfig::default())
    }
}

#[derive(Debug)]
pub enum CompositeCommand {
    Event {
        device: DeviceId,
        event: NativeEvent,
    },
    AddSource {
        device: DeviceId,
    },
    RemoveSource {
        device: DeviceId,
        ack: oneshot::Sender<()>,
    },
    Suspend {
        ack: oneshot::Sender<()>,
    },
    Resume {
        ack: oneshot::Sender<()>,
    },
    Stop {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to a running instance
#[derive(Debug, Clone)]
pub struct CompositeClient {
    name: String,
    tx: mpsc::Sender<CompositeCommand>,
    status: watch::Receiver<LifecycleState>,
}

impl CompositeClient {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        *self.status.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.status.clone()
    }

    pub async fn send_event(&self, device: DeviceId, event: NativeEvent) -> Result<(), CompositeError> {
        self.send(CompositeCommand::Event { device, event }).await
    }

    pub async fn add_source(&self, device: DeviceId) -> Result<(), CompositeError> {
        self.send(CompositeCommand::AddSource { device }).await
    }

    pub async fn remove_source(&self, device: DeviceId) -> Result<(), CompositeError> {
        let (ack, done) = oneshot::channel();
        self.send(CompositeCommand::RemoveSource { device, ack }).await?;
        self.acked(done).await
    }

    pub async fn suspend(&self) -> Result<(), CompositeError> {
        let (ack, done) = oneshot::channel();
        self.send(CompositeCommand::Suspend { ack }).await?;
        self.acked(done).await
    }

    pub async fn resume(&self) -> Result<(), CompositeError> {
        let (ack, done) = oneshot::channel();
        self.send(CompositeCommand::Resume { ack }).await?;
        self.acked(done).await
    }

    pub async fn stop(&self) -> Result<(), CompositeError> {
        let (ack, done) = oneshot::channel();
        self.send(CompositeCommand::Stop { ack }).await?;
        self.acked(done).await
    }

    async fn send(&self, command: CompositeCommand) -> Result<(), CompositeError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| CompositeError::ChannelClosed(format!("instance '{}'", self.name)))
    }

    async fn acked(&self, done: oneshot::Receiver<()>) -> Result<(), CompositeError> {
        done.await
            .map_err(|_| CompositeError::ChannelClosed(format!("instance '{}'", self.name)))
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum InstanceState {
    Assembling,
    Running,
}

#[machine]
#[derive(Debug)]
pub struct CompositeDevice<S: InstanceState> {
    name: String,
    engine: ChordEngine,
    axis_threshold: f64,
    router: TargetRouter,
    target_tasks: Vec<JoinHandle<()>>,
    rx: mpsc::Receiver<CompositeCommand>,
    failures_tx: mpsc::Sender<TargetFailure>,
    failures_rx: mpsc::Receiver<TargetFailure>,
    status: watch::Sender<LifecycleState>,
    // Aktive Capabilities je Quelle
    sources: HashMap<DeviceId, HashSet<Capability>>,
}

impl CompositeDevice<Assembling> {
    pub fn create(
        name: &str,
        map: Arc<CapabilityMap>,
        settings: &InstanceSettings,
    ) -> (Self, CompositeClient) {
        let (tx, rx) = mpsc::channel(settings.instance_buffer);
        let (status_tx, status_rx) = watch::channel(LifecycleState::Assembling);
        let (failures_tx, failures_rx) = mpsc::channel(8);

        if map.is_passthrough() {
            info!("'{}' runs in pass-through mode", name);
        } else {
            info!("'{}' uses capability map '{}'", name, map.id);
        }

        let device = Self::new(
            name.to_string(),
            ChordEngine::new(map, settings.axis_threshold),
            settings.axis_threshold,
            TargetRouter::default(),
            Vec::new(),
            rx,
            failures_tx,
            failures_rx,
            status_tx,
            HashMap::new(),
        );
        let client = CompositeClient {
            name: name.to_string(),
            tx,
            status: status_rx,
        };
        (device, client)
    }

    /// Starts one target per kind, then hands over to the event loop
    pub fn start_targets(
        mut self,
        kinds: &[TargetKind],
        factory: &dyn TargetFactory,
        settings: &InstanceSettings,
    ) -> Result<CompositeDevice<Running>, EmulatorError> {
        let mut clients: Vec<TargetClient> = Vec::with_capacity(kinds.len());
        for kind in kinds {
            if clients.iter().any(|c| c.kind() == *kind) {
                warn!("'{}' declares target {} twice, ignoring", self.name, kind);
                continue;
            }
            let emulator = match factory.create(*kind, &self.name) {
                Ok(emulator) => emulator,
                Err(e) => {
                    error!("'{}' failed to create {} target: {}", self.name, kind, e);
                    // Bereits gestartete Targets enden mit ihren Kanälen
                    return Err(e);
                }
            };
            let (client, handle) = TargetDevice::spawn(
                emulator,
                &self.name,
                settings.emulator,
                self.failures_tx.clone(),
            );
            clients.push(client);
            self.target_tasks.push(handle);
        }

        if clients.is_empty() {
            warn!("'{}' has no targets, events will be dropped", self.name);
        }
        self.router = TargetRouter::new(clients);
        info!(
            "'{}' assembled with targets {:?}, transitioning to Running",
            self.name,
            self.router.kinds()
        );
        Ok(self.transition())
    }
}

impl CompositeDevice<Running> {
    pub fn spawn(self) -> JoinHandle<()> {
        self.publish(LifecycleState::Active);
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(CompositeCommand::Stop { ack }) => {
                        self.teardown().await;
                        let _ = ack.send(());
                        return;
                    }
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(failure) = self.failures_rx.recv() => self.on_target_failure(failure),
            }
        }
        self.teardown().await;
    }

    fn state(&self) -> LifecycleState {
        *self.status.borrow()
    }

    fn publish(&self, state: LifecycleState) {
        self.status.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            info!("'{}' {} -> {}", self.name, current, state);
            *current = state;
            true
        });
    }

    fn handle(&mut self, command: CompositeCommand) {
        match command {
            CompositeCommand::Event { device, event } => self.on_event(device, event),
            CompositeCommand::AddSource { device } => {
                debug!("'{}' bound source {}", self.name, device);
                self.sources.entry(device).or_default();
            }
            CompositeCommand::RemoveSource { device, ack } => {
                self.on_remove_source(&device);
                let _ = ack.send(());
            }
            CompositeCommand::Suspend { ack } => {
                self.suspend();
                let _ = ack.send(());
            }
            CompositeCommand::Resume { ack } => {
                if self.state() == LifecycleState::Suspended {
                    // Reports from before the resume are stale
                    while let Ok(failure) = self.failures_rx.try_recv() {
                        debug!("Discarding stale failure of {} target", failure.kind);
                    }
                    self.publish(LifecycleState::Active);
                }
                let _ = ack.send(());
            }
            CompositeCommand::Stop { ack } => {
                // Handled in run
                let _ = ack.send(());
            }
        }
    }

    fn on_event(&mut self, device: DeviceId, event: NativeEvent) {
        if self.state() != LifecycleState::Active {
            debug!(
                "'{}' is {}, dropping {} from {}",
                self.name,
                self.state(),
                event.capability,
                device
            );
            return;
        }
        let Some(active) = self.sources.get_mut(&device) else {
            debug!("'{}' got event from unbound source {}", self.name, device);
            return;
        };

        let capability = event.capability;
        trace!(
            "'{}' got {} from {}, {}µs after it was read",
            self.name,
            capability,
            device,
            event.age().num_microseconds().unwrap_or(i64::MAX)
        );
        if event.value.is_active(self.axis_threshold) {
            active.insert(capability);
        } else {
            active.remove(&capability);
            // Another source still holds it
            if self.held_elsewhere(&device, &capability) {
                trace!("{} still held by another source of '{}'", capability, self.name);
                return;
            }
        }

        let emitted = self.engine.process(&event);
        self.emit(emitted);
    }

    fn on_remove_source(&mut self, device: &DeviceId) {
        let Some(active) = self.sources.remove(device) else {
            return;
        };
        debug!("'{}' unbound source {}", self.name, device);
        if self.state() != LifecycleState::Active {
            return;
        }

        let mut released: Vec<Capability> = active
            .into_iter()
            .filter(|capability| !self.held_elsewhere(device, capability))
            .collect();
        released.sort();
        for capability in released {
            let event = NativeEvent::new(capability, InputValue::neutral(capability));
            let emitted = self.engine.process(&event);
            self.emit(emitted);
        }
    }

    fn suspend(&mut self) {
        if self.state() == LifecycleState::Suspended {
            return;
        }
        let released = self.engine.reset();
        self.emit(released);
        for active in self.sources.values_mut() {
            active.clear();
        }
        self.publish(LifecycleState::Suspended);
    }

    fn on_target_failure(&mut self, failure: TargetFailure) {
        error!(
            "'{}' suspended, {} target keeps failing: {}",
            self.name, failure.kind, failure.error
        );
        self.suspend();
    }

    fn held_elsewhere(&self, device: &DeviceId, capability: &Capability) -> bool {
        self.sources
            .iter()
            .any(|(id, active)| id != device && active.contains(capability))
    }

    fn emit(&self, events: Vec<TargetEvent>) {
        for event in events {
            match self.router.route(&event) {
                Some(target) => {
                    debug!("'{}' -> {}: {}", self.name, target.kind(), event);
                    if let Err(e) = target.write_event(event) {
                        warn!("'{}' could not submit event: {}", self.name, e);
                    }
                }
                None => trace!("'{}' dropped unroutable {}", self.name, event),
            }
        }
    }

    async fn teardown(&mut self) {
        info!("Tearing down '{}'", self.name);
        let released = self.engine.reset();
        self.emit(released);
        self.sources.clear();

        for target in self.router.targets() {
            if let Err(e) = target.stop() {
                debug!("Target already gone: {}", e);
            }
        }
        for handle in self.target_tasks.drain(..) {
            if let Err(e) = handle.await {
                warn!("Target worker of '{}' ended abnormally: {}", self.name, e);
            }
        }
        self.publish(LifecycleState::Removed);
    }
}

/// Creates an instance, starts its targets and spawns its task
pub fn spawn_instance(
    name: &str,
    map: Arc<CapabilityMap>,
    kinds: &[TargetKind],
    factory: &dyn TargetFactory,
    settings: &InstanceSettings,
) -> Result<(CompositeClient, JoinHandle<()>), CompositeError> {
    let (device, client) = CompositeDevice::create(name, map, settings);
    let running = device.start_targets(kinds, factory, settings)?;
    let handle = running.spawn();
    Ok((client, handle))
}
