//! Per-device forwarder
//!
//! Every physical device gets one forwarder task. The external reader pushes
//! raw events through a [`SourceClient`]; the forwarder passes them on to the
//! composite instances the device is bound to.
//!
//! ```text
//! reader ──SourceClient──► SourceDevice ──► CompositeDevice(s)
//!                              ▲
//!            manager ──Attach/Detach┘
//! ```
//!
//! Each attached instance is fed by its own relay task with its own queue.
//! Attach and detach go through that queue too, so a device's last event
//! always reaches an instance before its removal notice, and its first event
//! only after the instance knows about it. A full instance channel only holds
//! back that instance's relay.

use super::physical::DeviceId;
use crate::composite::{CompositeClient, CompositeError};
use crate::input::NativeEvent;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

#[derive(Debug)]
pub enum SourceCommand {
    Event(NativeEvent),
    Attach {
        profile: usize,
        client: CompositeClient,
        exclusive: bool,
    },
    Detach {
        profile: usize,
        ack: oneshot::Sender<()>,
    },
    Stop,
}

enum RouteCommand {
    Event(NativeEvent),
    Detach(oneshot::Sender<()>),
}

struct Route {
    profile: usize,
    exclusive: bool,
    tx: mpsc::UnboundedSender<RouteCommand>,
}

/// Handle given to whoever reads the physical device
#[derive(Debug, Clone)]
pub struct SourceClient {
    id: DeviceId,
    tx: mpsc::Sender<SourceCommand>,
    grabbed: watch::Receiver<bool>,
}

impl SourceClient {
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    /// Fails once the device was removed
    pub async fn send_event(&self, event: NativeEvent) -> Result<(), CompositeError> {
        self.tx
            .send(SourceCommand::Event(event))
            .await
            .map_err(|_| CompositeError::ChannelClosed(format!("source {}", self.id)))
    }

    /// True while the device is hidden from the host's normal input path
    pub fn grabbed(&self) -> watch::Receiver<bool> {
        self.grabbed.clone()
    }

    pub fn is_grabbed(&self) -> bool {
        *self.grabbed.borrow()
    }
}

/// Manager side of a forwarder
#[derive(Debug)]
pub struct SourceHandle {
    client: SourceClient,
    task: JoinHandle<()>,
}

impl SourceHandle {
    pub fn client(&self) -> SourceClient {
        self.client.clone()
    }

    pub async fn attach(
        &self,
        profile: usize,
        client: CompositeClient,
        exclusive: bool,
    ) -> Result<(), CompositeError> {
        self.send(SourceCommand::Attach {
            profile,
            client,
            exclusive,
        })
        .await
    }

    /// Resolves once the instance has processed every earlier event of this
    /// device and released what it held
    pub async fn detach(&self, profile: usize) -> Result<(), CompositeError> {
        let (ack, done) = oneshot::channel();
        self.send(SourceCommand::Detach { profile, ack }).await?;
        done.await
            .map_err(|_| CompositeError::ChannelClosed(format!("source {}", self.client.id)))
    }

    pub async fn stop(self) {
        if self.send(SourceCommand::Stop).await.is_ok() {
            if let Err(e) = self.task.await {
                warn!("Forwarder for {} ended abnormally: {}", self.client.id, e);
            }
        }
    }

    async fn send(&self, command: SourceCommand) -> Result<(), CompositeError> {
        self.client
            .tx
            .send(command)
            .await
            .map_err(|_| CompositeError::ChannelClosed(format!("source {}", self.client.id)))
    }
}

pub struct SourceDevice {
    id: DeviceId,
    rx: mpsc::Receiver<SourceCommand>,
    grabbed: watch::Sender<bool>,
    routes: Vec<Route>,
}

impl SourceDevice {
    pub fn spawn(id: DeviceId, buffer: usize) -> SourceHandle {
        let (tx, rx) = mpsc::channel(buffer);
        let (grabbed_tx, grabbed_rx) = watch::channel(false);
        let forwarder = SourceDevice {
            id: id.clone(),
            rx,
            grabbed: grabbed_tx,
            routes: Vec::new(),
        };

        debug!("Spawning forwarder for {}", id);
        let task = tokio::spawn(forwarder.run());
        SourceHandle {
            client: SourceClient {
                id,
                tx,
                grabbed: grabbed_rx,
            },
            task,
        }
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                SourceCommand::Event(event) => self.forward(event),
                SourceCommand::Attach {
                    profile,
                    client,
                    exclusive,
                } => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    tokio::spawn(relay(self.id.clone(), profile, client, rx));
                    self.routes.push(Route {
                        profile,
                        exclusive,
                        tx,
                    });
                    self.update_grab();
                }
                SourceCommand::Detach { profile, ack } => {
                    let Some(pos) = self.routes.iter().position(|r| r.profile == profile) else {
                        let _ = ack.send(());
                        continue;
                    };
                    let route = self.routes.remove(pos);
                    self.update_grab();
                    // Relay schon beendet: nichts mehr auszuliefern
                    if let Err(mpsc::error::SendError(RouteCommand::Detach(ack))) =
                        route.tx.send(RouteCommand::Detach(ack))
                    {
                        let _ = ack.send(());
                    }
                }
                SourceCommand::Stop => break,
            }
        }
        info!("Forwarder for {} stopped", self.id);
    }

    fn forward(&self, event: NativeEvent) {
        if self.routes.is_empty() {
            trace!("{} is unbound, dropping {}", self.id, event.capability);
            return;
        }
        for route in &self.routes {
            if route.tx.send(RouteCommand::Event(event.clone())).is_err() {
                debug!("Relay of {} for profile {} is gone", self.id, route.profile);
            }
        }
    }

    fn update_grab(&self) {
        let grabbed = self.routes.iter().any(|r| r.exclusive);
        self.grabbed.send_if_modified(|current| {
            if *current != grabbed {
                info!(
                    "{} {}",
                    self.id,
                    if grabbed { "grabbed" } else { "released to host" }
                );
                *current = grabbed;
                true
            } else {
                false
            }
        });
    }
}

/// Delivers one device's traffic to one instance, in order
async fn relay(
    id: DeviceId,
    profile: usize,
    client: CompositeClient,
    mut rx: mpsc::UnboundedReceiver<RouteCommand>,
) {
    if let Err(e) = client.add_source(id.clone()).await {
        warn!("Could not attach {} to profile {}: {}", id, profile, e);
        // Detach wartet sonst auf ein Ack, das nie kommt
        while let Some(command) = rx.recv().await {
            if let RouteCommand::Detach(ack) = command {
                let _ = ack.send(());
            }
        }
        return;
    }
    while let Some(command) = rx.recv().await {
        match command {
            RouteCommand::Event(event) => {
                if let Err(e) = client.send_event(id.clone(), event).await {
                    debug!("Dropping event of {} for '{}': {}", id, client.name(), e);
                }
            }
            RouteCommand::Detach(ack) => {
                if let Err(e) = client.remove_source(id.clone()).await {
                    debug!("Instance gone while detaching {}: {}", id, e);
                }
                let _ = ack.send(());
                return;
            }
        }
    }
    trace!("Relay of {} to '{}' closed", id, client.name());
}
