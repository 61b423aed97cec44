//! Composite device manager
//!
//! Single task that owns the device table, the profiles and one instance slot
//! per profile. Hot-plug and external overrides arrive as [`ManagerCommand`]s
//! and are handled strictly one after another.
//!
//! ```text
//!            add/remove device, overrides
//! ManagerClient ───────────────────────► CompositeDeviceManager
//!                                          │  DeviceRegistry (arena + claims)
//!                                          │  DeviceMatcher
//!                                          │  instance per profile:
//!                                          │     (matching) ─► Active ⇄ Suspended ─► Removed
//!                                          ▼
//!                              SourceDevice attach/detach, CompositeDevice start/stop
//! ```
//!
//! A profile that is still matching has no instance and does not show up in
//! [`ManagerClient::list_instances`]. Stopping an instance runs in a task of its
//! own, so draining a slow emulator never holds up the next command.

use super::assembly::Assembly;
use super::device::{spawn_instance, CompositeClient, InstanceSettings, LifecycleState};
use super::error::CompositeError;
use super::profile::CompositeProfile;
use crate::config::ServiceConfig;
use crate::device::{DeviceId, DeviceRegistry, PhysicalDevice, SourceClient, SourceDevice, SourceHandle};
use crate::mapping::CapabilityMapRegistry;
use crate::matching::{host_eligible, DeviceMatcher, HostInfo};
use crate::target::TargetFactory;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Snapshot of one live instance
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceStatus {
    pub name: String,
    pub state: LifecycleState,
    pub groups: BTreeMap<String, Vec<DeviceId>>,
    /// `None` in pass-through mode
    pub capability_map: Option<String>,
}

#[derive(Debug)]
pub enum ManagerCommand {
    AddDevice {
        device: PhysicalDevice,
        reply: oneshot::Sender<Result<SourceClient, CompositeError>>,
    },
    RemoveDevice {
        id: DeviceId,
        reply: oneshot::Sender<Result<(), CompositeError>>,
    },
    SetAutoManage {
        profile: String,
        enabled: bool,
        reply: oneshot::Sender<Result<(), CompositeError>>,
    },
    UpdateHost {
        host: HostInfo,
        reply: oneshot::Sender<()>,
    },
    Resume {
        profile: String,
        reply: oneshot::Sender<Result<(), CompositeError>>,
    },
    ListInstances {
        reply: oneshot::Sender<Vec<InstanceStatus>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone)]
pub struct ManagerClient {
    tx: mpsc::Sender<ManagerCommand>,
}

impl ManagerClient {
    /// Registers a discovered device. The returned client is where the
    /// device's raw events go.
    pub async fn add_device(&self, device: PhysicalDevice) -> Result<SourceClient, CompositeError> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::AddDevice { device, reply }).await?;
        Self::answer(rx).await?
    }

    pub async fn remove_device(&self, id: &DeviceId) -> Result<(), CompositeError> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::RemoveDevice {
            id: id.clone(),
            reply,
        })
        .await?;
        Self::answer(rx).await?
    }

    pub async fn set_auto_manage(&self, profile: &str, enabled: bool) -> Result<(), CompositeError> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::SetAutoManage {
            profile: profile.to_string(),
            enabled,
            reply,
        })
        .await?;
        Self::answer(rx).await?
    }

    pub async fn update_host(&self, host: HostInfo) -> Result<(), CompositeError> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::UpdateHost { host, reply }).await?;
        Self::answer(rx).await
    }

    pub async fn resume(&self, profile: &str) -> Result<(), CompositeError> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::Resume {
            profile: profile.to_string(),
            reply,
        })
        .await?;
        Self::answer(rx).await?
    }

    pub async fn list_instances(&self) -> Result<Vec<InstanceStatus>, CompositeError> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::ListInstances { reply }).await?;
        Self::answer(rx).await
    }

    pub async fn shutdown(&self) -> Result<(), CompositeError> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerCommand::Shutdown { reply }).await?;
        Self::answer(rx).await
    }

    async fn send(&self, command: ManagerCommand) -> Result<(), CompositeError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| CompositeError::ChannelClosed("manager".to_string()))
    }

    async fn answer<T>(rx: oneshot::Receiver<T>) -> Result<T, CompositeError> {
        rx.await
            .map_err(|_| CompositeError::ChannelClosed("manager".to_string()))
    }
}

struct Instance {
    assembly: Assembly,
    client: CompositeClient,
    task: JoinHandle<()>,
    map_id: Option<String>,
    // Nur vom Manager suspendierte Instanzen werden automatisch fortgesetzt
    suspended_by_manager: bool,
}

pub struct CompositeDeviceManager {
    matcher: DeviceMatcher,
    maps: CapabilityMapRegistry,
    registry: DeviceRegistry,
    sources: HashMap<DeviceId, SourceHandle>,
    instances: Vec<Option<Instance>>,
    auto_manage: Vec<Option<bool>>,
    host: HostInfo,
    fallback_host: HostInfo,
    factory: Arc<dyn TargetFactory>,
    settings: InstanceSettings,
    source_buffer: usize,
    // Instanzen im Abbau
    retiring: Vec<JoinHandle<()>>,
    rx: mpsc::Receiver<ManagerCommand>,
}

impl CompositeDeviceManager {
    pub fn spawn(
        profiles: Vec<Arc<CompositeProfile>>,
        maps: CapabilityMapRegistry,
        factory: Arc<dyn TargetFactory>,
        config: &ServiceConfig,
    ) -> (ManagerClient, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.channels.manager_buffer);
        let count = profiles.len();
        info!(
            "Starting composite device manager with {} profiles and {} capability maps",
            count,
            maps.len()
        );

        let manager = CompositeDeviceManager {
            matcher: DeviceMatcher::new(profiles),
            maps,
            registry: DeviceRegistry::new(),
            sources: HashMap::new(),
            instances: (0..count).map(|_| None).collect(),
            auto_manage: vec![None; count],
            host: config.host.clone(),
            fallback_host: config.host.clone(),
            factory,
            settings: InstanceSettings::from(config),
            source_buffer: config.channels.source_buffer,
            retiring: Vec::new(),
            rx,
        };
        let handle = tokio::spawn(manager.run());
        (ManagerClient { tx }, handle)
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                ManagerCommand::AddDevice { device, reply } => {
                    let result = self.add_device(device).await;
                    let _ = reply.send(result);
                }
                ManagerCommand::RemoveDevice { id, reply } => {
                    let result = self.remove_device(&id).await;
                    let _ = reply.send(result);
                }
                ManagerCommand::SetAutoManage {
                    profile,
                    enabled,
                    reply,
                } => {
                    let result = self.set_auto_manage(&profile, enabled).await;
                    let _ = reply.send(result);
                }
                ManagerCommand::UpdateHost { host, reply } => {
                    self.update_host(host).await;
                    let _ = reply.send(());
                }
                ManagerCommand::Resume { profile, reply } => {
                    let result = self.resume(&profile).await;
                    let _ = reply.send(result);
                }
                ManagerCommand::ListInstances { reply } => {
                    let _ = reply.send(self.list_instances());
                }
                ManagerCommand::Shutdown { reply } => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    return;
                }
            }
        }
        self.shutdown().await;
    }

    async fn add_device(&mut self, device: PhysicalDevice) -> Result<SourceClient, CompositeError> {
        let id = device.id.clone();
        if self.registry.contains(&id) {
            return Err(CompositeError::DuplicateDevice(id));
        }
        info!("Device added: {}", device);
        self.registry.insert(device);
        let handle = SourceDevice::spawn(id.clone(), self.source_buffer);
        let client = handle.client();
        self.sources.insert(id, handle);

        self.reconcile().await;
        Ok(client)
    }

    async fn remove_device(&mut self, id: &DeviceId) -> Result<(), CompositeError> {
        if !self.registry.contains(id) {
            return Err(CompositeError::UnknownDevice(id.clone()));
        }
        info!("Device removed: {}", id);

        let affected: Vec<usize> = self
            .instances
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.as_ref().map_or(false, |i| i.assembly.contains(id)))
            .map(|(index, _)| index)
            .collect();

        for &profile in &affected {
            self.unbind(profile, id).await;
        }
        self.registry.remove(id);
        if let Some(source) = self.sources.remove(id) {
            source.stop().await;
        }

        for profile in affected {
            self.settle(profile).await;
        }
        self.reconcile().await;
        Ok(())
    }

    async fn set_auto_manage(&mut self, name: &str, enabled: bool) -> Result<(), CompositeError> {
        let profile = self.profile_index(name)?;
        info!("auto_manage for '{}' set to {}", name, enabled);
        self.auto_manage[profile] = Some(enabled);
        if !enabled {
            self.remove_instance(profile).await;
        }
        self.reconcile().await;
        Ok(())
    }

    async fn update_host(&mut self, host: HostInfo) {
        self.host = host.or(&self.fallback_host);
        info!("Host identity updated: {:?}", self.host);
        for profile in 0..self.instances.len() {
            if self.instances[profile].is_some() && !self.host_allows(profile) {
                self.remove_instance(profile).await;
            }
        }
        self.reconcile().await;
    }

    async fn resume(&mut self, name: &str) -> Result<(), CompositeError> {
        let profile = self.profile_index(name)?;
        let Some(instance) = self.instances[profile].as_mut() else {
            return Err(CompositeError::NoInstance(name.to_string()));
        };
        if !instance.assembly.is_satisfied() {
            return Err(CompositeError::NotSatisfied(name.to_string()));
        }
        instance.client.resume().await?;
        instance.suspended_by_manager = false;
        Ok(())
    }

    fn list_instances(&self) -> Vec<InstanceStatus> {
        self.instances
            .iter()
            .flatten()
            .map(|instance| InstanceStatus {
                name: instance.assembly.profile().name.clone(),
                state: instance.client.state(),
                groups: instance.assembly.groups(),
                capability_map: instance.map_id.clone(),
            })
            .collect()
    }

    async fn shutdown(&mut self) {
        info!("Shutting down composite device manager");
        for profile in 0..self.instances.len() {
            self.remove_instance(profile).await;
        }
        for (_, source) in self.sources.drain() {
            source.stop().await;
        }
        for handle in self.retiring.drain(..) {
            if let Err(e) = handle.await {
                error!("Teardown task ended abnormally: {}", e);
            }
        }
    }

    fn profile_index(&self, name: &str) -> Result<usize, CompositeError> {
        self.matcher
            .profiles()
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| CompositeError::UnknownProfile(name.to_string()))
    }

    fn host_allows(&self, profile: usize) -> bool {
        self.matcher
            .profile(profile)
            .map_or(false, |p| host_eligible(&p.host_matches, &self.host))
    }

    fn gate(&self, profile: usize) -> bool {
        let auto_manage = match (self.auto_manage[profile], self.matcher.profile(profile)) {
            (Some(enabled), _) => enabled,
            (None, Some(p)) => p.auto_manage,
            (None, None) => false,
        };
        auto_manage && self.host_allows(profile)
    }

    /// Offers every known device to every profile, in profile order
    async fn reconcile(&mut self) {
        for profile in 0..self.instances.len() {
            if self.instances[profile].is_some() {
                self.fill(profile).await;
                self.maybe_resume(profile).await;
            } else if self.gate(profile) {
                self.try_assemble(profile).await;
            }
        }
    }

    // Erste passende Spec je Gerät, Geräte in Ankunftsreihenfolge
    fn plan(&self, profile: usize, assembly: &Assembly) -> Option<(DeviceId, usize)> {
        for device in self.registry.devices() {
            if assembly.contains(&device.id) {
                continue;
            }
            let specs = self
                .matcher
                .match_device(device)
                .into_iter()
                .filter(|candidate| candidate.profile == profile)
                .map(|candidate| candidate.spec);
            for spec in specs {
                let blocked = assembly.is_exclusive(spec);
                if self.registry.can_claim(&device.id, profile, blocked)
                    && assembly.check(&device.id, spec).is_ok()
                {
                    return Some((device.id.clone(), spec));
                }
            }
        }
        None
    }

    async fn fill(&mut self, profile: usize) {
        loop {
            let next = match &self.instances[profile] {
                Some(instance) => self.plan(profile, &instance.assembly),
                None => None,
            };
            let Some((id, spec)) = next else {
                return;
            };
            if let Err(e) = self.bind(profile, id, spec).await {
                warn!("Binding to profile {} failed: {}", profile, e);
                return;
            }
        }
    }

    async fn bind(&mut self, profile: usize, id: DeviceId, spec: usize) -> Result<(), CompositeError> {
        let Some(instance) = self.instances[profile].as_mut() else {
            return Err(CompositeError::NoInstance(profile.to_string()));
        };
        let exclusive = instance.assembly.is_exclusive(spec);
        self.registry.claim(&id, profile, exclusive)?;
        if let Err(rejection) = instance.assembly.bind(id.clone(), spec) {
            self.registry.release(&id, profile);
            debug!("{} not bound: {}", id, rejection);
            return Ok(());
        }
        info!(
            "{} bound to '{}' (group '{}')",
            id,
            instance.assembly.profile().name,
            instance.assembly.profile().source_specs[spec].group
        );
        let client = instance.client.clone();
        if let Some(source) = self.sources.get(&id) {
            source.attach(profile, client, exclusive).await?;
        }
        Ok(())
    }

    async fn unbind(&mut self, profile: usize, id: &DeviceId) {
        if let Some(source) = self.sources.get(id) {
            if let Err(e) = source.detach(profile).await {
                warn!("Detaching {} failed: {}", id, e);
            }
        }
        if let Some(instance) = self.instances[profile].as_mut() {
            instance.assembly.unbind(id);
        }
        self.registry.release(id, profile);
    }

    async fn try_assemble(&mut self, profile: usize) {
        let Some(definition) = self.matcher.profile(profile).cloned() else {
            return;
        };
        let mut assembly = Assembly::new(definition.clone());
        while let Some((id, spec)) = self.plan(profile, &assembly) {
            if assembly.bind(id, spec).is_err() {
                break;
            }
        }
        if !assembly.is_satisfied() {
            debug!(
                "'{}' still matching, missing groups {:?}",
                definition.name,
                assembly.missing_groups()
            );
            return;
        }

        info!("'{}' assembling with {} sources", definition.name, assembly.total());
        let map = self.maps.resolve(definition.capability_map_id.as_deref());
        let map_id = (!map.is_passthrough()).then(|| map.id.clone());
        let (client, task) = match spawn_instance(
            &definition.name,
            map,
            &definition.target_kinds,
            self.factory.as_ref(),
            &self.settings,
        ) {
            Ok(started) => started,
            Err(e) => {
                error!("'{}' failed to start: {}", definition.name, e);
                return;
            }
        };

        let devices = assembly.devices();
        let mut attach = Vec::with_capacity(devices.len());
        for id in devices {
            let exclusive = assembly
                .spec_of(&id)
                .map_or(false, |spec| assembly.is_exclusive(spec));
            if let Err(e) = self.registry.claim(&id, profile, exclusive) {
                error!("Claim of {} for '{}' failed: {}", id, definition.name, e);
                continue;
            }
            attach.push((id, exclusive));
        }

        self.instances[profile] = Some(Instance {
            assembly,
            client: client.clone(),
            task,
            map_id,
            suspended_by_manager: false,
        });

        for (id, exclusive) in attach {
            if let Some(source) = self.sources.get(&id) {
                if let Err(e) = source.attach(profile, client.clone(), exclusive).await {
                    warn!("Attaching {} failed: {}", id, e);
                }
            }
        }
        info!("'{}' is active", definition.name);
    }

    /// After a removal: look for substitutes, else suspend or remove
    async fn settle(&mut self, profile: usize) {
        self.fill(profile).await;
        let Some(instance) = self.instances[profile].as_mut() else {
            return;
        };
        let name = instance.assembly.profile().name.clone();

        if instance.assembly.is_empty() {
            info!("'{}' lost its last source", name);
            self.remove_instance(profile).await;
            return;
        }
        if !instance.assembly.is_satisfied() && instance.client.state() == LifecycleState::Active {
            warn!(
                "'{}' suspended, missing groups {:?}",
                name,
                instance.assembly.missing_groups()
            );
            if let Err(e) = instance.client.suspend().await {
                error!("Suspending '{}' failed: {}", name, e);
            }
            instance.suspended_by_manager = true;
        }
    }

    async fn maybe_resume(&mut self, profile: usize) {
        let gate = self.gate(profile);
        let Some(instance) = self.instances[profile].as_mut() else {
            return;
        };
        if instance.suspended_by_manager
            && gate
            && instance.assembly.is_satisfied()
            && instance.client.state() == LifecycleState::Suspended
        {
            info!("'{}' satisfied again, resuming", instance.assembly.profile().name);
            match instance.client.resume().await {
                Ok(()) => instance.suspended_by_manager = false,
                Err(e) => error!("Resuming failed: {}", e),
            }
        }
    }

    /// Releases the instance's devices right away. Target teardown finishes
    /// in the background and is awaited on shutdown.
    async fn remove_instance(&mut self, profile: usize) {
        let Some(Instance {
            assembly,
            client,
            task,
            ..
        }) = self.instances[profile].take()
        else {
            return;
        };
        let name = assembly.profile().name.clone();
        for id in assembly.devices() {
            if let Some(source) = self.sources.get(&id) {
                if let Err(e) = source.detach(profile).await {
                    warn!("Detaching {} failed: {}", id, e);
                }
            }
            self.registry.release(&id, profile);
        }

        self.retiring.retain(|handle| !handle.is_finished());
        self.retiring.push(tokio::spawn(async move {
            if let Err(e) = client.stop().await {
                warn!("Stopping '{}' failed: {}", name, e);
            }
            if let Err(e) = task.await {
                error!("Task of '{}' ended abnormally: {}", name, e);
            }
            info!("'{}' removed", name);
        }));
    }
}
