//! Global device table
//!
//! Arena of every known physical device keyed by its id, plus the claims that
//! composite instances hold on them. Owned by the manager task only.

use super::physical::{DeviceId, PhysicalDevice};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq)]
pub enum ClaimError {
    #[error("Device {0} is unknown")]
    Unknown(DeviceId),

    #[error("Device {device} is exclusively claimed by profile {owner}")]
    Exclusive { device: DeviceId, owner: usize },

    #[error("Device {0} is shared and cannot be claimed exclusively")]
    Shared(DeviceId),

    #[error("Device {device} is already claimed by profile {profile}")]
    AlreadyClaimed { device: DeviceId, profile: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub profile: usize,
    pub exclusive: bool,
}

#[derive(Debug, Clone)]
pub struct DeviceEntry {
    pub device: PhysicalDevice,
    pub claims: Vec<Claim>,
    // Ankunftsreihenfolge
    seq: u64,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceId, DeviceEntry>,
    next_seq: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id is already known; the entry is left untouched
    pub fn insert(&mut self, device: PhysicalDevice) -> bool {
        if self.devices.contains_key(&device.id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        debug!("Registering {}", device);
        self.devices.insert(
            device.id.clone(),
            DeviceEntry {
                device,
                claims: Vec::new(),
                seq,
            },
        );
        true
    }

    pub fn remove(&mut self, id: &DeviceId) -> Option<DeviceEntry> {
        self.devices.remove(id)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    /// Devices in arrival order
    pub fn devices(&self) -> Vec<&PhysicalDevice> {
        let mut entries: Vec<&DeviceEntry> = self.devices.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| &entry.device).collect()
    }

    pub fn can_claim(&self, id: &DeviceId, profile: usize, exclusive: bool) -> bool {
        self.check_claim(id, profile, exclusive).is_ok()
    }

    fn check_claim(&self, id: &DeviceId, profile: usize, exclusive: bool) -> Result<(), ClaimError> {
        let entry = self
            .devices
            .get(id)
            .ok_or_else(|| ClaimError::Unknown(id.clone()))?;

        if entry.claims.iter().any(|c| c.profile == profile) {
            return Err(ClaimError::AlreadyClaimed {
                device: id.clone(),
                profile,
            });
        }
        if let Some(owner) = entry.claims.iter().find(|c| c.exclusive) {
            return Err(ClaimError::Exclusive {
                device: id.clone(),
                owner: owner.profile,
            });
        }
        if exclusive && !entry.claims.is_empty() {
            return Err(ClaimError::Shared(id.clone()));
        }
        Ok(())
    }

    /// Exclusive claims require an unclaimed device and block every further
    /// claim. Shared claims may coexist.
    pub fn claim(&mut self, id: &DeviceId, profile: usize, exclusive: bool) -> Result<(), ClaimError> {
        self.check_claim(id, profile, exclusive)?;
        if let Some(entry) = self.devices.get_mut(id) {
            entry.claims.push(Claim { profile, exclusive });
            debug!(
                "Device {} claimed by profile {} ({})",
                id,
                profile,
                if exclusive { "exclusive" } else { "shared" }
            );
        }
        Ok(())
    }

    pub fn release(&mut self, id: &DeviceId, profile: usize) -> bool {
        match self.devices.get_mut(id) {
            Some(entry) => {
                let before = entry.claims.len();
                entry.claims.retain(|c| c.profile != profile);
                before != entry.claims.len()
            }
            None => false,
        }
    }
}
