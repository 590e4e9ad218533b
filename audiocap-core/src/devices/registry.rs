use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::RangeInclusive;

use parking_lot::Mutex;

use crate::models::device::{AssignedDevice, DeviceDescriptor, DeviceKind};

const NON_PHYSICAL_NAME_HINTS: [&str; 6] = ["aggregate", "multi-output", "virtual", "loopback", "blackhole", "soundflower"];

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentDelta {
    /// Devices that gained a channel in this pass.
    pub assigned: Vec<AssignedDevice>,
    /// `(device id, channel)` pairs that lost their channel in this pass.
    pub released: Vec<(String, u16)>,
    /// Present devices left without a channel.
    pub unassigned: Vec<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    present: BTreeMap<String, DeviceDescriptor>,
    current: HashMap<String, u16>,
    sticky: HashMap<String, u16>,
}

/// Maps volatile auxiliary devices onto a fixed range of output channels.
///
/// A device keeps a sticky record of its last channel after disconnecting and
/// gets it back on reconnect if nobody claimed it in the meantime.
#[derive(Debug)]
pub struct ChannelAssignmentRegistry {
    channels: RangeInclusive<u16>,
    state: Mutex<RegistryState>,
}

impl ChannelAssignmentRegistry {
    pub fn new(channels: RangeInclusive<u16>) -> Self {
        Self {
            channels,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.channels.clone().count()
    }

    /// Whether the device is a physical input eligible for a channel.
    pub fn is_assignable(device: &DeviceDescriptor) -> bool {
        if !device.is_connected() {
            return false;
        }
        if matches!(device.kind, DeviceKind::Aggregate | DeviceKind::Virtual) {
            return false;
        }
        let name = device.name.to_lowercase();
        let manufacturer = device.manufacturer.as_deref().unwrap_or_default().to_lowercase();
        !NON_PHYSICAL_NAME_HINTS
            .iter()
            .any(|hint| name.contains(hint) || manufacturer.contains(hint))
    }

    /// Replace the set of present devices and return the full mapping, ordered by channel.
    pub fn assign_channels(&self, devices: &[DeviceDescriptor]) -> Vec<AssignedDevice> {
        self.reconcile(devices);
        self.current_mapping()
    }

    /// Replace the set of present devices and report what changed.
    pub fn reconcile(&self, devices: &[DeviceDescriptor]) -> AssignmentDelta {
        let mut state = self.state.lock();
        state.present = devices
            .iter()
            .filter(|d| Self::is_assignable(d))
            .map(|d| (d.id.clone(), d.clone()))
            .collect();
        self.reconcile_locked(&mut state)
    }

    /// Add or refresh one device.
    pub fn connect(&self, device: DeviceDescriptor) -> AssignmentDelta {
        let mut state = self.state.lock();
        if Self::is_assignable(&device) {
            state.present.insert(device.id.clone(), device);
        } else {
            log::debug!("ignoring non-physical input device {} ({})", device.name, device.id);
        }
        self.reconcile_locked(&mut state)
    }

    /// Drop a device. Its sticky channel is kept; the freed slot may go to a waiting device.
    pub fn release(&self, device_id: &str) -> AssignmentDelta {
        let mut state = self.state.lock();
        state.present.remove(device_id);
        self.reconcile_locked(&mut state)
    }

    /// Current assignments ordered by channel.
    pub fn current_mapping(&self) -> Vec<AssignedDevice> {
        let state = self.state.lock();
        let mut mapping: Vec<AssignedDevice> = state
            .current
            .iter()
            .filter_map(|(id, &channel)| {
                state.present.get(id).map(|device| AssignedDevice {
                    device: device.clone(),
                    channel,
                })
            })
            .collect();
        mapping.sort_by_key(|a| a.channel);
        mapping
    }

    pub fn channel_for(&self, device_id: &str) -> Option<u16> {
        self.state.lock().current.get(device_id).copied()
    }

    /// Last channel the device held, connected or not.
    pub fn sticky_channel(&self, device_id: &str) -> Option<u16> {
        self.state.lock().sticky.get(device_id).copied()
    }

    /// Forget every assignment, including sticky ones.
    pub fn clear(&self) {
        *self.state.lock() = RegistryState::default();
    }

    fn reconcile_locked(&self, state: &mut RegistryState) -> AssignmentDelta {
        let mut delta = AssignmentDelta::default();

        let gone: Vec<String> = state
            .current
            .keys()
            .filter(|id| !state.present.contains_key(*id))
            .cloned()
            .collect();
        for id in gone {
            if let Some(channel) = state.current.remove(&id) {
                log::info!("released channel {} from device {}", channel, id);
                delta.released.push((id, channel));
            }
        }
        delta.released.sort_by_key(|(_, channel)| *channel);

        let mut used: BTreeSet<u16> = state.current.values().copied().collect();
        let waiting: Vec<String> = state
            .present
            .keys()
            .filter(|id| !state.current.contains_key(*id))
            .cloned()
            .collect();

        // Returning devices reclaim their sticky slot before newcomers pick.
        let mut still_waiting = Vec::new();
        for id in waiting {
            match state.sticky.get(&id).copied() {
                Some(channel) if self.channels.contains(&channel) && !used.contains(&channel) => {
                    used.insert(channel);
                    state.current.insert(id.clone(), channel);
                    delta.assigned.push(assignment(&state.present, &id, channel));
                }
                _ => still_waiting.push(id),
            }
        }

        for id in still_waiting {
            match self.channels.clone().find(|c| !used.contains(c)) {
                Some(channel) => {
                    used.insert(channel);
                    state.current.insert(id.clone(), channel);
                    state.sticky.insert(id.clone(), channel);
                    delta.assigned.push(assignment(&state.present, &id, channel));
                }
                None => delta.unassigned.push(id),
            }
        }

        for assigned in &delta.assigned {
            log::info!("assigned channel {} to device {}", assigned.channel, assigned.device.id);
        }
        if !delta.unassigned.is_empty() {
            log::warn!("no free channel for {} device(s)", delta.unassigned.len());
        }
        delta.assigned.sort_by_key(|a| a.channel);
        delta
    }
}

fn assignment(present: &BTreeMap<String, DeviceDescriptor>, id: &str, channel: u16) -> AssignedDevice {
    let device = present
        .get(id)
        .cloned()
        .unwrap_or_else(|| DeviceDescriptor::new(id, id));
    AssignedDevice { device, channel }
}
