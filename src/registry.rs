use crate::types::{
    ControllerRole, DeviceClass, DevicePose, Snapshot, TrackedDevice, TrackingStyle,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One-time properties read from the runtime when a record is created.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProperties {
    pub class: DeviceClass,
    pub connected: bool,
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub tracking_style: Option<TrackingStyle>,
    pub role: Option<ControllerRole>,
}

impl DeviceProperties {
    /// Properties for a freshly activated device of `class` with empty strings.
    pub fn new(class: DeviceClass) -> Self {
        Self {
            class,
            connected: true,
            manufacturer: String::new(),
            model: String::new(),
            serial: String::new(),
            tracking_style: (class == DeviceClass::Hmd).then_some(TrackingStyle::Unknown),
            role: (class == DeviceClass::Controller).then_some(ControllerRole::Invalid),
        }
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = serial.into();
        self
    }

    pub fn with_connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }

    pub fn with_tracking_style(mut self, style: TrackingStyle) -> Self {
        self.tracking_style = Some(style);
        self
    }

    pub fn with_role(mut self, role: ControllerRole) -> Self {
        self.role = Some(role);
        self
    }

    fn into_device(self, slot: u32) -> TrackedDevice {
        TrackedDevice {
            slot,
            class: self.class,
            connected: self.connected,
            manufacturer: self.manufacturer,
            model: self.model,
            serial: self.serial,
            tracking_style: self.tracking_style.filter(|_| self.class == DeviceClass::Hmd),
            role: self.role.filter(|_| self.class == DeviceClass::Controller),
            pose: None,
        }
    }
}

/// Per-slot device records, owned and mutated by a single tracking thread.
///
/// Readers on other threads only ever see the owned copies returned by
/// [`DeviceRegistry::snapshot`].
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<u32, TrackedDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or fully replace the record at `slot`.
    ///
    /// Replacing discards the previous pose and connection state.
    pub fn upsert(&mut self, slot: u32, props: DeviceProperties) -> &TrackedDevice {
        let device = props.into_device(slot);
        match self.devices.insert(slot, device) {
            Some(previous) => log::debug!(
                "Replaced slot {} ({} -> {})",
                slot,
                previous.class.as_str(),
                self.devices[&slot].class.as_str()
            ),
            None => log::debug!("Added slot {} ({})", slot, self.devices[&slot].class.as_str()),
        }
        &self.devices[&slot]
    }

    pub fn remove(&mut self, slot: u32) -> Option<TrackedDevice> {
        let removed = self.devices.remove(&slot);
        if removed.is_some() {
            log::debug!("Removed slot {}", slot);
        }
        removed
    }

    /// Store a pose sample. Returns false, without effect, for unknown slots.
    pub fn apply_pose(&mut self, slot: u32, pose: DevicePose) -> bool {
        match self.devices.get_mut(&slot) {
            Some(device) => {
                device.pose = Some(pose);
                true
            }
            None => false,
        }
    }

    pub fn set_connected(&mut self, slot: u32, connected: bool) -> bool {
        match self.devices.get_mut(&slot) {
            Some(device) => {
                if device.connected != connected {
                    log::info!(
                        "Slot {} {}",
                        slot,
                        if connected { "connected" } else { "disconnected" }
                    );
                }
                device.connected = connected;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, slot: u32) -> Option<&TrackedDevice> {
        self.devices.get(&slot)
    }

    pub fn contains(&self, slot: u32) -> bool {
        self.devices.contains_key(&slot)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// One past the highest occupied slot; bounds the batch pose query.
    pub fn slot_bound(&self) -> u32 {
        self.devices
            .keys()
            .next_back()
            .map(|slot| slot + 1)
            .unwrap_or(0)
    }

    /// Independent copy of every record, ordered by slot.
    pub fn snapshot(&self) -> Snapshot {
        Arc::new(self.devices.values().cloned().collect())
    }
}
