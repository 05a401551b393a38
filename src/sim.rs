//! In-process stand-in for the VR runtime.
//!
//! A [`SimulatedHandle`] scripts hot-plug, property changes and poses from any
//! thread; the [`SimulatedRuntime`] built from it is handed to the tracker.

use crate::registry::DeviceProperties;
use crate::runtime::{PoseSample, RuntimeEvent, StringProperty, VrRuntime};
use crate::types::{
    ControllerRole, DeviceClass, DevicePose, TrackingStyle, TrackingUniverse,
};
use crate::{Result, VrStateError};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct SimDevice {
    props: DeviceProperties,
    connected: bool,
    pose: DevicePose,
}

#[derive(Debug, Default)]
struct SimState {
    devices: BTreeMap<u32, SimDevice>,
    events: VecDeque<RuntimeEvent>,
    fail_init: bool,
    pose_queries: u64,
    last_query_count: u32,
}

/// Cloneable scripting handle shared with a [`SimulatedRuntime`].
#[derive(Debug, Clone, Default)]
pub struct SimulatedHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next [`SimulatedRuntime::init`] fail.
    pub fn set_init_failure(&self, fail: bool) {
        self.state().fail_init = fail;
    }

    /// Place a device present from the start; no event is queued.
    pub fn insert(&self, slot: u32, props: DeviceProperties) {
        let connected = props.connected;
        self.state().devices.insert(
            slot,
            SimDevice {
                props,
                connected,
                pose: DevicePose::default(),
            },
        );
    }

    /// Hot-plug a device and queue `DeviceActivated`.
    pub fn attach(&self, slot: u32, props: DeviceProperties) {
        self.insert(slot, props);
        self.state()
            .events
            .push_back(RuntimeEvent::DeviceActivated { slot });
    }

    /// Mark a device disconnected and queue `DeviceDeactivated`. The slot stays classified.
    pub fn detach(&self, slot: u32) {
        let mut state = self.state();
        if let Some(device) = state.devices.get_mut(&slot) {
            device.connected = false;
        }
        state
            .events
            .push_back(RuntimeEvent::DeviceDeactivated { slot });
    }

    /// Replace a device's properties and queue `PropertyChanged`.
    pub fn change_properties(&self, slot: u32, props: DeviceProperties) {
        let mut state = self.state();
        let pose = state
            .devices
            .get(&slot)
            .map(|d| d.pose)
            .unwrap_or_default();
        let connected = props.connected;
        state.devices.insert(
            slot,
            SimDevice {
                props,
                connected,
                pose,
            },
        );
        state
            .events
            .push_back(RuntimeEvent::PropertyChanged { slot });
    }

    /// Drop a device entirely so the slot classifies as invalid, and queue `PropertyChanged`.
    pub fn vacate(&self, slot: u32) {
        let mut state = self.state();
        state.devices.remove(&slot);
        state
            .events
            .push_back(RuntimeEvent::PropertyChanged { slot });
    }

    pub fn set_pose(&self, slot: u32, pose: DevicePose) {
        if let Some(device) = self.state().devices.get_mut(&slot) {
            device.pose = pose;
        }
    }

    pub fn set_connected(&self, slot: u32, connected: bool) {
        if let Some(device) = self.state().devices.get_mut(&slot) {
            device.connected = connected;
        }
    }

    pub fn push_event(&self, event: RuntimeEvent) {
        self.state().events.push_back(event);
    }

    /// Number of batch pose queries served so far.
    pub fn pose_queries(&self) -> u64 {
        self.state().pose_queries
    }

    /// Slot count requested by the most recent pose query.
    pub fn last_query_count(&self) -> u32 {
        self.state().last_query_count
    }

    pub fn pending_events(&self) -> usize {
        self.state().events.len()
    }
}

/// [`VrRuntime`] backed by a [`SimulatedHandle`].
#[derive(Debug)]
pub struct SimulatedRuntime {
    handle: SimulatedHandle,
}

impl SimulatedRuntime {
    /// Connect to the simulated runtime, failing if the handle says so.
    pub fn init(handle: &SimulatedHandle) -> Result<Self> {
        if handle.state().fail_init {
            return Err(VrStateError::RuntimeInit(
                "simulated runtime unavailable".into(),
            ));
        }
        log::info!("Simulated VR runtime initialized");
        Ok(Self {
            handle: handle.clone(),
        })
    }

    pub fn handle(&self) -> &SimulatedHandle {
        &self.handle
    }
}

impl VrRuntime for SimulatedRuntime {
    fn poll_event(&mut self) -> Option<RuntimeEvent> {
        self.handle.state().events.pop_front()
    }

    fn device_class(&self, slot: u32) -> DeviceClass {
        self.handle
            .state()
            .devices
            .get(&slot)
            .map(|d| d.props.class)
            .unwrap_or(DeviceClass::Invalid)
    }

    fn string_property(&self, slot: u32, key: StringProperty) -> Result<String> {
        let state = self.handle.state();
        let device = state.devices.get(&slot).ok_or_else(|| VrStateError::Property {
            slot,
            key: key.as_str(),
            message: "invalid device".into(),
        })?;
        Ok(match key {
            StringProperty::ManufacturerName => device.props.manufacturer.clone(),
            StringProperty::ModelNumber => device.props.model.clone(),
            StringProperty::SerialNumber => device.props.serial.clone(),
        })
    }

    fn tracking_style(&self, slot: u32) -> TrackingStyle {
        self.handle
            .state()
            .devices
            .get(&slot)
            .and_then(|d| d.props.tracking_style)
            .unwrap_or(TrackingStyle::Unknown)
    }

    fn controller_role(&self, slot: u32) -> ControllerRole {
        self.handle
            .state()
            .devices
            .get(&slot)
            .and_then(|d| d.props.role)
            .unwrap_or(ControllerRole::Invalid)
    }

    fn is_connected(&self, slot: u32) -> bool {
        self.handle
            .state()
            .devices
            .get(&slot)
            .map(|d| d.connected)
            .unwrap_or(false)
    }

    fn poses(&mut self, _universe: TrackingUniverse, count: u32) -> Vec<PoseSample> {
        let mut state = self.handle.state();
        state.pose_queries += 1;
        state.last_query_count = count;
        (0..count)
            .map(|slot| match state.devices.get(&slot) {
                Some(device) => PoseSample {
                    pose: device.pose,
                    connected: device.connected,
                },
                None => PoseSample {
                    pose: DevicePose::default(),
                    connected: false,
                },
            })
            .collect()
    }
}
