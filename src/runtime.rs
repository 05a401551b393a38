//! Boundary to the VR tracking runtime.
//!
//! The tracker only polls this interface; it never drives the runtime's
//! lifecycle beyond creating it on the tracking thread and dropping it there.

use crate::registry::DeviceProperties;
use crate::types::{ControllerRole, DeviceClass, DevicePose, TrackingStyle, TrackingUniverse};
use crate::Result;

/// String properties read once when a record is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringProperty {
    ManufacturerName,
    ModelNumber,
    SerialNumber,
}

impl StringProperty {
    pub fn as_str(&self) -> &'static str {
        match self {
            StringProperty::ManufacturerName => "ManufacturerName",
            StringProperty::ModelNumber => "ModelNumber",
            StringProperty::SerialNumber => "SerialNumber",
        }
    }
}

/// Device events drained from the runtime queue.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    DeviceActivated { slot: u32 },
    DeviceDeactivated { slot: u32 },
    PropertyChanged { slot: u32 },
    /// Anything the tracker has no use for.
    Other { kind: u32 },
}

/// One entry of a batch pose query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    pub pose: DevicePose,
    /// Authoritative connectivity signal for the slot.
    pub connected: bool,
}

/// A live connection to the tracking runtime.
///
/// Implementations are created and used on the tracking thread only, so they
/// need not be `Send`.
pub trait VrRuntime {
    /// Pop the next pending event without blocking.
    fn poll_event(&mut self) -> Option<RuntimeEvent>;

    fn device_class(&self, slot: u32) -> DeviceClass;

    fn string_property(&self, slot: u32, key: StringProperty) -> Result<String>;

    fn tracking_style(&self, slot: u32) -> TrackingStyle;

    fn controller_role(&self, slot: u32) -> ControllerRole;

    fn is_connected(&self, slot: u32) -> bool;

    /// Sample poses for slots `0..count`; entry `i` belongs to slot `i`.
    fn poses(&mut self, universe: TrackingUniverse, count: u32) -> Vec<PoseSample>;
}

/// Read the one-time properties of the device at `slot`.
///
/// A property the runtime refuses is logged and left empty.
pub fn classify(runtime: &dyn VrRuntime, slot: u32, class: DeviceClass) -> DeviceProperties {
    let read = |key: StringProperty| match runtime.string_property(slot, key) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Slot {}: {}", slot, e);
            String::new()
        }
    };

    let mut props = DeviceProperties::new(class)
        .with_manufacturer(read(StringProperty::ManufacturerName))
        .with_model(read(StringProperty::ModelNumber))
        .with_serial(read(StringProperty::SerialNumber))
        .with_connected(runtime.is_connected(slot));

    match class {
        DeviceClass::Hmd => props = props.with_tracking_style(runtime.tracking_style(slot)),
        DeviceClass::Controller => props = props.with_role(runtime.controller_role(slot)),
        _ => {}
    }
    props
}
