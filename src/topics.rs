//! Topic names used on the snapshot channel.
//!
//! Subscribing to [`DEVICES`] receives both streams.

/// Common prefix of every device topic.
pub const DEVICES: &str = "vr.devices";

/// Published after enumeration and on cycles where events changed the registry.
pub const DEVICE_STATE: &str = "vr.devices.state";

/// Published once per tracking cycle.
pub const DEVICES_UPDATED: &str = "vr.devices.updated";
