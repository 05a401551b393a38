use std::sync::Arc;

/// Highest number of device slots the runtime will ever report.
pub const MAX_TRACKED_DEVICES: u32 = 64;

/// Slot reserved for the head-mounted display.
pub const HMD_SLOT: u32 = 0;

/// Kind of tracked device occupying a slot. Fixed for the life of a record.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Invalid = 0,
    Hmd = 1,
    Controller = 2,
    GenericTracker = 3,
    TrackingReference = 4,
}

impl DeviceClass {
    pub fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => DeviceClass::Invalid,
            1 => DeviceClass::Hmd,
            2 => DeviceClass::Controller,
            3 => DeviceClass::GenericTracker,
            4 => DeviceClass::TrackingReference,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Invalid => "invalid",
            DeviceClass::Hmd => "hmd",
            DeviceClass::Controller => "controller",
            DeviceClass::GenericTracker => "generic-tracker",
            DeviceClass::TrackingReference => "tracking-reference",
        }
    }
}

/// Quality classification the runtime attaches to every pose sample.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingResult {
    Uninitialized = 1,
    CalibratingInProgress = 100,
    CalibratingOutOfRange = 101,
    RunningOk = 200,
    RunningOutOfRange = 201,
    FallbackRotationOnly = 300,
}

impl TrackingResult {
    pub fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            1 => TrackingResult::Uninitialized,
            100 => TrackingResult::CalibratingInProgress,
            101 => TrackingResult::CalibratingOutOfRange,
            200 => TrackingResult::RunningOk,
            201 => TrackingResult::RunningOutOfRange,
            300 => TrackingResult::FallbackRotationOnly,
            _ => return None,
        })
    }
}

/// How an HMD is tracked. Only present on HMD records.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingStyle {
    Unknown = 0,
    Lighthouse = 1,
    OutsideInCameras = 2,
    InsideOutCameras = 3,
}

impl TrackingStyle {
    pub fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => TrackingStyle::Unknown,
            1 => TrackingStyle::Lighthouse,
            2 => TrackingStyle::OutsideInCameras,
            3 => TrackingStyle::InsideOutCameras,
            _ => return None,
        })
    }
}

/// Hand assignment of a controller. Only present on controller records.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerRole {
    Invalid = 0,
    LeftHand = 1,
    RightHand = 2,
    OptOut = 3,
    Treadmill = 4,
    Stylus = 5,
}

impl ControllerRole {
    pub fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => ControllerRole::Invalid,
            1 => ControllerRole::LeftHand,
            2 => ControllerRole::RightHand,
            3 => ControllerRole::OptOut,
            4 => ControllerRole::Treadmill,
            5 => ControllerRole::Stylus,
            _ => return None,
        })
    }
}

/// Coordinate space the batch pose query is expressed in.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingUniverse {
    Seated = 0,
    Standing = 1,
    RawAndUncalibrated = 2,
}

/// Pose of one device, device-to-world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DevicePose {
    /// 3x4 row-major affine transform (rotation | translation).
    pub matrix: [[f32; 4]; 3],
    /// Linear velocity in m/s.
    pub velocity: [f32; 3],
    /// Angular velocity in rad/s.
    pub angular_velocity: [f32; 3],
    pub valid: bool,
    pub tracking_result: TrackingResult,
}

impl DevicePose {
    /// Translation column of the transform [x, y, z].
    pub fn position(&self) -> [f32; 3] {
        [self.matrix[0][3], self.matrix[1][3], self.matrix[2][3]]
    }
}

impl Default for DevicePose {
    fn default() -> Self {
        Self {
            matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
            velocity: [0.0; 3],
            angular_velocity: [0.0; 3],
            valid: false,
            tracking_result: TrackingResult::Uninitialized,
        }
    }
}

/// One occupied device slot.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedDevice {
    pub slot: u32,
    pub class: DeviceClass,
    pub connected: bool,
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    /// Set for HMDs only.
    pub tracking_style: Option<TrackingStyle>,
    /// Set for controllers only.
    pub role: Option<ControllerRole>,
    /// Absent until the first pose sample lands.
    pub pose: Option<DevicePose>,
}

impl TrackedDevice {
    pub fn is_hmd(&self) -> bool {
        self.class == DeviceClass::Hmd
    }
}

/// Immutable point-in-time copy of every known device, ordered by slot.
pub type Snapshot = Arc<Vec<TrackedDevice>>;

/// Look up a device by slot in a snapshot.
pub fn find_slot(snapshot: &Snapshot, slot: u32) -> Option<&TrackedDevice> {
    snapshot.iter().find(|d| d.slot == slot)
}
