//! Blitting wire codec for same-machine transport.
//!
//! Fixed-layout fields are copied verbatim from their in-memory `#[repr(C)]`
//! representation, and lengths/counts are native-endian `u64`. The format is
//! only meaningful between two processes running the same build on the same
//! machine: never persist it and never send it to a different binary.
//!
//! Layout rules:
//! - text: `u64` byte length, then the UTF-8 bytes
//! - `Option<T>`: one presence byte (0/1), then `T` when present
//! - `Vec<T>`: `u64` element count, then each element in order
//! - [`DevicePose`]: one 80-byte [`PoseBlit`]
//! - [`TrackedDevice`]: one 12-byte [`DeviceBlit`], manufacturer, model,
//!   serial, `Option<TrackingStyle>`, `Option<ControllerRole>`, `Option<DevicePose>`

use crate::types::{
    ControllerRole, DeviceClass, DevicePose, Snapshot, TrackedDevice, TrackingResult,
    TrackingStyle,
};
use crate::{Result, VrStateError};
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

/// Initial capacity of an encode buffer; a full 64-device snapshot fits.
const INITIAL_CAPACITY: usize = 16 * 1024;

/// Raw in-memory layout of a pose, copied as-is onto the wire.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PoseBlit {
    pub matrix: [[f32; 4]; 3],
    pub velocity: [f32; 3],
    pub angular_velocity: [f32; 3],
    pub tracking_result: u32,
    pub valid: u32,
}

/// Raw in-memory layout of the fixed fields of a device record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DeviceBlit {
    pub slot: u32,
    pub class: u32,
    pub connected: u32,
}

/// Growable output buffer. One encode owns one buffer.
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(INITIAL_CAPACITY),
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Copy the in-memory representation of a POD value.
    pub fn write_pod<T: Pod>(&mut self, value: &T) {
        self.buf.extend_from_slice(bytemuck::bytes_of(value));
    }

    /// Write a length or element count as a fixed-width `u64`.
    pub fn write_len(&mut self, len: usize) {
        self.write_pod(&(len as u64));
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for WireWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounds-checked cursor over a received buffer.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(VrStateError::TruncatedInput {
                needed: len,
                remaining,
            });
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_pod<T: Pod>(&mut self) -> Result<T> {
        let bytes = self.take(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn read_len(&mut self) -> Result<usize> {
        let raw: u64 = self.read_pod()?;
        usize::try_from(raw)
            .map_err(|_| VrStateError::MalformedPayload(format!("length {} overflows usize", raw)))
    }

    /// Read a one-byte presence/boolean flag.
    pub fn read_flag(&mut self) -> Result<bool> {
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(VrStateError::MalformedPayload(format!(
                "invalid flag byte 0x{:02x}",
                other
            ))),
        }
    }
}

/// A value with a wire representation.
pub trait Wire: Sized {
    fn encode(&self, w: &mut WireWriter);
    fn decode(r: &mut WireReader<'_>) -> Result<Self>;
}

/// Encode a value into a freshly allocated buffer.
pub fn encode<T: Wire>(value: &T) -> Vec<u8> {
    let mut w = WireWriter::new();
    value.encode(&mut w);
    w.into_inner()
}

/// Decode a value that must span the whole buffer.
pub fn decode<T: Wire>(bytes: &[u8]) -> Result<T> {
    let mut r = WireReader::new(bytes);
    let value = T::decode(&mut r)?;
    if !r.is_empty() {
        return Err(VrStateError::MalformedPayload(format!(
            "{} trailing bytes",
            r.remaining()
        )));
    }
    Ok(value)
}

pub fn encode_snapshot(snapshot: &Snapshot) -> Vec<u8> {
    encode::<Vec<TrackedDevice>>(snapshot)
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot> {
    decode::<Vec<TrackedDevice>>(bytes).map(Arc::new)
}

fn flag(value: bool) -> u32 {
    if value {
        1
    } else {
        0
    }
}

fn unflag(raw: u32, field: &str) -> Result<bool> {
    match raw {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(VrStateError::MalformedPayload(format!(
            "{} flag has value {}",
            field, other
        ))),
    }
}

macro_rules! wire_pod {
    ($($ty:ty),*) => {
        $(
            impl Wire for $ty {
                fn encode(&self, w: &mut WireWriter) {
                    w.write_pod(self);
                }

                fn decode(r: &mut WireReader<'_>) -> Result<Self> {
                    r.read_pod()
                }
            }
        )*
    };
}

wire_pod!(u8, u16, u32, u64, i32, f32, f64);

macro_rules! wire_enum {
    ($($ty:ident),*) => {
        $(
            impl Wire for $ty {
                fn encode(&self, w: &mut WireWriter) {
                    w.write_pod(&(*self as u32));
                }

                fn decode(r: &mut WireReader<'_>) -> Result<Self> {
                    let raw: u32 = r.read_pod()?;
                    $ty::from_u32(raw).ok_or_else(|| {
                        VrStateError::MalformedPayload(format!(
                            "unknown {} value {}",
                            stringify!($ty),
                            raw
                        ))
                    })
                }
            }
        )*
    };
}

wire_enum!(DeviceClass, TrackingResult, TrackingStyle, ControllerRole);

impl Wire for bool {
    fn encode(&self, w: &mut WireWriter) {
        w.write_bytes(&[*self as u8]);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        r.read_flag()
    }
}

impl Wire for String {
    fn encode(&self, w: &mut WireWriter) {
        w.write_len(self.len());
        w.write_bytes(self.as_bytes());
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let len = r.read_len()?;
        let bytes = r.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| VrStateError::MalformedPayload(format!("invalid UTF-8 text: {}", e)))
    }
}

impl<T: Wire> Wire for Option<T> {
    fn encode(&self, w: &mut WireWriter) {
        match self {
            Some(value) => {
                w.write_bytes(&[1]);
                value.encode(w);
            }
            None => w.write_bytes(&[0]),
        }
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        if r.read_flag()? {
            T::decode(r).map(Some)
        } else {
            Ok(None)
        }
    }
}

impl<T: Wire> Wire for Vec<T> {
    fn encode(&self, w: &mut WireWriter) {
        w.write_len(self.len());
        for item in self {
            item.encode(w);
        }
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let count = r.read_len()?;
        // Every element takes at least one byte, so this bounds a hostile count.
        let mut items = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            items.push(T::decode(r)?);
        }
        Ok(items)
    }
}

impl From<&DevicePose> for PoseBlit {
    fn from(pose: &DevicePose) -> Self {
        PoseBlit {
            matrix: pose.matrix,
            velocity: pose.velocity,
            angular_velocity: pose.angular_velocity,
            tracking_result: pose.tracking_result as u32,
            valid: flag(pose.valid),
        }
    }
}

impl TryFrom<PoseBlit> for DevicePose {
    type Error = VrStateError;

    fn try_from(blit: PoseBlit) -> Result<Self> {
        let tracking_result = TrackingResult::from_u32(blit.tracking_result).ok_or_else(|| {
            VrStateError::MalformedPayload(format!(
                "unknown TrackingResult value {}",
                blit.tracking_result
            ))
        })?;
        Ok(DevicePose {
            matrix: blit.matrix,
            velocity: blit.velocity,
            angular_velocity: blit.angular_velocity,
            valid: unflag(blit.valid, "pose valid")?,
            tracking_result,
        })
    }
}

impl Wire for DevicePose {
    fn encode(&self, w: &mut WireWriter) {
        w.write_pod(&PoseBlit::from(self));
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        r.read_pod::<PoseBlit>()?.try_into()
    }
}

impl Wire for TrackedDevice {
    fn encode(&self, w: &mut WireWriter) {
        w.write_pod(&DeviceBlit {
            slot: self.slot,
            class: self.class as u32,
            connected: flag(self.connected),
        });
        self.manufacturer.encode(w);
        self.model.encode(w);
        self.serial.encode(w);
        self.tracking_style.encode(w);
        self.role.encode(w);
        self.pose.encode(w);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self> {
        let head: DeviceBlit = r.read_pod()?;
        let class = DeviceClass::from_u32(head.class).ok_or_else(|| {
            VrStateError::MalformedPayload(format!("unknown DeviceClass value {}", head.class))
        })?;
        let connected = unflag(head.connected, "connected")?;

        let manufacturer = String::decode(r)?;
        let model = String::decode(r)?;
        let serial = String::decode(r)?;
        let tracking_style = Option::<TrackingStyle>::decode(r)?;
        let role = Option::<ControllerRole>::decode(r)?;
        let pose = Option::<DevicePose>::decode(r)?;

        if tracking_style.is_some() && class != DeviceClass::Hmd {
            return Err(VrStateError::MalformedPayload(format!(
                "slot {}: tracking style on a {} record",
                head.slot,
                class.as_str()
            )));
        }
        if role.is_some() && class != DeviceClass::Controller {
            return Err(VrStateError::MalformedPayload(format!(
                "slot {}: role on a {} record",
                head.slot,
                class.as_str()
            )));
        }

        Ok(TrackedDevice {
            slot: head.slot,
            class,
            connected,
            manufacturer,
            model,
            serial,
            tracking_style,
            role,
            pose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose() -> DevicePose {
        DevicePose {
            matrix: [
                [0.0, -1.0, 0.0, 0.25],
                [1.0, 0.0, 0.0, 1.62],
                [0.0, 0.0, 1.0, -0.5],
            ],
            velocity: [0.1, 0.0, -0.2],
            angular_velocity: [0.0, 3.1, 0.0],
            valid: true,
            tracking_result: TrackingResult::RunningOk,
        }
    }

    fn hmd() -> TrackedDevice {
        TrackedDevice {
            slot: 0,
            class: DeviceClass::Hmd,
            connected: true,
            manufacturer: "Valve".into(),
            model: "Index".into(),
            serial: "LHR-1234ABCD".into(),
            tracking_style: Some(TrackingStyle::Lighthouse),
            role: None,
            pose: Some(pose()),
        }
    }

    fn controller() -> TrackedDevice {
        TrackedDevice {
            slot: 3,
            class: DeviceClass::Controller,
            connected: false,
            manufacturer: "Valve".into(),
            model: "Knuckles Ü".into(),
            serial: String::new(),
            tracking_style: None,
            role: Some(ControllerRole::LeftHand),
            pose: None,
        }
    }

    #[test]
    fn test_blit_layouts() {
        assert_eq!(std::mem::size_of::<PoseBlit>(), 80);
        assert_eq!(std::mem::size_of::<DeviceBlit>(), 12);
    }

    #[test]
    fn test_pose_round_trip() {
        let bytes = encode(&pose());
        assert_eq!(bytes.len(), 80);
        assert_eq!(decode::<DevicePose>(&bytes).unwrap(), pose());
    }

    #[test]
    fn test_device_round_trip() {
        for device in [hmd(), controller()] {
            let bytes = encode(&device);
            assert_eq!(decode::<TrackedDevice>(&bytes).unwrap(), device);
        }
    }

    #[test]
    fn test_empty_sequence() {
        let bytes = encode(&Vec::<TrackedDevice>::new());
        assert_eq!(bytes.len(), 8);
        assert!(decode::<Vec<TrackedDevice>>(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let snapshot: Snapshot = Arc::new(vec![hmd(), controller()]);
        let decoded = decode_snapshot(&encode_snapshot(&snapshot)).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_text_length_is_bytes() {
        let bytes = encode(&"Ü".to_string());
        assert_eq!(&bytes[..8], &2u64.to_ne_bytes());
        assert_eq!(&bytes[8..], "Ü".as_bytes());
    }

    #[test]
    fn test_option_flag_layout() {
        assert_eq!(encode(&None::<u32>), vec![0]);
        let some = encode(&Some(7u32));
        assert_eq!(some[0], 1);
        assert_eq!(&some[1..], &7u32.to_ne_bytes());
    }

    #[test]
    fn test_every_strict_prefix_is_truncated() {
        let bytes = encode_snapshot(&Arc::new(vec![hmd(), controller()]));
        for len in 0..bytes.len() {
            match decode_snapshot(&bytes[..len]) {
                Err(VrStateError::TruncatedInput { .. }) => {}
                other => panic!("prefix {} decoded to {:?}", len, other),
            }
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&hmd());
        bytes.push(0);
        assert!(matches!(
            decode::<TrackedDevice>(&bytes),
            Err(VrStateError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_bad_presence_flag() {
        assert!(matches!(
            decode::<Option<u32>>(&[2, 0, 0, 0, 0]),
            Err(VrStateError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut bytes = 2u64.to_ne_bytes().to_vec();
        bytes.extend_from_slice(&[0xC3, 0x28]);
        assert!(matches!(
            decode::<String>(&bytes),
            Err(VrStateError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_huge_count_does_not_allocate() {
        let bytes = u64::MAX.to_ne_bytes();
        assert!(decode::<Vec<TrackedDevice>>(&bytes).is_err());
        let bytes = (1u64 << 40).to_ne_bytes();
        assert!(matches!(
            decode::<String>(&bytes),
            Err(VrStateError::TruncatedInput { .. })
        ));
    }

    #[test]
    fn test_unknown_class_rejected() {
        let mut bytes = encode(&controller());
        bytes[4..8].copy_from_slice(&99u32.to_ne_bytes());
        assert!(matches!(
            decode::<TrackedDevice>(&bytes),
            Err(VrStateError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_role_on_non_controller_rejected() {
        let mut device = controller();
        device.class = DeviceClass::GenericTracker;
        let bytes = encode(&device);
        assert!(matches!(
            decode::<TrackedDevice>(&bytes),
            Err(VrStateError::MalformedPayload(_))
        ));
    }
}
