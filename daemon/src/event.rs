//! Semantic input events and the small value types they carry.

use ::bitflags::bitflags;
use ::std::fmt;
use ::std::time::Duration;

use crate::evdev::keys::Key;

/// 2-D point in device-local coordinates.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Point { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{},{}}}", self.x, self.y)
    }
}

bitflags! {
    /// Device categories derived from capability probing. A combo device may
    /// carry several flags; the empty set means the type is unknown. `ANY`
    /// is only meaningful as a filter mask.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct DeviceType: u32 {
        const KEYBOARD = 0x01;
        const MOUSE = 0x02;
        const TOUCHSCREEN = 0x04;
        const JOYSTICK = 0x08;
        const REMOTE = 0x10;
        const ANY = 0xff;
    }
}

bitflags! {
    /// Physical bus a device is attached to. `ANY` is a filter mask.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct DeviceBus: u32 {
        const USB = 0x01;
        const BLUETOOTH = 0x02;
        const ANY = 0xff;
    }
}

bitflags! {
    /// Modifier and lock state of a keyboard-like device. The lock bits
    /// toggle on key-down; the modifier bits mirror the physical key state.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct KeyState: u32 {
        const CAPS_LOCK = 1 << 0;
        const NUM_LOCK = 1 << 1;
        const SCROLL_LOCK = 1 << 2;
        const LEFT_SHIFT = 1 << 3;
        const RIGHT_SHIFT = 1 << 4;
        const LEFT_CTRL = 1 << 5;
        const RIGHT_CTRL = 1 << 6;
        const LEFT_ALT = 1 << 7;
        const RIGHT_ALT = 1 << 8;
        const LEFT_META = 1 << 9;
        const RIGHT_META = 1 << 10;
    }
}

/// What a committed event describes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum EventKind {
    #[default]
    None = 0,
    KeyPress = 1,
    KeyRelease = 2,
    KeyRepeat = 3,
    AbsPosition = 4,
    RelPosition = 5,
    TouchPress = 6,
    TouchRelease = 7,
    // Defined for wire compatibility; the evdev decoder never produces it.
    TouchPosition = 8,
}

impl EventKind {
    pub fn from_wire(value: u32) -> EventKind {
        match value {
            1 => EventKind::KeyPress,
            2 => EventKind::KeyRelease,
            3 => EventKind::KeyRepeat,
            4 => EventKind::AbsPosition,
            5 => EventKind::RelPosition,
            6 => EventKind::TouchPress,
            7 => EventKind::TouchRelease,
            8 => EventKind::TouchPosition,
            _ => EventKind::None,
        }
    }
}

/// Non-owning handle to the device an event originated from. Resolved back
/// to a device through the manager; never keeps the device alive.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A decoded input event. Only the fields appropriate to `kind` carry
/// meaning; the rest hold their zero values.
#[derive(Clone, Debug, PartialEq)]
pub struct InputEvent {
    /// Time since the source device's open origin.
    pub timestamp: Duration,
    pub source: DeviceId,
    pub device_type: DeviceType,
    pub kind: EventKind,
    pub key_code: Key,
    pub key_state: KeyState,
    pub scan_code: u32,
    pub position: Point,
    pub relative: Point,
    pub slot: u32,
}

impl Default for InputEvent {
    fn default() -> Self {
        InputEvent {
            timestamp: Duration::ZERO,
            source: DeviceId::default(),
            device_type: DeviceType::empty(),
            kind: EventKind::None,
            key_code: Key::KEY_RESERVED,
            key_state: KeyState::empty(),
            scan_code: 0,
            position: Point::ZERO,
            relative: Point::ZERO,
            slot: 0,
        }
    }
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            EventKind::RelPosition => write!(
                f,
                "InputEvent{{ kind={:?} device={:?} relative={} position={} ts={:?} }}",
                self.kind, self.device_type, self.relative, self.position, self.timestamp
            ),
            EventKind::AbsPosition | EventKind::TouchPosition => write!(
                f,
                "InputEvent{{ kind={:?} device={:?} position={} ts={:?} }}",
                self.kind, self.device_type, self.position, self.timestamp
            ),
            EventKind::KeyPress | EventKind::KeyRelease | EventKind::KeyRepeat => write!(
                f,
                "InputEvent{{ kind={:?} device={:?} key={:?} state={:?} scan=0x{:08x} ts={:?} }}",
                self.kind, self.device_type, self.key_code, self.key_state, self.scan_code,
                self.timestamp
            ),
            EventKind::TouchPress | EventKind::TouchRelease => write!(
                f,
                "InputEvent{{ kind={:?} device={:?} key={:?} slot={} position={} ts={:?} }}",
                self.kind, self.device_type, self.key_code, self.slot, self.position,
                self.timestamp
            ),
            EventKind::None => write!(
                f,
                "InputEvent{{ kind={:?} device={:?} ts={:?} }}",
                self.kind, self.device_type, self.timestamp
            ),
        }
    }
}
