//! Conversions between in-memory events/devices and their protobuf form.
//!
//! Wire enums share the in-memory numeric values, and device type and bus
//! are flag sets, so both directions are plain bit casts. A default-valued
//! `InputEvent` (kind NONE) is the stream keep-alive; it exists on the wire
//! only and is suppressed before delivery to any subscriber.

use ::proto::input as pb;
use ::std::time::Duration;

use crate::event::{DeviceBus, DeviceId, DeviceType, EventKind, InputEvent, KeyState, Point};
use crate::evdev::keys::Key;
use crate::manager::DeviceInfo;

pub fn to_wire_event(event: &InputEvent) -> pb::InputEvent {
    pb::InputEvent {
        ts: Some(to_wire_duration(event.timestamp)),
        device_type: event.device_type.bits() as i32,
        event_type: event.kind as i32,
        device: event.source.0,
        scan_code: event.scan_code,
        key_code: u32::from(event.key_code.code()),
        key_state: event.key_state.bits(),
        position: Some(to_wire_point(event.position)),
        relative: Some(to_wire_point(event.relative)),
        slot: event.slot,
    }
}

pub fn from_wire_event(message: &pb::InputEvent) -> InputEvent {
    InputEvent {
        timestamp: message.ts.as_ref().map(from_wire_duration).unwrap_or_default(),
        source: DeviceId(message.device),
        device_type: DeviceType::from_bits_truncate(message.device_type as u32),
        kind: EventKind::from_wire(message.event_type as u32),
        key_code: Key::from_code(message.key_code as u16),
        key_state: KeyState::from_bits_truncate(message.key_state),
        scan_code: message.scan_code,
        position: message.position.as_ref().map(from_wire_point).unwrap_or_default(),
        relative: message.relative.as_ref().map(from_wire_point).unwrap_or_default(),
        slot: message.slot,
    }
}

/// The NONE-kind keep-alive event.
pub fn keep_alive() -> pb::InputEvent {
    pb::InputEvent::default()
}

pub fn is_keep_alive(message: &pb::InputEvent) -> bool {
    message.event_type == pb::InputEventType::InputEventNone as i32
}

pub fn to_wire_device(info: &DeviceInfo) -> pb::InputDevice {
    pb::InputDevice {
        device_name: info.name.clone(),
        device_type: info.device_type.bits() as i32,
        device_bus: info.bus.bits() as i32,
        device_position: Some(to_wire_point(info.position)),
    }
}

/// Re-materialises a remote device description. The result is a stub: it
/// has no path, no id and no key state, and cannot be closed or matched.
pub fn from_wire_device(message: &pb::InputDevice) -> DeviceInfo {
    DeviceInfo {
        id: DeviceId::default(),
        path: ::std::path::PathBuf::new(),
        name: message.device_name.clone(),
        device_type: DeviceType::from_bits_truncate(message.device_type as u32),
        bus: DeviceBus::from_bits_truncate(message.device_bus as u32),
        exclusive: false,
        position: message.device_position.as_ref().map(from_wire_point).unwrap_or_default(),
        key_state: KeyState::empty(),
    }
}

fn to_wire_point(point: Point) -> pb::Point {
    pb::Point { x: point.x, y: point.y }
}

fn from_wire_point(point: &pb::Point) -> Point {
    Point { x: point.x, y: point.y }
}

fn to_wire_duration(duration: Duration) -> ::prost_types::Duration {
    ::prost_types::Duration {
        seconds: duration.as_secs() as i64,
        nanos: duration.subsec_nanos() as i32,
    }
}

fn from_wire_duration(duration: &::prost_types::Duration) -> Duration {
    Duration::new(duration.seconds.max(0) as u64, duration.nanos.max(0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_events() -> Vec<InputEvent> {
        vec![
            InputEvent {
                timestamp: Duration::from_micros(1_234_567),
                source: DeviceId(3),
                device_type: DeviceType::KEYBOARD,
                kind: EventKind::KeyPress,
                key_code: Key::KEY_A,
                key_state: KeyState::LEFT_SHIFT | KeyState::CAPS_LOCK,
                scan_code: 0x1e,
                ..InputEvent::default()
            },
            InputEvent {
                timestamp: Duration::from_millis(42),
                source: DeviceId(1),
                device_type: DeviceType::MOUSE,
                kind: EventKind::RelPosition,
                position: Point::new(10.0, -4.0),
                relative: Point::new(3.0, -2.0),
                ..InputEvent::default()
            },
            InputEvent {
                timestamp: Duration::from_secs(7),
                source: DeviceId(2),
                device_type: DeviceType::TOUCHSCREEN,
                kind: EventKind::TouchPress,
                key_code: Key::BTN_TOUCH,
                position: Point::new(100.0, 200.0),
                slot: 2,
                ..InputEvent::default()
            },
        ]
    }

    #[test]
    fn event_round_trip() {
        for event in sample_events() {
            assert_eq!(from_wire_event(&to_wire_event(&event)), event);
        }
    }

    #[test]
    fn combined_type_flags_survive_the_wire() {
        let event = InputEvent {
            device_type: DeviceType::KEYBOARD | DeviceType::MOUSE,
            kind: EventKind::KeyRepeat,
            ..InputEvent::default()
        };
        let decoded = from_wire_event(&to_wire_event(&event));
        assert_eq!(decoded.device_type, DeviceType::KEYBOARD | DeviceType::MOUSE);
    }

    #[test]
    fn keep_alive_detection() {
        assert!(is_keep_alive(&keep_alive()));
        for event in sample_events() {
            assert!(!is_keep_alive(&to_wire_event(&event)));
        }
    }

    #[test]
    fn device_round_trip_is_a_stub() {
        let info = DeviceInfo {
            id: DeviceId(9),
            path: "/dev/input/event3".into(),
            name: "USB Optical Mouse".to_owned(),
            device_type: DeviceType::MOUSE,
            bus: DeviceBus::USB,
            exclusive: true,
            position: Point::new(1.0, 2.0),
            key_state: KeyState::NUM_LOCK,
        };
        let stub = from_wire_device(&to_wire_device(&info));
        assert_eq!(stub.name, info.name);
        assert_eq!(stub.device_type, info.device_type);
        assert_eq!(stub.bus, info.bus);
        assert_eq!(stub.position, info.position);
        // Identity and local-only state do not travel.
        assert_eq!(stub.id, DeviceId::default());
        assert_eq!(stub.path, ::std::path::PathBuf::new());
        assert_eq!(stub.key_state, KeyState::empty());
    }
}
