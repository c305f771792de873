//! Per-device decoding state machine: raw evdev frames in, at most one
//! semantic event per EV_SYN out.

use ::log::warn;

use crate::event::{EventKind, InputEvent, KeyState, Point};
use crate::evdev::keys::{Key, Led};
use crate::evdev::raw::{self, RawEvent};

pub const MAX_SLOTS: u32 = 32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum KeyAction {
    None,
    Up,
    Down,
    Repeat,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TouchAction {
    Press,
    Release,
}

// Contact state per the multi-touch protocol; commits only read `position`.
#[derive(Copy, Clone, Debug, Default)]
struct Slot {
    #[allow(dead_code)]
    active: bool,
    #[allow(dead_code)]
    id: i16,
    position: Point,
}

/// An LED frame the device layer should write back to the fd.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LedWrite {
    pub led: Led,
    pub on: bool,
}

impl LedWrite {
    pub fn frame(&self) -> RawEvent {
        RawEvent::new(raw::EV_LED, self.led.into(), self.on as i32)
    }
}

/// Result of feeding one raw frame into the decoder.
#[derive(Default)]
pub struct Step {
    pub event: Option<InputEvent>,
    pub led: Option<LedWrite>,
}

impl Step {
    fn led(led: LedWrite) -> Step {
        Step { event: None, led: Some(led) }
    }
}

/// State pending between raw frames. An EV_SYN frame commits it: relative
/// motion wins over absolute motion, which wins over keys, which win over a
/// queued multi-touch transition. Motion outranks keys because one EV_SYN
/// may batch a movement with a modifier echo; touch goes last because touch
/// sequences are framed by the SLOT_ID transitions that queue them.
pub struct Decoder {
    position: Point,
    last_position: Point,
    rel_position: Point,
    key_code: u16,
    key_action: KeyAction,
    scan_code: u32,
    key_state: KeyState,
    slot: u32,
    slots: [Slot; MAX_SLOTS as usize],
    pending_touch: Option<TouchAction>,
}

impl Decoder {
    /// `key_state` seeds the lock bits from the device's current LED state.
    pub fn new(key_state: KeyState) -> Decoder {
        Decoder {
            position: Point::ZERO,
            last_position: Point::ZERO,
            rel_position: Point::ZERO,
            key_code: 0,
            key_action: KeyAction::None,
            scan_code: 0,
            key_state,
            slot: 0,
            slots: [Slot::default(); MAX_SLOTS as usize],
            pending_touch: None,
        }
    }

    pub fn key_state(&self) -> KeyState {
        self.key_state
    }

    pub fn feed(&mut self, frame: &RawEvent) -> Step {
        match frame.type_ {
            raw::EV_SYN => Step { event: self.commit(frame), led: None },
            raw::EV_KEY => match self.decode_key(frame) {
                Some(led) => Step::led(led),
                None => Step::default(),
            },
            raw::EV_REL => {
                self.decode_rel(frame);
                Step::default()
            }
            raw::EV_ABS => {
                self.decode_abs(frame);
                Step::default()
            }
            raw::EV_MSC => {
                self.decode_msc(frame);
                Step::default()
            }
            // We are the writer on the LED family, not a sink.
            raw::EV_LED => Step::default(),
            other => {
                warn!("ignoring event with unknown type 0x{:02x}", other);
                Step::default()
            }
        }
    }

    fn decode_key(&mut self, frame: &RawEvent) -> Option<LedWrite> {
        self.key_code = frame.code;
        self.key_action = match frame.value {
            0 => KeyAction::Up,
            1 => KeyAction::Down,
            2 => KeyAction::Repeat,
            value => {
                warn!("ignoring key action value {} for code {}", value, frame.code);
                KeyAction::None
            }
        };

        // The locks flip on key-down only, and the flip is mirrored to the
        // device LED.
        let lock = match Key::from_code(frame.code) {
            Key::KEY_CAPSLOCK => Some((KeyState::CAPS_LOCK, Led::LED_CAPSL)),
            Key::KEY_NUMLOCK => Some((KeyState::NUM_LOCK, Led::LED_NUML)),
            Key::KEY_SCROLLLOCK => Some((KeyState::SCROLL_LOCK, Led::LED_SCROLLL)),
            _ => None,
        };
        if let Some((bit, led)) = lock {
            if self.key_action == KeyAction::Down {
                self.key_state.toggle(bit);
                return Some(LedWrite { led, on: self.key_state.contains(bit) });
            }
            return None;
        }

        let modifier = match Key::from_code(frame.code) {
            Key::KEY_LEFTSHIFT => KeyState::LEFT_SHIFT,
            Key::KEY_RIGHTSHIFT => KeyState::RIGHT_SHIFT,
            Key::KEY_LEFTCTRL => KeyState::LEFT_CTRL,
            Key::KEY_RIGHTCTRL => KeyState::RIGHT_CTRL,
            Key::KEY_LEFTALT => KeyState::LEFT_ALT,
            Key::KEY_RIGHTALT => KeyState::RIGHT_ALT,
            Key::KEY_LEFTMETA => KeyState::LEFT_META,
            Key::KEY_RIGHTMETA => KeyState::RIGHT_META,
            _ => KeyState::empty(),
        };
        if !modifier.is_empty() {
            match self.key_action {
                KeyAction::Down | KeyAction::Repeat => self.key_state.insert(modifier),
                KeyAction::Up => self.key_state.remove(modifier),
                KeyAction::None => {}
            }
        }
        None
    }

    fn decode_rel(&mut self, frame: &RawEvent) {
        let delta = frame.value as f32;
        match frame.code {
            raw::CODE_X => {
                self.position.x += delta;
                self.rel_position.x += delta;
            }
            raw::CODE_Y => {
                self.position.y += delta;
                self.rel_position.y += delta;
            }
            code => warn!("ignoring relative axis code 0x{:02x}", code),
        }
    }

    fn decode_abs(&mut self, frame: &RawEvent) {
        match frame.code {
            raw::CODE_X => self.position.x = frame.value as f32,
            raw::CODE_Y => self.position.y = frame.value as f32,
            raw::CODE_SLOT => {
                if frame.value < 0 || frame.value >= MAX_SLOTS as i32 {
                    warn!("selecting out-of-range multi-touch slot {}", frame.value);
                }
                self.slot = frame.value as u32;
            }
            raw::CODE_SLOT_ID => {
                let Some(slot) = self.current_slot() else { return };
                if frame.value == -1 {
                    self.slots[slot].active = false;
                    self.pending_touch = Some(TouchAction::Release);
                } else {
                    self.slots[slot].active = true;
                    self.slots[slot].id = frame.value as i16;
                    self.pending_touch = Some(TouchAction::Press);
                }
            }
            raw::CODE_SLOT_X => {
                let Some(slot) = self.current_slot() else { return };
                self.slots[slot].position.x = frame.value as f32;
                self.slots[slot].active = true;
            }
            raw::CODE_SLOT_Y => {
                let Some(slot) = self.current_slot() else { return };
                self.slots[slot].position.y = frame.value as f32;
                self.slots[slot].active = true;
            }
            code => warn!("ignoring absolute axis code 0x{:02x}", code),
        }
    }

    /// The selected multi-touch slot, unless an out-of-range index was
    /// selected, in which case slot state must not be touched.
    fn current_slot(&self) -> Option<usize> {
        if self.slot < MAX_SLOTS {
            Some(self.slot as usize)
        } else {
            warn!("ignoring frame for out-of-range multi-touch slot {}", self.slot);
            None
        }
    }

    fn decode_msc(&mut self, frame: &RawEvent) {
        match frame.code {
            raw::CODE_SCANCODE => self.scan_code = frame.value as u32,
            code => warn!("ignoring misc code 0x{:02x} value {}", code, frame.value),
        }
    }

    /// Commit pending state; at most one semantic event per EV_SYN.
    fn commit(&mut self, frame: &RawEvent) -> Option<InputEvent> {
        let mut event = InputEvent {
            timestamp: frame.time(),
            key_state: self.key_state,
            ..InputEvent::default()
        };

        if self.rel_position != Point::ZERO {
            event.kind = EventKind::RelPosition;
            event.position = self.position;
            event.relative = self.rel_position;
            self.rel_position = Point::ZERO;
        } else if self.position != self.last_position {
            event.kind = EventKind::AbsPosition;
            event.position = self.position;
        } else if self.key_action == KeyAction::Up {
            event.kind = EventKind::KeyRelease;
            event.key_code = Key::from_code(self.key_code);
            event.scan_code = self.scan_code;
        } else if self.key_action == KeyAction::Down {
            event.kind = EventKind::KeyPress;
            event.key_code = Key::from_code(self.key_code);
            event.scan_code = self.scan_code;
        } else if self.key_action == KeyAction::Repeat {
            event.kind = EventKind::KeyRepeat;
            event.key_code = Key::from_code(self.key_code);
            event.scan_code = self.scan_code;
        } else if let Some(touch) = self.pending_touch.take() {
            event.kind = match touch {
                TouchAction::Press => EventKind::TouchPress,
                TouchAction::Release => EventKind::TouchRelease,
            };
            event.key_code = Key::BTN_TOUCH;
            event.slot = self.slot;
            event.position = self
                .slots
                .get(self.slot as usize)
                .map(|slot| slot.position)
                .unwrap_or_default();
        } else {
            self.key_action = KeyAction::None;
            self.last_position = self.position;
            return None;
        }

        self.key_action = KeyAction::None;
        self.last_position = self.position;
        Some(event)
    }
}
