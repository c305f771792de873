//! Linux event device handling.
//!
//! The kernel's evdev subsystem exposes input devices as `/dev/input/event*`
//! character files. Each open device is probed for its capabilities via
//! ioctl, optionally grabbed for exclusive access, and then read by a
//! dedicated task whenever the poller reports the fd readable. Raw frames
//! run through the per-device decoder; committed events are published to the
//! device's subscribers. LED frames flow the other way: lock-key toggles are
//! written back to the same fd.

pub mod decode;
pub mod keys;
pub mod raw;

use ::fixedbitset::FixedBitSet;
use ::log::{debug, error, info, warn};
use ::std::io::{Read, Write};
use ::std::os::fd::AsRawFd;
use ::std::os::unix::fs::OpenOptionsExt;
use ::std::path::{Path, PathBuf};
use ::std::sync::atomic::{AtomicU32, Ordering};
use ::std::sync::{Arc, Mutex};
use ::std::time::Duration;
use ::tokio::io::unix::AsyncFd;
use ::tokio::io::Interest;
use ::tokio::sync::mpsc;
use ::tokio::task::JoinHandle;

use crate::bus::{Publisher, Subscription};
use crate::error::Error;
use crate::event::{DeviceBus, DeviceId, DeviceType, EventKind, InputEvent, KeyState, Point};
use crate::manager::DeviceInfo;
use decode::Decoder;
use keys::{Key, Led};
use raw::{FrameBuffer, RAW_EVENT_SIZE};

/// Position and key state mirrored out of the reader task so snapshots
/// (the `Devices` RPC) never touch the decoder.
pub struct SharedState {
    position: Mutex<Point>,
    key_state: AtomicU32,
}

impl SharedState {
    fn new(key_state: KeyState) -> SharedState {
        SharedState { position: Mutex::new(Point::ZERO), key_state: AtomicU32::new(key_state.bits()) }
    }

    pub fn position(&self) -> Point {
        *self.position.lock().unwrap()
    }

    pub fn key_state(&self) -> KeyState {
        KeyState::from_bits_truncate(self.key_state.load(Ordering::Relaxed))
    }

    fn set_position(&self, position: Point) {
        *self.position.lock().unwrap() = position;
    }

    fn set_key_state(&self, key_state: KeyState) {
        self.key_state.store(key_state.bits(), Ordering::Relaxed);
    }
}

/// One open evdev device. Created by the manager, which also owns its
/// lifetime: open → probe → spawn reader → stream events until close.
pub struct InputDevice {
    id: DeviceId,
    path: PathBuf,
    name: String,
    device_type: DeviceType,
    bus: DeviceBus,
    grabbed: bool,
    origin: Duration,
    // Both move into the reader task when it starts.
    file: Option<::std::fs::File>,
    decoder: Option<Decoder>,
    shared: Arc<SharedState>,
    publisher: Arc<Publisher<InputEvent>>,
    reader: Option<JoinHandle<()>>,
}

impl InputDevice {
    pub fn open(path: &Path, id: DeviceId, exclusive: bool) -> Result<InputDevice, Error> {
        let file = ::std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(::libc::O_NONBLOCK)
            .open(path)?;
        let fd = file.as_raw_fd();

        let mut name_buf = [0u8; 256];
        let name = match unsafe { raw::eviocgname(fd, &mut name_buf[..]) } {
            Ok(len) if len > 0 => terminated_string(&name_buf),
            _ => String::new(),
        };

        let mut device_id = raw::input_id::default();
        unsafe { raw::eviocgid(fd, &mut device_id) }?;
        let bus = match device_id.bustype {
            raw::BUS_USB => DeviceBus::USB,
            raw::BUS_BLUETOOTH => DeviceBus::BLUETOOTH,
            _ => DeviceBus::empty(),
        };

        let mut ev_buf = [0u8; 4];
        unsafe { raw::eviocgbit(fd, 0, ev_buf.len() as i32, ev_buf.as_mut_ptr()) }?;
        let ev_bits = u32::from_le_bytes(ev_buf);

        let mut key_bits = FixedBitSet::with_capacity(raw::KEY_MAX + 1);
        if ev_bits & (1 << raw::EV_BIT_KEY) != 0 {
            let mut buf = [0u8; (raw::KEY_MAX + 1) / 8];
            unsafe { raw::eviocgbit(fd, raw::EV_BIT_KEY, buf.len() as i32, buf.as_mut_ptr()) }?;
            fill_bitset(&mut key_bits, &buf);
        }
        let mut rel_bits = 0u32;
        if ev_bits & (1 << raw::EV_BIT_REL) != 0 {
            let mut buf = [0u8; 4];
            unsafe { raw::eviocgbit(fd, raw::EV_BIT_REL, buf.len() as i32, buf.as_mut_ptr()) }?;
            rel_bits = u32::from_le_bytes(buf);
        }
        let mut abs_bits = 0u64;
        if ev_bits & (1 << raw::EV_BIT_ABS) != 0 {
            let mut buf = [0u8; 8];
            unsafe { raw::eviocgbit(fd, raw::EV_BIT_ABS, buf.len() as i32, buf.as_mut_ptr()) }?;
            abs_bits = u64::from_le_bytes(buf);
        }
        let device_type = derive_type(ev_bits, &key_bits, rel_bits, abs_bits);

        // Seed the lock bits from the device's current LED state.
        let mut key_state = KeyState::empty();
        if ev_bits & (1 << raw::EV_BIT_LED) != 0 {
            let mut buf = [0u8; 2];
            if unsafe { raw::eviocgled(fd, &mut buf[..]) }.is_ok() {
                let leds = u16::from_le_bytes(buf);
                for (led, bit) in [
                    (Led::LED_CAPSL, KeyState::CAPS_LOCK),
                    (Led::LED_NUML, KeyState::NUM_LOCK),
                    (Led::LED_SCROLLL, KeyState::SCROLL_LOCK),
                ] {
                    if leds & (1 << u16::from(led)) != 0 {
                        key_state |= bit;
                    }
                }
            }
        }

        // Event timestamps are rebased onto a per-device origin captured at
        // open; switching the event clock keeps both on CLOCK_MONOTONIC.
        let clock: ::libc::c_int = ::libc::CLOCK_MONOTONIC;
        if let Err(errno) = unsafe { raw::eviocsclockid(fd, &clock) } {
            debug!("{}: monotonic event clock unavailable: {}", path.display(), errno);
        }
        let origin = now_monotonic();

        let mut grabbed = false;
        if exclusive {
            match unsafe { raw::eviocgrab(fd, 1) } {
                Ok(_) => grabbed = true,
                Err(errno) => warn!("{}: exclusive grab failed: {}", path.display(), errno),
            }
        }

        debug!(
            "{}: opened name={:?} type={:?} bus={:?} grabbed={}",
            path.display(),
            name,
            device_type,
            bus,
            grabbed
        );

        Ok(InputDevice {
            id,
            path: path.to_owned(),
            name,
            device_type,
            bus,
            grabbed,
            origin,
            file: Some(file),
            decoder: Some(Decoder::new(key_state)),
            shared: Arc::new(SharedState::new(key_state)),
            publisher: Arc::new(Publisher::new()),
            reader: None,
        })
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id,
            path: self.path.clone(),
            name: self.name.clone(),
            device_type: self.device_type,
            bus: self.bus,
            exclusive: self.grabbed,
            position: self.shared.position(),
            key_state: self.shared.key_state(),
        }
    }

    /// Whether this device passes the open filters.
    pub fn matches(&self, alias: &str, types: DeviceType, bus: DeviceBus) -> bool {
        crate::manager::matches_filters(&self.name, self.device_type, self.bus, alias, types, bus)
    }

    pub fn subscribe(&self) -> Subscription<InputEvent> {
        self.publisher.subscribe()
    }

    /// Starts the reader task. `removals` is notified when the device goes
    /// away (EOF or I/O error), so the manager can drop it.
    pub fn spawn_reader(&mut self, removals: mpsc::UnboundedSender<DeviceId>) {
        let (Some(file), Some(decoder)) = (self.file.take(), self.decoder.take()) else {
            return;
        };
        self.reader = Some(::tokio::spawn(read_task(ReadTask {
            file,
            decoder,
            id: self.id,
            device_type: self.device_type,
            origin: self.origin,
            path: self.path.clone(),
            shared: self.shared.clone(),
            publisher: self.publisher.clone(),
            removals,
        })));
    }

    /// Stops the reader, closes subscriber channels and releases the fd
    /// (which also releases any exclusive grab).
    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.file = None;
        self.decoder = None;
        self.publisher.close();
        debug!("{}: closed", self.path.display());
    }
}

struct ReadTask {
    file: ::std::fs::File,
    decoder: Decoder,
    id: DeviceId,
    device_type: DeviceType,
    origin: Duration,
    path: PathBuf,
    shared: Arc<SharedState>,
    publisher: Arc<Publisher<InputEvent>>,
    removals: mpsc::UnboundedSender<DeviceId>,
}

async fn read_task(mut task: ReadTask) {
    let path = task.path.clone();
    let afd = match AsyncFd::with_interest(task.file, Interest::READABLE) {
        Ok(afd) => afd,
        Err(err) => {
            error!("{}: failed to register with the poller: {}", path.display(), err);
            task.publisher.close();
            let _ = task.removals.send(task.id);
            return;
        }
    };

    let mut frames = FrameBuffer::default();
    let mut buf = [0u8; 64 * RAW_EVENT_SIZE];
    'read: loop {
        let mut guard = match afd.readable().await {
            Ok(guard) => guard,
            Err(err) => {
                error!("{}: poll failed: {}", path.display(), err);
                break 'read;
            }
        };
        match guard.try_io(|inner| {
            let mut file = inner.get_ref();
            file.read(&mut buf)
        }) {
            Ok(Ok(0)) => {
                info!("{}: device is gone", path.display());
                break 'read;
            }
            Ok(Ok(n)) => {
                frames.extend(&buf[..n]);
                while let Some(frame) = frames.next_frame() {
                    let step = task.decoder.feed(&frame);
                    if let Some(write) = step.led {
                        let mut file = afd.get_ref();
                        if let Err(err) = file.write_all(&write.frame().encode()) {
                            warn!("{}: LED write failed: {}", path.display(), err);
                        }
                    }
                    if let Some(mut event) = step.event {
                        event.timestamp = event.timestamp.saturating_sub(task.origin);
                        event.source = task.id;
                        event.device_type = task.device_type;
                        match event.kind {
                            EventKind::AbsPosition
                            | EventKind::RelPosition
                            | EventKind::TouchPosition => task.shared.set_position(event.position),
                            _ => {}
                        }
                        task.shared.set_key_state(event.key_state);
                        task.publisher.emit(&event);
                    }
                }
            }
            Ok(Err(err)) => {
                error!("{}: read failed: {}", path.display(), err);
                break 'read;
            }
            Err(_would_block) => continue 'read,
        }
    }

    if frames.residue() > 0 {
        warn!("{}: discarding {} bytes of a partial frame", path.display(), frames.residue());
    }
    task.publisher.close();
    let _ = task.removals.send(task.id);
}

/// Derives the device category from its capability bitmaps: a full set of
/// letter keys makes a keyboard, X/Y relative axes a mouse, multi-touch
/// absolute axes a touchscreen, and plain X/Y absolute axes a joystick.
fn derive_type(ev_bits: u32, key_bits: &FixedBitSet, rel_bits: u32, abs_bits: u64) -> DeviceType {
    let mut device_type = DeviceType::empty();
    if ev_bits & (1 << raw::EV_BIT_KEY) != 0
        && Key::LETTERS.iter().all(|key| key_bits.contains(key.code() as usize))
    {
        device_type |= DeviceType::KEYBOARD;
    }
    if ev_bits & (1 << raw::EV_BIT_REL) != 0
        && rel_bits & (1 << raw::CODE_X) != 0
        && rel_bits & (1 << raw::CODE_Y) != 0
    {
        device_type |= DeviceType::MOUSE;
    }
    if ev_bits & (1 << raw::EV_BIT_ABS) != 0 {
        let multi_touch = abs_bits & (1 << raw::CODE_SLOT_X | 1 << raw::CODE_SLOT_Y) != 0;
        let plain_axes = abs_bits & (1 << raw::CODE_X | 1 << raw::CODE_Y)
            == (1 << raw::CODE_X | 1 << raw::CODE_Y);
        if multi_touch {
            device_type |= DeviceType::TOUCHSCREEN;
        } else if plain_axes {
            device_type |= DeviceType::JOYSTICK;
        }
    }
    device_type
}

fn fill_bitset(set: &mut FixedBitSet, bytes: &[u8]) {
    for (index, byte) in bytes.iter().enumerate() {
        for bit in 0..8 {
            if byte & (1 << bit) != 0 {
                let position = index * 8 + bit;
                if position < set.len() {
                    set.insert(position);
                }
            }
        }
    }
}

fn terminated_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn now_monotonic() -> Duration {
    match ::nix::time::clock_gettime(::nix::time::ClockId::CLOCK_MONOTONIC) {
        Ok(now) => Duration::new(now.tv_sec() as u64, now.tv_nsec() as u32),
        Err(_) => Duration::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_bitmap(keys: &[Key]) -> FixedBitSet {
        let mut set = FixedBitSet::with_capacity(raw::KEY_MAX + 1);
        for key in keys {
            set.insert(key.code() as usize);
        }
        set
    }

    #[test]
    fn keyboard_needs_every_letter() {
        let all = key_bitmap(&Key::LETTERS);
        assert_eq!(derive_type(1 << raw::EV_BIT_KEY, &all, 0, 0), DeviceType::KEYBOARD);

        let partial = key_bitmap(&Key::LETTERS[..20]);
        assert_eq!(derive_type(1 << raw::EV_BIT_KEY, &partial, 0, 0), DeviceType::empty());
    }

    #[test]
    fn mouse_from_relative_axes() {
        let keys = key_bitmap(&[Key::BTN_LEFT, Key::BTN_RIGHT]);
        let rel = (1 << raw::CODE_X) | (1 << raw::CODE_Y);
        let bits = (1 << raw::EV_BIT_KEY) | (1 << raw::EV_BIT_REL);
        assert_eq!(derive_type(bits, &keys, rel, 0), DeviceType::MOUSE);
    }

    #[test]
    fn touchscreen_beats_joystick_on_multi_touch() {
        let keys = key_bitmap(&[]);
        let abs = (1u64 << raw::CODE_X)
            | (1u64 << raw::CODE_Y)
            | (1u64 << raw::CODE_SLOT_X)
            | (1u64 << raw::CODE_SLOT_Y);
        assert_eq!(
            derive_type(1 << raw::EV_BIT_ABS, &keys, 0, abs),
            DeviceType::TOUCHSCREEN
        );

        let plain = (1u64 << raw::CODE_X) | (1u64 << raw::CODE_Y);
        assert_eq!(
            derive_type(1 << raw::EV_BIT_ABS, &keys, 0, plain),
            DeviceType::JOYSTICK
        );
    }

    #[test]
    fn bitmap_fill() {
        let mut set = FixedBitSet::with_capacity(16);
        fill_bitset(&mut set, &[0b0000_0101, 0b1000_0000]);
        assert!(set.contains(0));
        assert!(set.contains(2));
        assert!(set.contains(15));
        assert!(!set.contains(1));
    }
}
