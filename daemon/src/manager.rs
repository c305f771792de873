//! Input device manager: discovery, filters, device lifetimes and the
//! subscribe API. Devices are keyed by path; re-running discovery is
//! idempotent over devices that are already open and picks up new ones.

use ::log::{debug, info, warn};
use ::std::collections::HashMap;
use ::std::path::{Path, PathBuf};
use ::std::sync::atomic::{AtomicU32, Ordering};
use ::std::sync::{Arc, Mutex};
use ::tokio::sync::mpsc;

use crate::bus::{Merger, Subscription};
use crate::error::Error;
use crate::evdev::InputDevice;
use crate::event::{DeviceBus, DeviceId, DeviceType, InputEvent, KeyState, Point};

/// Where event-driven input devices are discovered and opened.
pub const SYS_CLASS_INPUT: &str = "/sys/class/input";
pub const DEV_INPUT: &str = "/dev/input";

/// Snapshot description of a device. The same shape re-materialises remote
/// devices received over the wire, which carry no path and no id.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub path: PathBuf,
    pub name: String,
    pub device_type: DeviceType,
    pub bus: DeviceBus,
    /// Whether the device is grabbed for exclusive access.
    pub exclusive: bool,
    pub position: Point,
    pub key_state: KeyState,
}

/// Parses a type filter such as `"keyboard,mouse"`. The empty string and
/// `"any"` match every type; `"none"` matches nothing.
pub fn parse_device_types(filter: &str) -> Result<DeviceType, Error> {
    if filter.trim().is_empty() {
        return Ok(DeviceType::ANY);
    }
    let mut mask = DeviceType::empty();
    for token in filter.split(',') {
        mask |= match token.trim().to_lowercase().as_str() {
            "none" => DeviceType::empty(),
            "keyboard" => DeviceType::KEYBOARD,
            "mouse" => DeviceType::MOUSE,
            "touchscreen" => DeviceType::TOUCHSCREEN,
            "joystick" => DeviceType::JOYSTICK,
            "remote" => DeviceType::REMOTE,
            "any" => DeviceType::ANY,
            _ => return Err(Error::InvalidFilter(token.trim().to_owned())),
        };
    }
    Ok(mask)
}

/// Parses a bus filter such as `"usb,bluetooth"`.
pub fn parse_device_bus(filter: &str) -> Result<DeviceBus, Error> {
    if filter.trim().is_empty() {
        return Ok(DeviceBus::ANY);
    }
    let mut mask = DeviceBus::empty();
    for token in filter.split(',') {
        mask |= match token.trim().to_lowercase().as_str() {
            "none" => DeviceBus::empty(),
            "usb" => DeviceBus::USB,
            "bluetooth" => DeviceBus::BLUETOOTH,
            "any" => DeviceBus::ANY,
            _ => return Err(Error::InvalidFilter(token.trim().to_owned())),
        };
    }
    Ok(mask)
}

/// The open filter predicate: empty alias matches any name, otherwise a
/// case-insensitive substring match; type and bus masks must intersect the
/// device's sets, where `ANY` matches everything and the empty mask nothing.
pub fn matches_filters(
    name: &str,
    device_type: DeviceType,
    bus: DeviceBus,
    alias: &str,
    type_mask: DeviceType,
    bus_mask: DeviceBus,
) -> bool {
    let name_ok = alias.is_empty() || name.to_lowercase().contains(&alias.to_lowercase());
    name_ok
        && mask_matches(device_type.bits(), type_mask.bits(), DeviceType::ANY.bits())
        && mask_matches(bus.bits(), bus_mask.bits(), DeviceBus::ANY.bits())
}

fn mask_matches(value: u32, mask: u32, any: u32) -> bool {
    mask == any || value & mask != 0
}

/// Owns every open device and fans their events out to subscribers through
/// one merger. Created inside a tokio runtime; device readers and merge
/// forwarders are spawned tasks.
pub struct InputManager {
    exclusive: bool,
    devices: Mutex<HashMap<PathBuf, InputDevice>>,
    merger: Merger<InputEvent>,
    removals: mpsc::UnboundedSender<DeviceId>,
    next_id: AtomicU32,
}

impl InputManager {
    pub fn new(exclusive: bool) -> Arc<InputManager> {
        let (removals, mut removed) = mpsc::unbounded_channel();
        let manager = Arc::new(InputManager {
            exclusive,
            devices: Mutex::new(HashMap::new()),
            merger: Merger::new(),
            removals,
            next_id: AtomicU32::new(1),
        });

        // Reap devices whose reader ended on its own (unplug, I/O error).
        let weak = Arc::downgrade(&manager);
        ::tokio::spawn(async move {
            while let Some(id) = removed.recv().await {
                let Some(manager) = weak.upgrade() else { break };
                if manager.close_device(id).is_ok() {
                    info!("removed input device {}", id);
                }
            }
        });

        manager
    }

    /// Discovers devices under `/sys/class/input/event*`, opens the ones not
    /// already open, filters them, and merges the survivors into the event
    /// bus. Returns only the newly opened, matching devices.
    pub fn open_devices(
        &self,
        alias: &str,
        types: DeviceType,
        bus: DeviceBus,
    ) -> Result<Vec<DeviceInfo>, Error> {
        // The table lock is held for the whole scan, serialising concurrent
        // open calls (API vs. hotplug rescans) against each other.
        let mut devices = self.devices.lock().unwrap();
        let mut opened = Vec::new();
        for path in discover()? {
            if devices.contains_key(&path) {
                continue;
            }
            let id = DeviceId(self.next_id.fetch_add(1, Ordering::Relaxed));
            let mut device = match InputDevice::open(&path, id, self.exclusive) {
                Ok(device) => device,
                Err(err) => {
                    warn!("{}: {}", path.display(), err);
                    continue;
                }
            };
            if !device.matches(alias, types, bus) {
                debug!("{}: does not match filters", path.display());
                device.close();
                continue;
            }
            let events = device.subscribe();
            device.spawn_reader(self.removals.clone());
            self.merger.merge(id.0 as u64, events);
            opened.push(device.info());
            devices.insert(path, device);
        }
        Ok(opened)
    }

    pub fn close_device(&self, id: DeviceId) -> Result<(), Error> {
        let mut device = {
            let mut devices = self.devices.lock().unwrap();
            let path = devices
                .iter()
                .find(|(_, device)| device.id() == id)
                .map(|(path, _)| path.clone())
                .ok_or(Error::NotFound)?;
            devices.remove(&path).ok_or(Error::NotFound)?
        };
        self.merger.unmerge(id.0 as u64);
        device.close();
        Ok(())
    }

    pub fn get_open_devices(&self) -> Vec<DeviceInfo> {
        let devices = self.devices.lock().unwrap();
        let mut infos: Vec<_> = devices.values().map(InputDevice::info).collect();
        infos.sort_by_key(|info| info.id.0);
        infos
    }

    /// Registering an externally-constructed device is not supported.
    pub fn add_device(&self, _device: DeviceInfo) -> Result<(), Error> {
        Err(Error::NotImplemented)
    }

    pub fn subscribe(&self) -> Subscription<InputEvent> {
        self.merger.subscribe()
    }

    pub fn unsubscribe(&self, subscription: Subscription<InputEvent>) {
        self.merger.unsubscribe(subscription)
    }

    /// Closes every device, then the merger; subscribers observe EOF.
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut devices = self.devices.lock().unwrap();
            devices.drain().collect()
        };
        for (_, mut device) in drained {
            self.merger.unmerge(device.id().0 as u64);
            device.close();
        }
        self.merger.close();
    }
}

fn discover() -> Result<Vec<PathBuf>, Error> {
    let mut paths = Vec::new();
    for entry in ::std::fs::read_dir(SYS_CLASS_INPUT)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("event") {
            paths.push(Path::new(DEV_INPUT).join(name.as_ref()));
        }
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_filter_parsing() {
        assert_eq!(parse_device_types("").unwrap(), DeviceType::ANY);
        assert_eq!(parse_device_types("any").unwrap(), DeviceType::ANY);
        assert_eq!(parse_device_types("none").unwrap(), DeviceType::empty());
        assert_eq!(parse_device_types("keyboard").unwrap(), DeviceType::KEYBOARD);
        assert_eq!(
            parse_device_types("Keyboard, mouse").unwrap(),
            DeviceType::KEYBOARD | DeviceType::MOUSE
        );
        assert!(matches!(
            parse_device_types("keyboard,gamepad"),
            Err(Error::InvalidFilter(token)) if token == "gamepad"
        ));
    }

    #[test]
    fn bus_filter_parsing() {
        assert_eq!(parse_device_bus("usb").unwrap(), DeviceBus::USB);
        assert_eq!(
            parse_device_bus("usb,bluetooth").unwrap(),
            DeviceBus::USB | DeviceBus::BLUETOOTH
        );
        assert!(parse_device_bus("serial").is_err());
    }

    #[test]
    fn filter_mismatch_keeps_only_matching_devices() {
        // A corpus of one keyboard and one mouse filtered by type MOUSE.
        let corpus = [
            ("AT Translated Keyboard", DeviceType::KEYBOARD, DeviceBus::empty()),
            ("USB Optical Mouse", DeviceType::MOUSE, DeviceBus::USB),
        ];
        let survivors: Vec<_> = corpus
            .iter()
            .filter(|(name, device_type, bus)| {
                matches_filters(name, *device_type, *bus, "", DeviceType::MOUSE, DeviceBus::ANY)
            })
            .collect();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].0, "USB Optical Mouse");
    }

    #[test]
    fn alias_filter_is_case_insensitive_substring() {
        assert!(matches_filters(
            "USB Optical Mouse",
            DeviceType::MOUSE,
            DeviceBus::USB,
            "optical",
            DeviceType::ANY,
            DeviceBus::ANY
        ));
        assert!(!matches_filters(
            "USB Optical Mouse",
            DeviceType::MOUSE,
            DeviceBus::USB,
            "trackball",
            DeviceType::ANY,
            DeviceBus::ANY
        ));
    }

    #[test]
    fn any_mask_matches_untyped_devices() {
        assert!(matches_filters(
            "mystery",
            DeviceType::empty(),
            DeviceBus::empty(),
            "",
            DeviceType::ANY,
            DeviceBus::ANY
        ));
        assert!(!matches_filters(
            "mystery",
            DeviceType::empty(),
            DeviceBus::empty(),
            "",
            DeviceType::empty(),
            DeviceBus::ANY
        ));
    }

    #[tokio::test]
    async fn close_of_unknown_device_is_not_found() {
        let manager = InputManager::new(false);
        assert!(matches!(manager.close_device(DeviceId(99)), Err(Error::NotFound)));
    }

    #[tokio::test]
    async fn add_device_is_not_implemented() {
        let manager = InputManager::new(false);
        let info = DeviceInfo {
            id: DeviceId(1),
            path: PathBuf::new(),
            name: "mock".to_owned(),
            device_type: DeviceType::KEYBOARD,
            bus: DeviceBus::empty(),
            exclusive: false,
            position: Point::ZERO,
            key_state: KeyState::empty(),
        };
        assert!(matches!(manager.add_device(info), Err(Error::NotImplemented)));
    }

    #[tokio::test]
    async fn close_signals_subscribers() {
        let manager = InputManager::new(false);
        let mut events = manager.subscribe();
        manager.close();
        assert_eq!(events.recv().await, None);
    }
}
