//! Raw evdev-based keyboard listener for Linux
//!
//! Reads `/dev/input/event*` keyboards directly. Unlike the device_query
//! listener this sees kernel auto-repeat (`value == 2`), which is forwarded as
//! a press so the calibrator can count repeats.

use super::{EventOrigin, KeyCode, KeyEvent, KeyEventType, KeyboardPoller, SignalBus};
use nix::libc;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Error type for evdev operations
#[derive(Debug, thiserror::Error)]
pub enum EvdevError {
    #[error("No keyboard devices found")]
    NoDevices,
    #[error("Permission denied accessing {0}")]
    PermissionDenied(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Device enumeration failed: {0}")]
    EnumerationFailed(String),
}

/// A raw input event from the kernel
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct InputEvent {
    tv_sec: i64,
    tv_usec: i64,
    event_type: u16,
    code: u16,
    value: i32,
}

const EV_KEY: u16 = 0x01;
const KEY_RELEASE: i32 = 0;
const KEY_PRESS: i32 = 1;
const KEY_AUTOREPEAT: i32 = 2;
const INPUT_EVENT_SIZE: usize = std::mem::size_of::<InputEvent>();

/// Map a kernel key value to an event type. `None` for values to drop.
fn classify(value: i32, forward_repeats: bool) -> Option<KeyEventType> {
    match value {
        KEY_PRESS => Some(KeyEventType::Press),
        KEY_AUTOREPEAT if forward_repeats => Some(KeyEventType::Press),
        KEY_RELEASE => Some(KeyEventType::Release),
        _ => None,
    }
}

fn find_keyboard_devices() -> Result<Vec<PathBuf>, EvdevError> {
    let input_dir = Path::new("/dev/input");
    if !input_dir.exists() {
        return Err(EvdevError::EnumerationFailed(
            "/dev/input does not exist".to_string(),
        ));
    }

    let entries = fs::read_dir(input_dir)?;
    let keyboards: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("event"))
        })
        .filter(|path| is_keyboard_device(path))
        .collect();

    if keyboards.is_empty() {
        return Err(EvdevError::NoDevices);
    }
    Ok(keyboards)
}

/// Heuristic: a keyboard advertises many key capabilities in sysfs
fn is_keyboard_device(device_path: &Path) -> bool {
    let Some(name) = device_path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    let caps_path = format!("/sys/class/input/{}/device/capabilities/key", name);
    if let Ok(caps) = fs::read_to_string(&caps_path) {
        let total_bits: u32 = caps
            .split_whitespace()
            .filter_map(|hex| u64::from_str_radix(hex, 16).ok())
            .map(|n| n.count_ones())
            .sum();
        if total_bits > 0 {
            return total_bits > 50;
        }
    }

    let name_path = format!("/sys/class/input/{}/device/name", name);
    fs::read_to_string(&name_path).is_ok_and(|dev_name| {
        let lower = dev_name.to_lowercase();
        lower.contains("keyboard") || lower.contains("kbd")
    })
}

fn set_nonblocking(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: fd is owned by `file` and stays open for the duration of both calls.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Evdev-based keyboard listener
pub struct EvdevListener {
    devices: Vec<File>,
    device_paths: Vec<PathBuf>,
    buffer: Vec<u8>,
    forward_repeats: bool,
}

impl EvdevListener {
    pub fn new() -> Result<Self, EvdevError> {
        let candidates = find_keyboard_devices()?;
        let mut devices = Vec::new();
        let mut device_paths = Vec::new();

        for path in candidates {
            match File::open(&path) {
                Ok(file) => {
                    set_nonblocking(&file)?;
                    devices.push(file);
                    device_paths.push(path);
                }
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    log::debug!("skipping {}: permission denied", path.display());
                }
                Err(e) => return Err(EvdevError::Io(e)),
            }
        }

        if devices.is_empty() {
            return Err(EvdevError::PermissionDenied(
                "any keyboard device; run with sudo or add user to the 'input' group".to_string(),
            ));
        }

        log::debug!("evdev listening on {} device(s)", devices.len());
        Ok(Self {
            devices,
            device_paths,
            buffer: vec![0u8; INPUT_EVENT_SIZE * 64],
            forward_repeats: true,
        })
    }

    /// Whether kernel auto-repeat is forwarded as presses (default `true`)
    pub fn set_forward_repeats(&mut self, forward: bool) {
        self.forward_repeats = forward;
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device_paths(&self) -> &[PathBuf] {
        &self.device_paths
    }
}

impl KeyboardPoller for EvdevListener {
    fn name(&self) -> &'static str {
        "evdev"
    }

    fn poll(&mut self, bus: &SignalBus) -> usize {
        let mut event_count = 0;

        for device in &mut self.devices {
            loop {
                let bytes_read = match device.read(&mut self.buffer) {
                    Ok(n) if n >= INPUT_EVENT_SIZE => n,
                    Ok(_) => break,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::warn!("evdev read failed: {}", e);
                        break;
                    }
                };

                let now = Instant::now();
                for chunk in self.buffer[..bytes_read].chunks_exact(INPUT_EVENT_SIZE) {
                    // SAFETY: chunk is exactly INPUT_EVENT_SIZE bytes; the kernel
                    // writes whole `input_event` structs.
                    let raw: InputEvent =
                        unsafe { std::ptr::read_unaligned(chunk.as_ptr() as *const InputEvent) };
                    if raw.event_type != EV_KEY {
                        continue;
                    }
                    let Some(event_type) = classify(raw.value, self.forward_repeats) else {
                        continue;
                    };
                    let event = KeyEvent::new(KeyCode::new(raw.code), event_type, now, EventOrigin::Physical);
                    bus.emit(&event);
                    event_count += 1;
                }
            }
        }

        event_count
    }
}

/// Get a status message about evdev availability
pub fn evdev_status() -> String {
    match find_keyboard_devices() {
        Ok(devices) => format!("{} keyboard device(s) found", devices.len()),
        Err(EvdevError::NoDevices) => "No keyboard devices found".to_string(),
        Err(e) => format!("Error: {}", e),
    }
}
