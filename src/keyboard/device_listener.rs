//! Portable keyboard listener built on device_query
//!
//! Polls the set of currently pressed keys and emits the differences. The
//! platform's auto-repeat is invisible here, so this listener suits sessions
//! but cannot feed the calibrator.

use super::{EventOrigin, KeyCode, KeyEvent, KeyEventType, KeyboardPoller, SignalBus};
use device_query::{DeviceQuery, DeviceState, Keycode as DK};
use std::time::Instant;

/// Map device_query keycodes to evdev scancodes. Unmapped keys yield `None`.
pub fn scancode(keycode: DK) -> Option<KeyCode> {
    let code = match keycode {
        DK::Escape => 1,
        DK::Key1 => 2, DK::Key2 => 3, DK::Key3 => 4, DK::Key4 => 5, DK::Key5 => 6,
        DK::Key6 => 7, DK::Key7 => 8, DK::Key8 => 9, DK::Key9 => 10, DK::Key0 => 11,
        DK::Minus => 12, DK::Equal => 13, DK::Backspace => 14, DK::Tab => 15,
        DK::Q => 16, DK::W => 17, DK::E => 18, DK::R => 19, DK::T => 20,
        DK::Y => 21, DK::U => 22, DK::I => 23, DK::O => 24, DK::P => 25,
        DK::LeftBracket => 26, DK::RightBracket => 27, DK::Enter => 28, DK::LControl => 29,
        DK::A => 30, DK::S => 31, DK::D => 32, DK::F => 33, DK::G => 34,
        DK::H => 35, DK::J => 36, DK::K => 37, DK::L => 38,
        DK::Semicolon => 39, DK::Apostrophe => 40, DK::Grave => 41, DK::LShift => 42,
        DK::BackSlash => 43,
        DK::Z => 44, DK::X => 45, DK::C => 46, DK::V => 47, DK::B => 48,
        DK::N => 49, DK::M => 50,
        DK::Comma => 51, DK::Dot => 52, DK::Slash => 53, DK::RShift => 54,
        DK::NumpadMultiply => 55, DK::LAlt => 56, DK::Space => 57, DK::CapsLock => 58,
        DK::F1 => 59, DK::F2 => 60, DK::F3 => 61, DK::F4 => 62, DK::F5 => 63,
        DK::F6 => 64, DK::F7 => 65, DK::F8 => 66, DK::F9 => 67, DK::F10 => 68,
        DK::Numpad7 => 71, DK::Numpad8 => 72, DK::Numpad9 => 73, DK::NumpadSubtract => 74,
        DK::Numpad4 => 75, DK::Numpad5 => 76, DK::Numpad6 => 77, DK::NumpadAdd => 78,
        DK::Numpad1 => 79, DK::Numpad2 => 80, DK::Numpad3 => 81, DK::Numpad0 => 82,
        DK::F11 => 87, DK::F12 => 88,
        DK::RControl => 97, DK::NumpadDivide => 98, DK::RAlt => 100,
        DK::Home => 102, DK::Up => 103, DK::PageUp => 104, DK::Left => 105,
        DK::Right => 106, DK::End => 107, DK::Down => 108, DK::PageDown => 109,
        DK::Insert => 110, DK::Delete => 111,
        DK::LMeta => 125, DK::RMeta => 126,
        _ => return None,
    };
    Some(KeyCode(code))
}

/// Keyboard listener that polls for key state changes
pub struct DeviceListener {
    device_state: DeviceState,
    last_keys: Vec<DK>,
}

impl DeviceListener {
    pub fn new() -> Self {
        Self {
            device_state: DeviceState::new(),
            last_keys: Vec::new(),
        }
    }
}

impl Default for DeviceListener {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyboardPoller for DeviceListener {
    fn name(&self) -> &'static str {
        "device_query"
    }

    fn poll(&mut self, bus: &SignalBus) -> usize {
        let now = Instant::now();
        let current_keys = self.device_state.get_keys();

        let pressed = current_keys
            .iter()
            .filter(|k| !self.last_keys.contains(k))
            .map(|k| (*k, KeyEventType::Press));
        let released = self
            .last_keys
            .iter()
            .filter(|k| !current_keys.contains(k))
            .map(|k| (*k, KeyEventType::Release));

        let events: Vec<KeyEvent> = pressed
            .chain(released)
            .filter_map(|(k, event_type)| {
                scancode(k).map(|code| KeyEvent::new(code, event_type, now, EventOrigin::Physical))
            })
            .collect();

        self.last_keys = current_keys;
        for event in &events {
            bus.emit(event);
        }
        events.len()
    }
}
