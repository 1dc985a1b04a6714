//! Keyboard events, key state tracking and input sources

mod device_listener;
mod event;
mod source;
mod state;
pub mod keymap;

#[cfg(target_os = "linux")]
mod evdev_listener;

pub use device_listener::{scancode, DeviceListener};
pub use event::{EventOrigin, Injection, KeyEvent, KeyEventType};
pub use keymap::{get_key_info, key_by_name, KeyCode, KeyGroup, KeyInfo, UnknownKeyGroup, CATALOG};
pub use source::{InputSource, KeyboardPoller, Listener, ListenerId, SignalBus, SourceId, Subscription};
pub use state::{KeyState, KeyboardState, Transition};

#[cfg(target_os = "linux")]
pub use evdev_listener::{evdev_status, EvdevError, EvdevListener};
