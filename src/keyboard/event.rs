//! Keyboard event types

use super::KeyCode;
use std::time::Instant;

/// Type of keyboard event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyEventType {
    /// Key was pressed down (also used for platform auto-repeat)
    Press,
    /// Key was released
    Release,
}

/// Where an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// Delivered by an input source
    Physical,
    /// Produced programmatically through a session's inject calls
    Injected,
}

/// A keyboard event with timing information
#[derive(Debug, Clone, PartialEq)]
pub struct KeyEvent {
    /// The key code
    pub key: KeyCode,
    /// Type of event (press/release)
    pub event_type: KeyEventType,
    /// When the event occurred
    pub timestamp: Instant,
    pub origin: EventOrigin,
}

impl KeyEvent {
    pub fn new(key: KeyCode, event_type: KeyEventType, timestamp: Instant, origin: EventOrigin) -> Self {
        Self {
            key,
            event_type,
            timestamp,
            origin,
        }
    }

    /// A physical press stamped now
    pub fn press(key: impl Into<KeyCode>) -> Self {
        Self::new(key.into(), KeyEventType::Press, Instant::now(), EventOrigin::Physical)
    }

    /// A physical release stamped now
    pub fn release(key: impl Into<KeyCode>) -> Self {
        Self::new(key.into(), KeyEventType::Release, Instant::now(), EventOrigin::Physical)
    }

    pub fn is_press(&self) -> bool {
        self.event_type == KeyEventType::Press
    }
}

/// Input accepted by the inject calls: a bare key code, or a fully built event.
///
/// Both forms are normalized by [`Injection::into_event`] before they reach
/// the tracker.
#[derive(Debug, Clone)]
pub enum Injection {
    Code(KeyCode),
    Event(KeyEvent),
}

impl Injection {
    /// Normalize into an injected event of the given type.
    ///
    /// A prebuilt event keeps its key and timestamp; its type and origin are
    /// overwritten so that `inject_press(release_event)` still presses.
    pub fn into_event(self, event_type: KeyEventType) -> KeyEvent {
        match self {
            Injection::Code(key) => {
                KeyEvent::new(key, event_type, Instant::now(), EventOrigin::Injected)
            }
            Injection::Event(mut event) => {
                event.event_type = event_type;
                event.origin = EventOrigin::Injected;
                event
            }
        }
    }

    pub fn key(&self) -> KeyCode {
        match self {
            Injection::Code(key) => *key,
            Injection::Event(event) => event.key,
        }
    }
}

impl From<KeyCode> for Injection {
    fn from(key: KeyCode) -> Self {
        Injection::Code(key)
    }
}

impl From<u16> for Injection {
    fn from(code: u16) -> Self {
        Injection::Code(KeyCode(code))
    }
}

impl From<KeyEvent> for Injection {
    fn from(event: KeyEvent) -> Self {
        Injection::Event(event)
    }
}

impl From<&KeyEvent> for Injection {
    fn from(event: &KeyEvent) -> Self {
        Injection::Event(event.clone())
    }
}
