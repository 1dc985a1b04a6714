//! Keyboard state tracking
//!
//! Per-key held/released state plus the interception set that decides
//! whether physical events may change it.

use super::{EventOrigin, KeyCode, KeyEvent, KeyEventType};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// State of a single key
#[derive(Debug, Clone, Default)]
pub struct KeyState {
    /// Whether the key is currently held
    pub is_pressed: bool,
    /// Incremented on every released-to-held transition
    pub generation: u64,
    /// When the key was last pressed
    pub last_press: Option<Instant>,
    /// When the key was last released
    pub last_release: Option<Instant>,
    /// Duration of the last press (press to release)
    pub last_press_duration: Option<Duration>,
}

/// Outcome of applying one event to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Released to held. Carries the new press generation.
    Pressed { generation: u64 },
    /// Held to released
    Released,
    /// Press while held, or release while released
    Redundant,
    /// Physical event for an intercepted key; state untouched
    Intercepted,
}

/// Held state for every key, with physical input filtering.
///
/// A key with no entry is released. Injected events always apply;
/// physical events are dropped while their key is intercepted.
#[derive(Debug, Default)]
pub struct KeyboardState {
    keys: HashMap<KeyCode, KeyState>,
    intercepted: HashSet<KeyCode>,
}

impl KeyboardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event, filtering physical input for intercepted keys
    pub fn apply(&mut self, event: &KeyEvent) -> Transition {
        match event.event_type {
            KeyEventType::Press => self.report_press(event),
            KeyEventType::Release => self.report_release(event),
        }
    }

    pub fn report_press(&mut self, event: &KeyEvent) -> Transition {
        if self.filtered(event) {
            return Transition::Intercepted;
        }
        self.set_key_down(event.key, event.timestamp)
    }

    pub fn report_release(&mut self, event: &KeyEvent) -> Transition {
        if self.filtered(event) {
            return Transition::Intercepted;
        }
        self.set_key_up(event.key, event.timestamp)
    }

    fn filtered(&self, event: &KeyEvent) -> bool {
        let filtered = event.origin == EventOrigin::Physical && self.intercepted.contains(&event.key);
        if filtered {
            log::debug!("ignoring physical {:?} for intercepted key {}", event.event_type, event.key);
        }
        filtered
    }

    fn set_key_down(&mut self, key: KeyCode, at: Instant) -> Transition {
        let state = self.keys.entry(key).or_default();
        if state.is_pressed {
            return Transition::Redundant;
        }
        state.is_pressed = true;
        state.generation += 1;
        state.last_press = Some(at);
        Transition::Pressed {
            generation: state.generation,
        }
    }

    fn set_key_up(&mut self, key: KeyCode, at: Instant) -> Transition {
        let Some(state) = self.keys.get_mut(&key) else {
            return Transition::Redundant;
        };
        if !state.is_pressed {
            return Transition::Redundant;
        }
        state.is_pressed = false;
        state.last_release = Some(at);
        state.last_press_duration = state.last_press.map(|p| at.saturating_duration_since(p));
        Transition::Released
    }

    pub fn is_held(&self, key: KeyCode) -> bool {
        self.keys.get(&key).is_some_and(|s| s.is_pressed)
    }

    /// Generation of the current (or last) press; 0 if never pressed
    pub fn generation(&self, key: KeyCode) -> u64 {
        self.keys.get(&key).map_or(0, |s| s.generation)
    }

    /// True while `key` is held by the press numbered `generation`
    pub fn is_held_by(&self, key: KeyCode, generation: u64) -> bool {
        self.keys
            .get(&key)
            .is_some_and(|s| s.is_pressed && s.generation == generation)
    }

    pub fn get_key_state(&self, key: KeyCode) -> Option<&KeyState> {
        self.keys.get(&key)
    }

    pub fn held_keys(&self) -> Vec<KeyCode> {
        self.keys
            .iter()
            .filter(|(_, s)| s.is_pressed)
            .map(|(k, _)| *k)
            .collect()
    }

    /// Put a key under programmatic control. Returns `false` if it already was.
    pub fn intercept(&mut self, key: KeyCode) -> bool {
        self.intercepted.insert(key)
    }

    /// Hand a key back to physical input. Returns `false` if it was not intercepted.
    pub fn release_interception(&mut self, key: KeyCode) -> bool {
        self.intercepted.remove(&key)
    }

    pub fn is_intercepted(&self, key: KeyCode) -> bool {
        self.intercepted.contains(&key)
    }

    pub fn intercepted_keys(&self) -> impl Iterator<Item = KeyCode> + '_ {
        self.intercepted.iter().copied()
    }
}
