//! Handler table and repeat scheduling
//!
//! A bound handler fires once on the released-to-held transition of its key
//! and, if repeatable, again at every cadence tick while the same press is
//! still held. Chains carry no cancellation handle: each tick re-reads the
//! tracker and stops once the press it was started for is over.

use crate::keyboard::{KeyCode, KeyEvent, KeyboardState};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Callback bound to a key
pub type KeyHandler = dyn FnMut(&KeyEvent) -> anyhow::Result<()>;

pub(crate) type SharedHandler = Rc<RefCell<KeyHandler>>;

/// What `unbind` (or rebinding) does to a chain that is already running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnbindPolicy {
    /// The chain keeps the handler it started with until the key is released
    #[default]
    PreserveInFlight,
    /// The chain stops at its next tick once its table entry is gone or replaced
    Interrupt,
}

#[derive(Clone)]
pub(crate) struct HandlerEntry {
    id: u64,
    handler: SharedHandler,
    repeatable: bool,
}

/// A running repeat chain's view of the press it belongs to
pub(crate) struct RepeatChain {
    pub key: KeyCode,
    pub generation: u64,
    pub event: KeyEvent,
    entry: HandlerEntry,
}

/// Returned for a released-to-held transition of a bound key
pub(crate) struct Dispatch {
    pub handler: SharedHandler,
    pub chain: Option<RepeatChain>,
}

/// Counters for handler activity over a session's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Handler calls made on a released-to-held transition
    pub initial_calls: u64,
    /// Handler calls made by repeat chains
    pub repeat_ticks: u64,
    /// Handler calls that returned an error
    pub handler_errors: u64,
    /// Calls skipped because the handler was already running
    pub skipped: u64,
    /// Repeat chains spawned for repeatable bindings
    pub chains_started: u64,
}

/// Result of one handler call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Invocation {
    Fired,
    Failed,
    Skipped,
}

pub struct RepeatDispatcher {
    interval: Duration,
    policy: UnbindPolicy,
    handlers: HashMap<KeyCode, HandlerEntry>,
    next_id: u64,
    stats: DispatchStats,
}

/// Shortest cadence a dispatcher runs at; shorter intervals are raised to it
pub const MIN_REPEAT_INTERVAL: Duration = Duration::from_millis(1);

impl RepeatDispatcher {
    pub fn new(interval: Duration, policy: UnbindPolicy) -> Self {
        if interval < MIN_REPEAT_INTERVAL {
            log::warn!(
                "repeat interval {:?} is below {:?}, using the minimum",
                interval,
                MIN_REPEAT_INTERVAL
            );
        }
        Self {
            interval: interval.max(MIN_REPEAT_INTERVAL),
            policy,
            handlers: HashMap::new(),
            next_id: 0,
            stats: DispatchStats::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn policy(&self) -> UnbindPolicy {
        self.policy
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Bind `handler` to `key`, replacing any previous entry.
    /// Returns `true` if an entry was replaced.
    pub fn bind(&mut self, key: KeyCode, handler: SharedHandler, repeatable: bool) -> bool {
        self.next_id += 1;
        let entry = HandlerEntry {
            id: self.next_id,
            handler,
            repeatable,
        };
        self.handlers.insert(key, entry).is_some()
    }

    pub fn unbind(&mut self, key: KeyCode) -> bool {
        self.handlers.remove(&key).is_some()
    }

    pub fn is_bound(&self, key: KeyCode) -> bool {
        self.handlers.contains_key(&key)
    }

    pub fn is_repeatable(&self, key: KeyCode) -> Option<bool> {
        self.handlers.get(&key).map(|e| e.repeatable)
    }

    /// Look up what to fire for a fresh press. `None` for unbound keys.
    pub(crate) fn on_pressed(&self, event: &KeyEvent, generation: u64) -> Option<Dispatch> {
        let entry = self.handlers.get(&event.key)?;
        let chain = entry.repeatable.then(|| RepeatChain {
            key: event.key,
            generation,
            event: event.clone(),
            entry: entry.clone(),
        });
        Some(Dispatch {
            handler: Rc::clone(&entry.handler),
            chain,
        })
    }

    /// Decide whether a chain fires at this tick, and with which handler
    pub(crate) fn continue_chain(
        &self,
        chain: &RepeatChain,
        state: &KeyboardState,
    ) -> Option<SharedHandler> {
        if !state.is_held_by(chain.key, chain.generation) {
            return None;
        }
        match self.policy {
            UnbindPolicy::PreserveInFlight => Some(Rc::clone(&chain.entry.handler)),
            UnbindPolicy::Interrupt => self
                .handlers
                .get(&chain.key)
                .filter(|entry| entry.id == chain.entry.id)
                .map(|entry| Rc::clone(&entry.handler)),
        }
    }

    pub(crate) fn record_initial(&mut self, outcome: Invocation) {
        if outcome == Invocation::Fired || outcome == Invocation::Failed {
            self.stats.initial_calls += 1;
        }
        self.record_outcome(outcome);
    }

    pub(crate) fn record_tick(&mut self, outcome: Invocation) {
        if outcome == Invocation::Fired || outcome == Invocation::Failed {
            self.stats.repeat_ticks += 1;
        }
        self.record_outcome(outcome);
    }

    pub(crate) fn record_chain_started(&mut self) {
        self.stats.chains_started += 1;
    }

    fn record_outcome(&mut self, outcome: Invocation) {
        match outcome {
            Invocation::Failed => self.stats.handler_errors += 1,
            Invocation::Skipped => self.stats.skipped += 1,
            Invocation::Fired => {}
        }
    }
}

/// Call a handler. Errors are logged and reported, never propagated.
pub(crate) fn invoke(handler: &SharedHandler, event: &KeyEvent, tick: u64) -> Invocation {
    let Ok(mut f) = handler.try_borrow_mut() else {
        log::debug!("handler for {} is already running, skipping tick {}", event.key, tick);
        return Invocation::Skipped;
    };
    match f(event) {
        Ok(()) => Invocation::Fired,
        Err(e) => {
            log::warn!("handler for {} failed on tick {}: {:#}", event.key, tick, e);
            Invocation::Failed
        }
    }
}

/// Build the ticker for a chain anchored at the press instant
pub(crate) fn chain_ticker(pressed_at: Instant, interval: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(pressed_at + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::{Injection, KeyEventType};
    use std::cell::Cell;

    const KEY: KeyCode = KeyCode(57);

    fn counting_handler(count: &Rc<Cell<u32>>) -> SharedHandler {
        let count = Rc::clone(count);
        Rc::new(RefCell::new(move |_: &KeyEvent| -> anyhow::Result<()> {
            count.set(count.get() + 1);
            Ok(())
        }))
    }

    fn pressed(state: &mut KeyboardState) -> (KeyEvent, u64) {
        let event = Injection::Code(KEY).into_event(KeyEventType::Press);
        match state.apply(&event) {
            crate::keyboard::Transition::Pressed { generation } => (event, generation),
            other => panic!("unexpected transition {:?}", other),
        }
    }

    #[test]
    fn zero_interval_is_raised_to_minimum() {
        let dispatcher = RepeatDispatcher::new(Duration::ZERO, UnbindPolicy::default());
        assert_eq!(dispatcher.interval(), MIN_REPEAT_INTERVAL);

        let dispatcher = RepeatDispatcher::new(Duration::from_millis(20), UnbindPolicy::default());
        assert_eq!(dispatcher.interval(), Duration::from_millis(20));
    }

    #[test]
    fn unbound_key_dispatches_nothing() {
        let dispatcher = RepeatDispatcher::new(Duration::from_millis(33), UnbindPolicy::default());
        let mut state = KeyboardState::new();
        let (event, generation) = pressed(&mut state);
        assert!(dispatcher.on_pressed(&event, generation).is_none());
    }

    #[test]
    fn single_shot_binding_has_no_chain() {
        let mut dispatcher = RepeatDispatcher::new(Duration::from_millis(33), UnbindPolicy::default());
        let count = Rc::new(Cell::new(0));
        dispatcher.bind(KEY, counting_handler(&count), false);
        let mut state = KeyboardState::new();
        let (event, generation) = pressed(&mut state);
        let dispatch = dispatcher.on_pressed(&event, generation).unwrap();
        assert!(dispatch.chain.is_none());
        assert_eq!(dispatcher.is_repeatable(KEY), Some(false));
    }

    #[test]
    fn rebinding_replaces_entry() {
        let mut dispatcher = RepeatDispatcher::new(Duration::from_millis(33), UnbindPolicy::default());
        let count = Rc::new(Cell::new(0));
        assert!(!dispatcher.bind(KEY, counting_handler(&count), true));
        assert!(dispatcher.bind(KEY, counting_handler(&count), false));
        assert_eq!(dispatcher.is_repeatable(KEY), Some(false));
        assert!(dispatcher.unbind(KEY));
        assert!(!dispatcher.unbind(KEY));
    }

    #[test]
    fn chain_stops_on_release_or_new_press() {
        let mut dispatcher = RepeatDispatcher::new(Duration::from_millis(33), UnbindPolicy::default());
        let count = Rc::new(Cell::new(0));
        dispatcher.bind(KEY, counting_handler(&count), true);
        let mut state = KeyboardState::new();
        let (event, generation) = pressed(&mut state);
        let chain = dispatcher.on_pressed(&event, generation).unwrap().chain.unwrap();
        assert!(dispatcher.continue_chain(&chain, &state).is_some());

        state.apply(&Injection::Code(KEY).into_event(KeyEventType::Release));
        assert!(dispatcher.continue_chain(&chain, &state).is_none());

        // A newer press belongs to a newer chain
        pressed(&mut state);
        assert!(dispatcher.continue_chain(&chain, &state).is_none());
    }

    #[test]
    fn interrupt_policy_stops_unbound_chain() {
        let mut dispatcher = RepeatDispatcher::new(Duration::from_millis(33), UnbindPolicy::Interrupt);
        let count = Rc::new(Cell::new(0));
        dispatcher.bind(KEY, counting_handler(&count), true);
        let mut state = KeyboardState::new();
        let (event, generation) = pressed(&mut state);
        let chain = dispatcher.on_pressed(&event, generation).unwrap().chain.unwrap();

        dispatcher.bind(KEY, counting_handler(&count), true);
        assert!(dispatcher.continue_chain(&chain, &state).is_none());
    }

    #[test]
    fn preserve_policy_keeps_unbound_chain() {
        let mut dispatcher = RepeatDispatcher::new(Duration::from_millis(33), UnbindPolicy::PreserveInFlight);
        let count = Rc::new(Cell::new(0));
        dispatcher.bind(KEY, counting_handler(&count), true);
        let mut state = KeyboardState::new();
        let (event, generation) = pressed(&mut state);
        let chain = dispatcher.on_pressed(&event, generation).unwrap().chain.unwrap();

        dispatcher.unbind(KEY);
        let handler = dispatcher.continue_chain(&chain, &state).unwrap();
        assert_eq!(invoke(&handler, &chain.event, 1), Invocation::Fired);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn failing_handler_is_reported_not_propagated() {
        let mut dispatcher = RepeatDispatcher::new(Duration::from_millis(33), UnbindPolicy::default());
        let handler: SharedHandler = Rc::new(RefCell::new(
            |_: &KeyEvent| -> anyhow::Result<()> { Err(anyhow::anyhow!("boom")) },
        ));
        let event = Injection::Code(KEY).into_event(KeyEventType::Press);
        let outcome = invoke(&handler, &event, 0);
        assert_eq!(outcome, Invocation::Failed);
        dispatcher.record_initial(outcome);
        assert_eq!(dispatcher.stats().handler_errors, 1);
        assert_eq!(dispatcher.stats().initial_calls, 1);
    }
}
