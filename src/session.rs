//! Input session: tracker, dispatcher and source attachment in one unit
//!
//! A session is single-threaded. Repeat chains run as local tasks, so any
//! call that can press a bound repeatable key (an inject, a report, or a
//! physical press delivered by an attached source) must happen inside a
//! [`tokio::task::LocalSet`].

use crate::config::RepeatConfig;
use crate::dispatch::{self, DispatchStats, Invocation, RepeatChain, RepeatDispatcher, UnbindPolicy};
use crate::keyboard::{
    InputSource, Injection, KeyCode, KeyEvent, KeyEventType, KeyboardState, Listener, ListenerId,
    SourceId, Transition,
};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Default repeat cadence, measured on common desktop platforms (~32.97ms)
pub const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_millis(33);

struct Attachment {
    source: SourceId,
    press: ListenerId,
    release: ListenerId,
}

struct SessionInner {
    state: KeyboardState,
    dispatcher: RepeatDispatcher,
    attachment: Option<Attachment>,
}

/// Tracks held keys from a source and fires bound handlers while they are held.
///
/// Held state, interceptions and bindings survive [`detach`](Self::detach);
/// a key held at detach time stays held (and keeps repeating) until an
/// injected release arrives or the session is attached again and sees one.
///
/// Detach before dropping the session. Listeners of a session dropped while
/// attached stay registered on the source as no-ops until the source goes away.
pub struct InputSession {
    inner: Rc<RefCell<SessionInner>>,
}

impl InputSession {
    pub fn new(interval: Duration) -> Self {
        Self::with_policy(interval, UnbindPolicy::default())
    }

    pub fn with_policy(interval: Duration, policy: UnbindPolicy) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SessionInner {
                state: KeyboardState::new(),
                dispatcher: RepeatDispatcher::new(interval, policy),
                attachment: None,
            })),
        }
    }

    pub fn from_config(config: &RepeatConfig) -> Self {
        Self::with_policy(config.interval(), config.unbind_policy)
    }

    pub fn repeat_interval(&self) -> Duration {
        self.inner.borrow().dispatcher.interval()
    }

    pub fn unbind_policy(&self) -> UnbindPolicy {
        self.inner.borrow().dispatcher.policy()
    }

    /// Register press and release listeners on `source`.
    ///
    /// Returns `false` without registering anything if already attached.
    pub fn attach<S: InputSource + ?Sized>(&self, source: &S) -> bool {
        if self.is_attached() {
            log::debug!("session already attached, ignoring attach");
            return false;
        }
        let press = source.subscribe(KeyEventType::Press, self.listener());
        let release = source.subscribe(KeyEventType::Release, self.listener());
        self.inner.borrow_mut().attachment = Some(Attachment {
            source: source.source_id(),
            press,
            release,
        });
        log::debug!("session attached to {:?}", source.source_id());
        true
    }

    /// Remove the listeners registered by [`attach`](Self::attach).
    ///
    /// Returns `false` if the session was not attached, or was attached to a
    /// different source; nothing is removed in either case.
    pub fn detach<S: InputSource + ?Sized>(&self, source: &S) -> bool {
        let attachment = {
            let mut inner = self.inner.borrow_mut();
            match inner.attachment.as_ref().map(|a| a.source) {
                Some(attached) if attached == source.source_id() => inner.attachment.take(),
                Some(attached) => {
                    log::warn!(
                        "detach from {:?} ignored, session is attached to {:?}",
                        source.source_id(),
                        attached
                    );
                    return false;
                }
                None => return false,
            }
        };
        let Some(attachment) = attachment else {
            return false;
        };
        source.unsubscribe(attachment.press);
        source.unsubscribe(attachment.release);
        log::debug!("session detached from {:?}", attachment.source);
        true
    }

    pub fn is_attached(&self) -> bool {
        self.inner.borrow().attachment.is_some()
    }

    /// The source this session is attached to, if any
    pub fn attached_source(&self) -> Option<SourceId> {
        self.inner.borrow().attachment.as_ref().map(|a| a.source)
    }

    fn listener(&self) -> Listener {
        let weak = Rc::downgrade(&self.inner);
        Rc::new(move |event: &KeyEvent| {
            if let Some(inner) = weak.upgrade() {
                process(&inner, event);
            }
        })
    }

    /// Bind a repeating handler to `key`, replacing any previous binding
    pub fn bind<F>(&self, key: KeyCode, handler: F) -> &Self
    where
        F: FnMut(&KeyEvent) -> anyhow::Result<()> + 'static,
    {
        self.bind_with(key, handler, true)
    }

    /// Bind a handler that fires once per press
    pub fn bind_once<F>(&self, key: KeyCode, handler: F) -> &Self
    where
        F: FnMut(&KeyEvent) -> anyhow::Result<()> + 'static,
    {
        self.bind_with(key, handler, false)
    }

    pub fn bind_with<F>(&self, key: KeyCode, handler: F, repeatable: bool) -> &Self
    where
        F: FnMut(&KeyEvent) -> anyhow::Result<()> + 'static,
    {
        let handler: dispatch::SharedHandler = Rc::new(RefCell::new(handler));
        if self.inner.borrow_mut().dispatcher.bind(key, handler, repeatable) {
            log::debug!("replaced handler for {}", key);
        }
        self
    }

    /// Remove the binding for `key`. Future presses no longer fire; what
    /// happens to a chain already running depends on the [`UnbindPolicy`].
    pub fn unbind(&self, key: KeyCode) -> bool {
        self.inner.borrow_mut().dispatcher.unbind(key)
    }

    pub fn is_bound(&self, key: KeyCode) -> bool {
        self.inner.borrow().dispatcher.is_bound(key)
    }

    /// Ignore physical events for `key` until [`release`](Self::release).
    /// The key's current held state is left as it is.
    pub fn intercept(&self, key: KeyCode) -> bool {
        self.inner.borrow_mut().state.intercept(key)
    }

    /// Return `key` to physical input
    pub fn release(&self, key: KeyCode) -> bool {
        self.inner.borrow_mut().state.release_interception(key)
    }

    pub fn is_intercepted(&self, key: KeyCode) -> bool {
        self.inner.borrow().state.is_intercepted(key)
    }

    pub fn intercepted_keys(&self) -> Vec<KeyCode> {
        let mut keys: Vec<KeyCode> = self.inner.borrow().state.intercepted_keys().collect();
        keys.sort();
        keys
    }

    /// Feed an event as if an attached source had delivered it
    pub fn report(&self, event: &KeyEvent) -> Transition {
        process(&self.inner, event)
    }

    pub fn report_press(&self, key: KeyCode) -> Transition {
        self.report(&KeyEvent::press(key))
    }

    pub fn report_release(&self, key: KeyCode) -> Transition {
        self.report(&KeyEvent::release(key))
    }

    /// Press a key programmatically, regardless of interception
    pub fn inject_press(&self, input: impl Into<Injection>) -> Transition {
        let input = input.into();
        log::trace!("inject press {}", input.key());
        let event = input.into_event(KeyEventType::Press);
        process(&self.inner, &event)
    }

    /// Release a key programmatically, regardless of interception
    pub fn inject_release(&self, input: impl Into<Injection>) -> Transition {
        let input = input.into();
        log::trace!("inject release {}", input.key());
        let event = input.into_event(KeyEventType::Release);
        process(&self.inner, &event)
    }

    pub fn is_held(&self, key: KeyCode) -> bool {
        self.inner.borrow().state.is_held(key)
    }

    pub fn held_keys(&self) -> Vec<KeyCode> {
        self.inner.borrow().state.held_keys()
    }

    pub fn stats(&self) -> DispatchStats {
        self.inner.borrow().dispatcher.stats()
    }
}

impl Default for InputSession {
    fn default() -> Self {
        Self::new(DEFAULT_REPEAT_INTERVAL)
    }
}

impl Drop for InputSession {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.try_borrow() {
            if let Some(attachment) = &inner.attachment {
                log::warn!("session dropped while attached to {:?}", attachment.source);
            }
        }
    }
}

/// Apply one event and fire whatever it triggers.
///
/// The session borrow is released before any handler runs.
fn process(inner: &Rc<RefCell<SessionInner>>, event: &KeyEvent) -> Transition {
    let (transition, dispatch) = {
        let mut guard = inner.borrow_mut();
        let transition = guard.state.apply(event);
        let dispatch = match transition {
            Transition::Pressed { generation } => guard.dispatcher.on_pressed(event, generation),
            _ => None,
        };
        (transition, dispatch)
    };

    if transition == Transition::Redundant {
        log::debug!("absorbed redundant {:?} for {}", event.event_type, event.key);
    }

    let Some(dispatch) = dispatch else {
        return transition;
    };

    let pressed_at = tokio::time::Instant::now();
    let outcome = dispatch::invoke(&dispatch.handler, event, 0);
    inner.borrow_mut().dispatcher.record_initial(outcome);

    if let Some(chain) = dispatch.chain {
        let interval = {
            let mut guard = inner.borrow_mut();
            guard.dispatcher.record_chain_started();
            guard.dispatcher.interval()
        };
        tokio::task::spawn_local(run_chain(Rc::downgrade(inner), chain, pressed_at, interval));
    }
    transition
}

async fn run_chain(
    session: Weak<RefCell<SessionInner>>,
    chain: RepeatChain,
    pressed_at: tokio::time::Instant,
    interval: Duration,
) {
    let mut ticker = dispatch::chain_ticker(pressed_at, interval);
    let mut tick = 0u64;
    loop {
        ticker.tick().await;
        let Some(inner) = session.upgrade() else {
            break;
        };
        let handler = {
            let guard = inner.borrow();
            guard.dispatcher.continue_chain(&chain, &guard.state)
        };
        let Some(handler) = handler else {
            log::trace!("repeat chain for {} ended after {} ticks", chain.key, tick);
            break;
        };
        tick += 1;
        log::trace!("repeat tick {} for {}", tick, chain.key);
        let outcome: Invocation = dispatch::invoke(&handler, &chain.event, tick);
        inner.borrow_mut().dispatcher.record_tick(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::SignalBus;
    use std::cell::Cell;
    use tokio::task::LocalSet;
    use tokio::time::sleep;

    const KEY: KeyCode = KeyCode(30);
    const T: Duration = Duration::from_millis(33);

    fn counter() -> (Rc<Cell<u32>>, impl FnMut(&KeyEvent) -> anyhow::Result<()>) {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        (count, move |_: &KeyEvent| -> anyhow::Result<()> {
            c.set(c.get() + 1);
            Ok(())
        })
    }

    #[test]
    fn unsignaled_keys_are_not_held() {
        let session = InputSession::default();
        for code in 0..200 {
            assert!(!session.is_held(KeyCode(code)));
        }
    }

    #[test]
    fn single_shot_fires_once_per_press() {
        let session = InputSession::default();
        let (count, handler) = counter();
        session.bind_once(KEY, handler);

        session.report_press(KEY);
        session.report_press(KEY);
        assert_eq!(count.get(), 1);

        session.report_release(KEY);
        session.report_press(KEY);
        assert_eq!(count.get(), 2);
        assert_eq!(session.stats().chains_started, 0);
    }

    #[test]
    fn unbound_key_tracks_state_without_dispatch() {
        let session = InputSession::default();
        assert_eq!(session.report_press(KEY), Transition::Pressed { generation: 1 });
        assert!(session.is_held(KEY));
        assert_eq!(session.stats(), DispatchStats::default());
    }

    #[test]
    fn intercepted_key_ignores_physical_input() {
        let session = InputSession::default();
        let (count, handler) = counter();
        session.bind_once(KEY, handler);
        session.intercept(KEY);

        assert_eq!(session.report_press(KEY), Transition::Intercepted);
        assert!(!session.is_held(KEY));
        assert_eq!(count.get(), 0);

        session.inject_press(KEY);
        assert!(session.is_held(KEY));
        assert_eq!(count.get(), 1);

        session.report_release(KEY);
        assert!(session.is_held(KEY));

        session.release(KEY);
        session.report_release(KEY);
        assert!(!session.is_held(KEY));
    }

    #[test]
    fn attach_is_idempotent() {
        let bus = SignalBus::new();
        let session = InputSession::default();
        let (count, handler) = counter();
        session.bind_once(KEY, handler);

        assert!(session.attach(&bus));
        assert!(!session.attach(&bus));
        assert_eq!(bus.listener_count_for(KeyEventType::Press), 1);
        assert_eq!(bus.listener_count_for(KeyEventType::Release), 1);

        assert_eq!(bus.press(KEY), 1);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn detach_keeps_state_and_bindings() {
        let bus = SignalBus::new();
        let session = InputSession::default();
        let (count, handler) = counter();
        session.bind_once(KEY, handler);
        session.intercept(KeyCode(31));
        session.attach(&bus);
        bus.press(KEY);

        assert!(session.detach(&bus));
        assert!(!session.detach(&bus));
        assert_eq!(bus.listener_count(), 0);

        bus.release(KEY);
        assert!(session.is_held(KEY));
        assert!(session.is_bound(KEY));
        assert!(session.is_intercepted(KeyCode(31)));

        session.attach(&bus);
        bus.release(KEY);
        bus.press(KEY);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn detach_from_other_source_is_refused() {
        let bus = SignalBus::new();
        let other_bus = SignalBus::new();
        let session = InputSession::default();
        let other = InputSession::default();
        session.attach(&bus);
        other.attach(&other_bus);

        assert!(!session.detach(&other_bus));
        assert_eq!(other_bus.listener_count(), 2);
        assert_eq!(session.attached_source(), Some(bus.source_id()));

        other_bus.press(KEY);
        assert!(other.is_held(KEY));

        // Still attached, so attach stays a no-op
        assert!(!session.attach(&bus));
        assert_eq!(bus.listener_count_for(KeyEventType::Press), 1);

        assert!(session.detach(&bus));
        assert_eq!(bus.listener_count(), 0);
        assert!(session.attached_source().is_none());
    }

    #[test]
    fn detached_then_dropped_session_leaves_no_listeners() {
        let bus = SignalBus::new();
        {
            let session = InputSession::default();
            session.attach(&bus);
            session.detach(&bus);
        }
        assert_eq!(bus.listener_count(), 0);

        // Dropped while attached: listeners stay but reach nothing
        {
            let session = InputSession::default();
            session.attach(&bus);
        }
        assert_eq!(bus.press(KEY), 1);
    }

    #[test]
    fn intercepted_keys_are_listed_in_order() {
        let session = InputSession::default();
        session.intercept(KeyCode(40));
        session.intercept(KEY);
        assert_eq!(session.intercepted_keys(), vec![KEY, KeyCode(40)]);
        session.release(KeyCode(40));
        assert_eq!(session.intercepted_keys(), vec![KEY]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_from_config_repeats_at_minimum() {
        LocalSet::new()
            .run_until(async {
                let config: RepeatConfig = toml::from_str("interval_ms = 0").unwrap();
                let session = InputSession::from_config(&config);
                assert_eq!(session.repeat_interval(), dispatch::MIN_REPEAT_INTERVAL);

                let (count, handler) = counter();
                session.bind(KEY, handler);
                session.inject_press(KEY);
                sleep(Duration::from_millis(50)).await;
                session.inject_release(KEY);

                // Initial call plus one tick per millisecond held
                let fired = count.get();
                assert!((50..=51).contains(&fired), "fired {} times", fired);
                sleep(Duration::from_millis(20)).await;
                assert_eq!(count.get(), fired);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeats_while_held() {
        LocalSet::new()
            .run_until(async {
                let session = InputSession::new(T);
                let (count, handler) = counter();
                session.bind(KEY, handler);

                session.inject_press(KEY);
                assert_eq!(count.get(), 1);

                // Ticks at 33, 66, ..., 198
                sleep(Duration::from_millis(200)).await;
                session.inject_release(KEY);
                assert_eq!(count.get(), 7);

                sleep(Duration::from_millis(500)).await;
                assert_eq!(count.get(), 7);
                assert_eq!(session.stats().repeat_ticks, 6);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn quick_repress_keeps_one_chain() {
        LocalSet::new()
            .run_until(async {
                let session = InputSession::new(T);
                let (count, handler) = counter();
                session.bind(KEY, handler);

                session.inject_press(KEY);
                sleep(Duration::from_millis(10)).await;
                session.inject_release(KEY);
                session.inject_press(KEY);
                assert_eq!(count.get(), 2);

                // Second press at 10ms ticks at 43, 76; the first chain wakes
                // at 33 and exits.
                sleep(Duration::from_millis(80)).await;
                session.inject_release(KEY);
                assert_eq!(count.get(), 4);
                assert_eq!(session.stats().chains_started, 2);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn handler_error_does_not_stop_chain() {
        LocalSet::new()
            .run_until(async {
                let session = InputSession::new(T);
                let calls = Rc::new(Cell::new(0));
                let c = Rc::clone(&calls);
                session.bind(KEY, move |_| {
                    c.set(c.get() + 1);
                    anyhow::bail!("handler failure {}", c.get())
                });

                session.inject_press(KEY);
                sleep(Duration::from_millis(100)).await;
                session.inject_release(KEY);

                assert_eq!(calls.get(), 4);
                assert_eq!(session.stats().handler_errors, 4);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn unbind_preserves_running_chain_by_default() {
        LocalSet::new()
            .run_until(async {
                let session = InputSession::new(T);
                let (count, handler) = counter();
                session.bind(KEY, handler);
                session.inject_press(KEY);
                session.unbind(KEY);

                sleep(Duration::from_millis(100)).await;
                assert_eq!(count.get(), 4);

                session.inject_release(KEY);
                session.inject_press(KEY);
                assert_eq!(count.get(), 4);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn unbind_interrupts_chain_with_interrupt_policy() {
        LocalSet::new()
            .run_until(async {
                let session = InputSession::with_policy(T, UnbindPolicy::Interrupt);
                let (count, handler) = counter();
                session.bind(KEY, handler);
                session.inject_press(KEY);

                sleep(Duration::from_millis(40)).await;
                assert_eq!(count.get(), 2);
                session.unbind(KEY);

                sleep(Duration::from_millis(100)).await;
                assert_eq!(count.get(), 2);
                assert!(session.is_held(KEY));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn handler_may_reenter_session() {
        LocalSet::new()
            .run_until(async {
                let session = Rc::new(InputSession::new(T));
                let other = KeyCode(31);
                let weak = Rc::downgrade(&session);
                session.bind_once(KEY, move |_| {
                    if let Some(session) = weak.upgrade() {
                        session.inject_press(other);
                    }
                    Ok(())
                });

                session.inject_press(KEY);
                assert!(session.is_held(other));
            })
            .await;
    }
}
