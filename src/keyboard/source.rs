//! Listener interface between input sources and their consumers

use super::{KeyEvent, KeyEventType};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Callback registered on a source for one event type
pub type Listener = Rc<dyn Fn(&KeyEvent)>;

/// Handle returned by [`InputSource::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Process-unique identity of an input source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

impl SourceId {
    /// Allocate an id no other source in this process has
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Anything that delivers key events to subscribed listeners.
///
/// Listeners run synchronously on the thread that delivers the event, in
/// registration order. Listener ids are only meaningful to the source that
/// issued them, identified by [`source_id`](Self::source_id).
pub trait InputSource {
    fn source_id(&self) -> SourceId;

    fn subscribe(&self, kind: KeyEventType, listener: Listener) -> ListenerId;

    /// Remove a listener. Returns `false` if `id` was not registered.
    fn unsubscribe(&self, id: ListenerId) -> bool;
}

/// A hardware listener that forwards what it reads into a [`SignalBus`]
pub trait KeyboardPoller {
    /// Emit every event read since the last poll. Returns the number emitted.
    fn poll(&mut self, bus: &SignalBus) -> usize;

    fn name(&self) -> &'static str;
}

/// Removes its listener from the source when dropped
pub struct Subscription<'a, S: InputSource + ?Sized> {
    source: &'a S,
    id: ListenerId,
}

impl<'a, S: InputSource + ?Sized> Subscription<'a, S> {
    pub fn new(source: &'a S, kind: KeyEventType, listener: Listener) -> Self {
        let id = source.subscribe(kind, listener);
        Self { source, id }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl<S: InputSource + ?Sized> Drop for Subscription<'_, S> {
    fn drop(&mut self) {
        self.source.unsubscribe(self.id);
    }
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    listeners: Vec<(ListenerId, KeyEventType, Listener)>,
}

/// In-memory input source.
///
/// Hardware listeners push what they read into a bus; tests and demos emit
/// into it directly.
pub struct SignalBus {
    id: SourceId,
    inner: RefCell<BusInner>,
}

impl Default for SignalBus {
    fn default() -> Self {
        Self {
            id: SourceId::next(),
            inner: RefCell::new(BusInner::default()),
        }
    }
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every listener subscribed to its type.
    /// Returns the number of listeners called.
    pub fn emit(&self, event: &KeyEvent) -> usize {
        // Snapshot first: listeners may subscribe or unsubscribe while running.
        let targets: Vec<Listener> = self
            .inner
            .borrow()
            .listeners
            .iter()
            .filter(|(_, kind, _)| *kind == event.event_type)
            .map(|(_, _, listener)| Rc::clone(listener))
            .collect();

        for listener in &targets {
            listener(event);
        }
        targets.len()
    }

    pub fn press(&self, key: impl Into<super::KeyCode>) -> usize {
        self.emit(&KeyEvent::press(key))
    }

    pub fn release(&self, key: impl Into<super::KeyCode>) -> usize {
        self.emit(&KeyEvent::release(key))
    }

    pub fn listener_count(&self) -> usize {
        self.inner.borrow().listeners.len()
    }

    pub fn listener_count_for(&self, kind: KeyEventType) -> usize {
        self.inner
            .borrow()
            .listeners
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }
}

impl InputSource for SignalBus {
    fn source_id(&self) -> SourceId {
        self.id
    }

    fn subscribe(&self, kind: KeyEventType, listener: Listener) -> ListenerId {
        let mut inner = self.inner.borrow_mut();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner.listeners.push((id, kind, listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.listeners.len();
        inner.listeners.retain(|(lid, _, _)| *lid != id);
        inner.listeners.len() != before
    }
}

impl fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalBus")
            .field("id", &self.id)
            .field("listeners", &self.listener_count())
            .finish()
    }
}
