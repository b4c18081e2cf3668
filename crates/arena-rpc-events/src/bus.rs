//! The event bus: a registry of handlers keyed by event kind.
//!
//! # Delivery rules
//!
//! - `emit` takes a *snapshot* of the handlers registered for a kind and
//!   releases the lock before invoking them. A handler may subscribe or
//!   unsubscribe (even itself) without deadlocking, and such changes only
//!   affect later emissions.
//! - Handlers run in registration order, on the emitting task.
//! - A panicking handler is caught and logged; the remaining handlers still
//!   receive the event.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// A registered event handler.
pub type Handler<P> = Arc<dyn Fn(&P) + Send + Sync>;

/// Identifies one registration on a bus.
///
/// Registering the same closure twice yields two different ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L-{}", self.0)
    }
}

struct Listener<P> {
    id: ListenerId,
    handler: Handler<P>,
}

impl<P> Clone for Listener<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Listeners grouped by kind. A `Vec` of pairs instead of a `HashMap`
/// keeps `event_names()` in first-registration order and only needs
/// `PartialEq` on the key; buses carry a handful of kinds at most.
struct Registry<K, P> {
    next_id: u64,
    listeners: Vec<(K, Vec<Listener<P>>)>,
}

impl<K: PartialEq, P> Registry<K, P> {
    fn slot_mut(&mut self, kind: &K) -> Option<&mut Vec<Listener<P>>> {
        self.listeners
            .iter_mut()
            .find(|(k, _)| k == kind)
            .map(|(_, list)| list)
    }

    fn remove(&mut self, kind: &K, id: ListenerId) -> bool {
        let Some(list) = self.slot_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| l.id != id);
        let removed = list.len() != before;
        self.listeners.retain(|(_, list)| !list.is_empty());
        removed
    }
}

/// A synchronous publish/subscribe bus.
///
/// Cloning is cheap and every clone shares the same registry, so the
/// connection task and the client facade can each hold one.
///
/// ```rust
/// use arena_rpc_events::EventBus;
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum Kind { Ping }
///
/// let bus: EventBus<Kind, u32> = EventBus::new();
/// let sub = bus.on(Kind::Ping, |n| println!("ping {n}"));
/// assert_eq!(bus.emit(Kind::Ping, &7), 1);
/// assert!(sub.unsubscribe());
/// assert_eq!(bus.listener_count(Kind::Ping), 0);
/// ```
pub struct EventBus<K, P> {
    registry: Arc<Mutex<Registry<K, P>>>,
}

impl<K, P> Clone for EventBus<K, P> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<K, P> Default for EventBus<K, P>
where
    K: Copy + PartialEq + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> fmt::Debug for EventBus<K, P>
where
    K: Copy + PartialEq + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.event_names())
            .finish()
    }
}

impl<K, P> EventBus<K, P>
where
    K: Copy + PartialEq + fmt::Debug,
{
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 1,
                listeners: Vec::new(),
            })),
        }
    }

    // A handler that panicked did so outside the lock, so a poisoned
    // mutex still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, Registry<K, P>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `handler` for `kind`.
    ///
    /// The returned [`Subscription`] is the unsubscribe capability. Dropping
    /// it does *not* remove the handler.
    pub fn on<F>(&self, kind: K, handler: F) -> Subscription<K, P>
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        let id = ListenerId(registry.next_id);
        registry.next_id += 1;

        let listener = Listener {
            id,
            handler: Arc::new(handler),
        };
        match registry.slot_mut(&kind) {
            Some(list) => list.push(listener),
            None => registry.listeners.push((kind, vec![listener])),
        }

        tracing::trace!(?kind, %id, "listener registered");

        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    /// Removes a single registration. Returns `false` if it was not found.
    pub fn off(&self, kind: K, id: ListenerId) -> bool {
        self.lock().remove(&kind, id)
    }

    /// Invokes every handler currently registered for `kind`.
    ///
    /// Returns the number of handlers invoked, including ones that panicked.
    pub fn emit(&self, kind: K, payload: &P) -> usize {
        let snapshot: Vec<Listener<P>> = {
            let mut registry = self.lock();
            match registry.slot_mut(&kind) {
                Some(list) => list.clone(),
                None => return 0,
            }
        };

        for listener in &snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                (listener.handler)(payload)
            }));
            if let Err(panic) = outcome {
                tracing::error!(
                    ?kind,
                    listener = %listener.id,
                    panic = panic_message(&panic),
                    "event handler panicked"
                );
            }
        }

        snapshot.len()
    }

    /// Removes all handlers for `kind`, or for every kind when `None`.
    pub fn remove_all_listeners(&self, kind: Option<K>) {
        let mut registry = self.lock();
        match kind {
            Some(kind) => registry.listeners.retain(|(k, _)| *k != kind),
            None => registry.listeners.clear(),
        }
    }

    /// Drops every handler. Used on teardown so no closure (and nothing it
    /// captured) outlives the owning client.
    pub fn clear(&self) {
        let mut registry = self.lock();
        registry.listeners.clear();
        registry.listeners.shrink_to_fit();
    }

    /// Number of handlers registered for `kind`.
    pub fn listener_count(&self, kind: K) -> usize {
        self.lock()
            .listeners
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0, |(_, list)| list.len())
    }

    /// Kinds that currently have at least one handler, in the order they
    /// were first subscribed to.
    pub fn event_names(&self) -> Vec<K> {
        self.lock().listeners.iter().map(|(k, _)| *k).collect()
    }
}

/// Handle returned by [`EventBus::on`].
///
/// Holds only a weak reference to the bus, so an outstanding subscription
/// never keeps a torn-down bus alive.
pub struct Subscription<K, P> {
    registry: Weak<Mutex<Registry<K, P>>>,
    kind: K,
    id: ListenerId,
}

impl<K, P> Subscription<K, P>
where
    K: PartialEq,
{
    /// The registration id, usable with [`EventBus::off`].
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes the handler. Returns `false` if it was already gone (removed
    /// through `off`, `clear`, or the bus was dropped).
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&self.kind, self.id),
            None => false,
        }
    }
}

impl<K: fmt::Debug, P> fmt::Debug for Subscription<K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
