/// Typed listener registry for inbound control messages
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error};

use crate::protocol::{ControlMessage, ControlMessageType};

/// Callback invoked for each dispatched control message
pub type Listener = Arc<dyn Fn(&ControlMessage) + Send + Sync>;

/// Wrap a closure as a [`Listener`]
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&ControlMessage) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Fan-out registry keyed by message type. Listeners run in registration
/// order; registering the same listener twice makes it fire twice.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<ControlMessageType, Vec<Listener>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<_, _> = listeners.iter().map(|(t, l)| (*t, l.len())).collect();
        f.debug_struct("EventBus").field("listeners", &counts).finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, msg_type: ControlMessageType, listener: Listener) {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        listeners.entry(msg_type).or_default().push(listener);
        debug!("Listener added for {}", msg_type.event_name());
    }

    /// Remove every registration of `listener`. Returns how many were removed
    pub fn unsubscribe(&self, msg_type: ControlMessageType, listener: &Listener) -> usize {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let Some(registered) = listeners.get_mut(&msg_type) else {
            return 0;
        };
        let before = registered.len();
        registered.retain(|l| !Arc::ptr_eq(l, listener));
        before - registered.len()
    }

    pub fn listener_count(&self, msg_type: ControlMessageType) -> usize {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        listeners.get(&msg_type).map_or(0, Vec::len)
    }

    /// Invoke the listeners registered for the message's type. A panicking
    /// listener is logged and the rest still run. Returns how many were
    /// invoked.
    pub fn dispatch(&self, message: &ControlMessage) -> usize {
        // Snapshot so listeners may (un)subscribe while being called
        let snapshot: Vec<Listener> = {
            let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            listeners.get(&message.msg_type).cloned().unwrap_or_default()
        };

        for listener in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(message))).is_err() {
                error!(
                    "Listener for {} panicked (context {})",
                    message.event_name(),
                    message.context_id
                );
            }
        }
        snapshot.len()
    }
}
