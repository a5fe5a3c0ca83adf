//! Message dispatch.
//!
//! [`Dispatch`] is the seam between the relay's inbound loop and whatever
//! reacts to messages. [`DispatchTable`] is the simplest implementation: a
//! fixed map from message type to exactly one handler, supplied up front.
//! The multi-subscriber variant lives in [`super::registry`].

use std::collections::HashMap;

use super::message::Message;

/// What happened to a dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// At least one handler ran. Carries the number of handlers invoked.
    Delivered(usize),
    /// No handler is registered for the message type.
    Unhandled,
}

/// Routes a decoded message to interested handlers.
///
/// Called synchronously, once per accepted frame, in arrival order.
pub trait Dispatch: Send {
    /// Deliver `message`. Must not panic on unknown types.
    fn dispatch(&mut self, message: &Message) -> DispatchOutcome;
}

/// Handler invoked with each message of its type.
pub type Handler = Box<dyn FnMut(&Message) + Send>;

/// One handler per message type, fixed at construction.
#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<String, Handler>,
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("DispatchTable")
            .field("kinds", &kinds)
            .finish()
    }
}

impl DispatchTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the handler for `kind`, replacing any previous one.
    #[must_use]
    pub fn on<F>(mut self, kind: impl Into<String>, handler: F) -> Self
    where
        F: FnMut(&Message) + Send + 'static,
    {
        self.handlers.insert(kind.into(), Box::new(handler));
        self
    }

    /// Whether a handler exists for `kind`.
    pub fn handles(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }
}

impl Dispatch for DispatchTable {
    fn dispatch(&mut self, message: &Message) -> DispatchOutcome {
        match self.handlers.get_mut(&message.kind) {
            Some(handler) => {
                handler(message);
                DispatchOutcome::Delivered(1)
            }
            None => {
                log::debug!(
                    "[Relay] Unrecognized message type {} from backend",
                    message.kind
                );
                DispatchOutcome::Unhandled
            }
        }
    }
}
