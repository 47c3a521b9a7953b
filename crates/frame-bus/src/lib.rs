use std::fmt;
use std::sync::Arc;

use serde_json::Value;

mod local;

pub use local::{LocalChannel, Window, WindowId, WindowRef};

/// One inbound message as seen by a listener: who sent it and what it said.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Origin of the sending context, as stamped by the runtime.
    pub origin: String,
    pub data: Value,
}

pub type MessageHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Origin-scoped, asynchronous message passing between browsing contexts.
///
/// Delivery is unordered and best-effort from the caller's point of view;
/// nothing here reports whether a message was read.
pub trait MessageChannel: Send + Sync {
    /// Posts `payload` to `target` as this context. Returns `false` without
    /// doing anything when the target handle is not live.
    fn send(&self, target: &WindowRef, payload: Value, target_origin: &str) -> bool;

    /// Registers `handler` for every message delivered to this context.
    fn subscribe(&self, handler: MessageHandler) -> Subscription;

    /// The embedding context, if this context is a frame.
    fn parent(&self) -> Option<WindowRef>;
}

/// Keeps a handler registered. Unsubscribes on [`Subscription::unsubscribe`]
/// or when dropped.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn subscription_cancels_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&calls);
        drop(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
