//! In-process browsing contexts for tests and simulations.
//!
//! A [`Window`] owns an inbox and a set of listeners. Posting only queues;
//! listeners run when the window's event loop turns, either explicitly via
//! [`Window::dispatch_pending`] or from [`Window::run_event_loop`].

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use frame_proto::resolve_origin;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{Envelope, MessageChannel, MessageHandler, Subscription};

const ANY_ORIGIN: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub Uuid);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

struct WindowInner {
    id: WindowId,
    origin: String,
    parent: Option<Weak<WindowInner>>,
    inbox: Mutex<VecDeque<Envelope>>,
    handlers: RwLock<BTreeMap<u64, MessageHandler>>,
    next_handler: AtomicU64,
    closed: AtomicBool,
    wake: Notify,
}

impl WindowInner {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    // The sender learns nothing about origin mismatches, same as a browser.
    fn post(&self, envelope: Envelope, target_origin: &str) {
        if target_origin != ANY_ORIGIN && resolve_origin(target_origin) != self.origin {
            trace!(
                target = "frame_bus",
                window = %self.id,
                expected = %self.origin,
                requested = %target_origin,
                "dropping message posted for another origin"
            );
            return;
        }
        self.inbox.lock().push_back(envelope);
        self.wake.notify_one();
    }
}

/// A simulated browsing context with a fixed origin.
#[derive(Clone)]
pub struct Window {
    inner: Arc<WindowInner>,
}

impl Window {
    /// A top-level context.
    pub fn top(origin: &str) -> Self {
        Self::build(origin, None)
    }

    /// A context framed inside `parent`.
    pub fn embed(parent: &Window, origin: &str) -> Self {
        Self::build(origin, Some(Arc::downgrade(&parent.inner)))
    }

    fn build(origin: &str, parent: Option<Weak<WindowInner>>) -> Self {
        Self {
            inner: Arc::new(WindowInner {
                id: WindowId(Uuid::new_v4()),
                origin: resolve_origin(origin),
                parent,
                inbox: Mutex::new(VecDeque::new()),
                handlers: RwLock::new(BTreeMap::new()),
                next_handler: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                wake: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> WindowId {
        self.inner.id
    }

    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn is_embedded(&self) -> bool {
        self.inner.parent.is_some()
    }

    /// Weak handle suitable for handing to whoever posts into this window.
    pub fn downgrade(&self) -> WindowRef {
        WindowRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn channel(&self) -> LocalChannel {
        LocalChannel {
            window: self.clone(),
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.inbox.lock().len()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.handlers.read().len()
    }

    /// Runs one turn of the event loop: delivers everything queued so far to
    /// the current listeners. Messages queued by the listeners themselves
    /// wait for the next turn.
    pub fn dispatch_pending(&self) -> usize {
        let batch: Vec<Envelope> = self.inner.inbox.lock().drain(..).collect();
        for envelope in &batch {
            // Snapshot so listeners may unsubscribe while being called.
            let handlers: Vec<MessageHandler> =
                self.inner.handlers.read().values().cloned().collect();
            for handler in handlers {
                handler(envelope);
            }
        }
        batch.len()
    }

    /// Dispatches messages as they arrive until the window is closed.
    pub async fn run_event_loop(self) {
        while self.inner.is_open() {
            self.dispatch_pending();
            self.inner.wake.notified().await;
        }
        debug!(target = "frame_bus", window = %self.inner.id, "event loop stopped");
    }

    /// Unloads the document: handles stop resolving and queued messages are
    /// discarded.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.inbox.lock().clear();
        self.inner.wake.notify_one();
    }

    fn add_handler(&self, handler: MessageHandler) -> Subscription {
        let key = self.inner.next_handler.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers.write().insert(key, handler);
        let window = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(window) = window.upgrade() {
                window.handlers.write().remove(&key);
            }
        })
    }
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.inner.id)
            .field("origin", &self.inner.origin)
            .field("embedded", &self.is_embedded())
            .finish()
    }
}

/// Non-owning handle to a [`Window`]. Resolves only while the window exists
/// and has not been closed.
#[derive(Clone, Default)]
pub struct WindowRef {
    inner: Weak<WindowInner>,
}

impl WindowRef {
    /// A handle that never resolves, e.g. before the frame has loaded.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn is_available(&self) -> bool {
        self.live().is_some()
    }

    pub fn id(&self) -> Option<WindowId> {
        self.live().map(|inner| inner.id)
    }

    fn live(&self) -> Option<Arc<WindowInner>> {
        self.inner.upgrade().filter(|inner| inner.is_open())
    }
}

impl fmt::Debug for WindowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.live() {
            Some(inner) => write!(f, "WindowRef({})", inner.id),
            None => f.write_str("WindowRef(<unavailable>)"),
        }
    }
}

/// [`MessageChannel`] bound to one [`Window`].
#[derive(Clone, Debug)]
pub struct LocalChannel {
    window: Window,
}

impl LocalChannel {
    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl MessageChannel for LocalChannel {
    fn send(&self, target: &WindowRef, payload: Value, target_origin: &str) -> bool {
        let Some(inner) = target.live() else {
            trace!(
                target = "frame_bus",
                from = %self.window.id(),
                "target window unavailable; message dropped"
            );
            return false;
        };
        inner.post(
            Envelope {
                origin: self.window.origin().to_string(),
                data: payload,
            },
            target_origin,
        );
        true
    }

    fn subscribe(&self, handler: MessageHandler) -> Subscription {
        self.window.add_handler(handler)
    }

    fn parent(&self) -> Option<WindowRef> {
        self.window
            .inner
            .parent
            .as_ref()
            .map(|parent| WindowRef {
                inner: parent.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;

    fn recorder(window: &Window) -> (Arc<Mutex<Vec<Envelope>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = window
            .channel()
            .subscribe(Arc::new(move |envelope: &Envelope| sink.lock().push(envelope.clone())));
        (seen, sub)
    }

    #[test]
    fn delivers_with_sender_origin_on_dispatch() {
        let host = Window::top("https://host.example/page");
        let guest = Window::embed(&host, "https://guest.example");
        let (seen, _sub) = recorder(&guest);

        let posted = host
            .channel()
            .send(&guest.downgrade(), json!({ "hello": 1 }), "https://guest.example/demo");
        assert!(posted);
        assert!(seen.lock().is_empty(), "delivery must wait for the event loop");

        assert_eq!(guest.dispatch_pending(), 1);
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].origin, "https://host.example");
        assert_eq!(seen[0].data, json!({ "hello": 1 }));
    }

    #[test]
    fn target_origin_mismatch_is_dropped_silently() {
        let host = Window::top("https://host.example");
        let guest = Window::embed(&host, "https://guest.example");
        let (seen, _sub) = recorder(&guest);

        assert!(host.channel().send(&guest.downgrade(), json!(1), "https://evil.example"));
        assert!(host.channel().send(&guest.downgrade(), json!(2), "*"));
        guest.dispatch_pending();
        let data: Vec<Value> = seen.lock().iter().map(|e| e.data.clone()).collect();
        assert_eq!(data, vec![json!(2)]);
    }

    #[test]
    fn unavailable_handles_do_not_send() {
        let host = Window::top("https://host.example");
        assert!(!host.channel().send(&WindowRef::detached(), json!(1), "*"));

        let guest = Window::embed(&host, "https://guest.example");
        let handle = guest.downgrade();
        guest.close();
        assert!(!handle.is_available());
        assert!(!host.channel().send(&handle, json!(1), "*"));

        let other = Window::top("https://other.example");
        let handle = other.downgrade();
        drop(other);
        assert!(!host.channel().send(&handle, json!(1), "*"));
    }

    #[test]
    fn unsubscribed_handlers_stop_receiving() {
        let window = Window::top("https://host.example");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sub = window.channel().subscribe(Arc::new(move |_: &Envelope| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(window.listener_count(), 1);

        window.channel().send(&window.downgrade(), json!(1), "*");
        window.dispatch_pending();
        sub.unsubscribe();
        assert_eq!(window.listener_count(), 0);

        window.channel().send(&window.downgrade(), json!(2), "*");
        window.dispatch_pending();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parent_only_for_embedded_windows() {
        let host = Window::top("https://host.example");
        let guest = Window::embed(&host, "https://guest.example");
        assert!(host.channel().parent().is_none());
        let parent = guest.channel().parent().expect("embedded window has a parent");
        assert_eq!(parent.id(), Some(host.id()));
    }

    #[tokio::test]
    async fn event_loop_dispatches_until_closed() {
        let window = Window::top("https://host.example");
        let (seen, _sub) = recorder(&window);
        let task = tokio::spawn(window.clone().run_event_loop());

        window.channel().send(&window.downgrade(), json!("ping"), "*");
        for _ in 0..10 {
            if !seen.lock().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(seen.lock().len(), 1);

        window.close();
        task.await.expect("event loop task");
    }
}
