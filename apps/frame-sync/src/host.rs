//! Host side of the frame height handshake.
//!
//! The host either pins a height and pushes it to the guest once the guest
//! can hear it, or adopts whatever height the guest reports for itself.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use frame_bus::{Envelope, MessageChannel, Subscription, WindowRef};
use frame_proto::{FrameMessage, resolve_origin};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::HostConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    /// Pinned height configured, not yet delivered.
    AwaitingGuestHandle,
    /// Pinned height delivered. Terminal.
    Sent,
    /// No pinned height and no guest report yet.
    AwaitingFirstReport,
    /// At least one guest report adopted.
    HeightKnown,
}

/// Outcome of one attempt at delivering the pinned height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    NotPinned,
    AlreadySent,
    HandleUnavailable,
    Sent,
}

/// Per-frame host state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSession {
    guest_origin: String,
    pinned_height: Option<u32>,
    resolved_height: u32,
    handshake_sent: bool,
    reports: u64,
}

impl FrameSession {
    pub fn initialize(config: &HostConfig) -> Self {
        Self {
            guest_origin: resolve_origin(&config.guest_url),
            pinned_height: config.pinned_height,
            resolved_height: config.initial_height(),
            handshake_sent: false,
            reports: 0,
        }
    }

    pub fn guest_origin(&self) -> &str {
        &self.guest_origin
    }

    pub fn pinned_height(&self) -> Option<u32> {
        self.pinned_height
    }

    pub fn resolved_height(&self) -> u32 {
        self.resolved_height
    }

    pub fn handshake_sent(&self) -> bool {
        self.handshake_sent
    }

    /// Guest reports adopted so far.
    pub(crate) fn reports(&self) -> u64 {
        self.reports
    }

    pub fn phase(&self) -> HostPhase {
        match (self.pinned_height, self.handshake_sent, self.reports) {
            (Some(_), true, _) => HostPhase::Sent,
            (Some(_), false, _) => HostPhase::AwaitingGuestHandle,
            (None, _, 0) => HostPhase::AwaitingFirstReport,
            (None, _, _) => HostPhase::HeightKnown,
        }
    }

    /// Adopts a guest-measured height unless the host pinned one.
    /// Returns whether the report was adopted.
    fn adopt_guest_height(&mut self, pixels: u32) -> bool {
        if self.pinned_height.is_some() {
            return false;
        }
        self.resolved_height = pixels;
        self.reports += 1;
        true
    }
}

/// What the presentation layer needs to render and size the frame element.
#[derive(Debug, Clone)]
pub struct HostView {
    pub resolved_height: u32,
    pub frame_handle: WindowRef,
}

struct HostInner {
    guest_url: String,
    policy: RetryPolicy,
    channel: Arc<dyn MessageChannel>,
    session: Mutex<FrameSession>,
    frame: RwLock<WindowRef>,
    alive: AtomicBool,
    // Set once any message from the guest origin arrives.
    guest_seen: AtomicBool,
    attempts: AtomicU32,
    height_tx: watch::Sender<u32>,
    subscription: Mutex<Option<Subscription>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl HostInner {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn deliver_pinned_height(&self) -> Delivery {
        if !self.is_alive() {
            return Delivery::HandleUnavailable;
        }
        let mut session = self.session.lock();
        let Some(pixels) = session.pinned_height else {
            return Delivery::NotPinned;
        };
        if session.handshake_sent {
            return Delivery::AlreadySent;
        }
        self.attempts.fetch_add(1, Ordering::Relaxed);
        let frame = self.frame.read().clone();
        let message = FrameMessage::HostHeight { pixels };
        if !self.channel.send(&frame, message.to_value(), &self.guest_url) {
            trace!(
                target = "frame_sync::host",
                pixels,
                "frame handle not available yet; pinned height not sent"
            );
            return Delivery::HandleUnavailable;
        }
        session.handshake_sent = true;
        debug!(
            target = "frame_sync::host",
            pixels,
            guest_origin = %session.guest_origin,
            "pinned height sent to guest"
        );
        Delivery::Sent
    }

    fn handle_envelope(&self, envelope: &Envelope) {
        if !self.is_alive() {
            return;
        }
        let expected = self.session.lock().guest_origin.clone();
        if envelope.origin != expected {
            trace!(
                target = "frame_sync::host",
                origin = %envelope.origin,
                expected = %expected,
                "ignoring message from unexpected origin"
            );
            return;
        }

        // The guest just proved it is alive and listening.
        self.guest_seen.store(true, Ordering::SeqCst);
        if self.policy.is_event_driven() {
            self.deliver_pinned_height();
        }

        match FrameMessage::from_value(&envelope.data) {
            Some(FrameMessage::GuestHeight { pixels }) => self.adopt_guest_height(pixels),
            Some(other) => {
                trace!(
                    target = "frame_sync::host",
                    kind = other.kind(),
                    "ignoring message not addressed to the host"
                );
            }
            None => {
                trace!(
                    target = "frame_sync::host",
                    "ignoring undecodable message from guest origin"
                );
            }
        }
    }

    fn adopt_guest_height(&self, pixels: u32) {
        let adopted = self.session.lock().adopt_guest_height(pixels);
        if !adopted {
            trace!(
                target = "frame_sync::host",
                pixels,
                "guest report ignored; height is pinned"
            );
            return;
        }
        debug!(target = "frame_sync::host", pixels, "adopted guest height");
        self.publish(pixels);
    }

    fn publish(&self, pixels: u32) {
        self.height_tx.send_if_modified(|current| {
            if *current == pixels {
                return false;
            }
            *current = pixels;
            true
        });
    }

    fn teardown(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
        if let Some(poller) = self.poller.lock().take() {
            poller.abort();
        }
        debug!(target = "frame_sync::host", "frame controller torn down");
    }
}

/// Drives the host side of the handshake for one frame element.
///
/// Dropping the controller tears it down.
pub struct HostFrameController {
    inner: Arc<HostInner>,
}

impl HostFrameController {
    /// Initializes the session and starts listening for guest messages.
    ///
    /// With [`RetryPolicy::Polling`] and a pinned height, a polling task is
    /// spawned on the current Tokio runtime; outside a runtime polling is
    /// skipped and the host keeps its initial height.
    pub fn mount(config: HostConfig, channel: Arc<dyn MessageChannel>, policy: RetryPolicy) -> Self {
        let session = FrameSession::initialize(&config);
        let (height_tx, _) = watch::channel(session.resolved_height());
        debug!(
            target = "frame_sync::host",
            guest_origin = %session.guest_origin(),
            pinned = ?session.pinned_height(),
            height = session.resolved_height(),
            ?policy,
            "mounting frame controller"
        );
        let inner = Arc::new(HostInner {
            guest_url: config.guest_url,
            policy,
            channel,
            session: Mutex::new(session),
            frame: RwLock::new(WindowRef::detached()),
            alive: AtomicBool::new(true),
            guest_seen: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            height_tx,
            subscription: Mutex::new(None),
            poller: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = inner.channel.subscribe(Arc::new(move |envelope: &Envelope| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_envelope(envelope);
            }
        }));
        *inner.subscription.lock() = Some(subscription);

        if let RetryPolicy::Polling {
            max_attempts,
            interval,
        } = policy
        {
            if config.pinned_height.is_some() {
                spawn_poller(&inner, max_attempts, interval);
            }
        }

        Self { inner }
    }

    /// Records the frame's window handle once the frame element has loaded.
    ///
    /// Under [`RetryPolicy::EventDriven`], a guest that already reported
    /// before the handle existed gets the pinned height right away.
    pub fn attach_frame_handle(&self, handle: WindowRef) {
        debug!(
            target = "frame_sync::host",
            handle = ?handle,
            "frame handle attached"
        );
        *self.inner.frame.write() = handle;
        if self.inner.policy.is_event_driven() && self.inner.guest_seen.load(Ordering::SeqCst) {
            self.inner.deliver_pinned_height();
        }
    }

    /// Sends the pinned height if there is one, it has not been sent, and the
    /// frame handle is live. Safe to call any number of times.
    pub fn deliver_pinned_height_if_needed(&self) -> Delivery {
        self.inner.deliver_pinned_height()
    }

    /// Feeds one inbound message through origin validation and the protocol.
    /// This is what the channel subscription calls.
    pub fn handle_message(&self, envelope: &Envelope) {
        self.inner.handle_envelope(envelope);
    }

    pub fn resolved_height(&self) -> u32 {
        self.inner.session.lock().resolved_height()
    }

    pub fn frame_handle(&self) -> WindowRef {
        self.inner.frame.read().clone()
    }

    pub fn view(&self) -> HostView {
        HostView {
            resolved_height: self.resolved_height(),
            frame_handle: self.frame_handle(),
        }
    }

    pub fn phase(&self) -> HostPhase {
        self.inner.session.lock().phase()
    }

    pub fn session(&self) -> FrameSession {
        self.inner.session.lock().clone()
    }

    /// Delivery attempts made while the pinned height was still unsent.
    pub fn delivery_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    /// Notifies on every change of the resolved height.
    pub fn watch_height(&self) -> watch::Receiver<u32> {
        self.inner.height_tx.subscribe()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.is_alive()
    }

    /// Stops listening and cancels any pending retries. Idempotent.
    pub fn teardown(&self) {
        self.inner.teardown();
    }
}

impl Drop for HostFrameController {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

fn spawn_poller(inner: &Arc<HostInner>, max_attempts: u32, interval: Duration) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(
            target = "frame_sync::host",
            "no async runtime; pinned height polling disabled"
        );
        return;
    };
    let weak = Arc::downgrade(inner);
    let handle = runtime.spawn(poll_pinned_height(weak, max_attempts, interval));
    *inner.poller.lock() = Some(handle);
}

async fn poll_pinned_height(inner: Weak<HostInner>, max_attempts: u32, interval: Duration) {
    let budget = inner.upgrade().and_then(|inner| inner.policy.budget());
    for attempt in 1..=max_attempts {
        if attempt > 1 {
            tokio::time::sleep(interval).await;
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match inner.deliver_pinned_height() {
            Delivery::Sent | Delivery::AlreadySent | Delivery::NotPinned => {
                trace!(target = "frame_sync::host", attempt, "pinned height polling finished");
                return;
            }
            Delivery::HandleUnavailable if !inner.is_alive() => return,
            Delivery::HandleUnavailable => {}
        }
    }
    if let Some(inner) = inner.upgrade() {
        let height = inner.session.lock().resolved_height();
        warn!(
            target = "frame_sync::host",
            max_attempts,
            ?budget,
            height,
            "frame never became available; keeping fallback height"
        );
    }
}
