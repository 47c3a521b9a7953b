//! Guest side of the frame height handshake.
//!
//! Measurement happens only when the caller reports a render pass. Content
//! that grows later without another render goes unreported.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use frame_bus::{Envelope, MessageChannel, Subscription};
use frame_proto::{DEFAULT_HEIGHT, FrameMessage, resolve_origin};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::config::GuestConfig;
use crate::document::{Document, SharedDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestPhase {
    /// Measuring and reporting after every render.
    Unlocked,
    /// Adopted a host height; no further reports. Terminal.
    Locked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestState {
    host_origin: String,
    locked_height: Option<u32>,
    measured_height: Option<u32>,
}

impl GuestState {
    pub fn new(config: &GuestConfig) -> Self {
        Self {
            host_origin: resolve_origin(&config.host_url),
            locked_height: None,
            measured_height: None,
        }
    }

    pub fn host_origin(&self) -> &str {
        &self.host_origin
    }

    pub fn locked_height(&self) -> Option<u32> {
        self.locked_height
    }

    pub fn measured_height(&self) -> Option<u32> {
        self.measured_height
    }

    pub fn child_height(&self) -> u32 {
        self.locked_height
            .or(self.measured_height)
            .unwrap_or(DEFAULT_HEIGHT)
    }

    pub fn phase(&self) -> GuestPhase {
        if self.locked_height.is_some() {
            GuestPhase::Locked
        } else {
            GuestPhase::Unlocked
        }
    }

    /// First lock wins; later host heights are ignored.
    fn adopt_host_height(&mut self, pixels: u32) -> bool {
        if self.locked_height.is_some() {
            return false;
        }
        self.locked_height = Some(pixels);
        self.measured_height = Some(pixels);
        true
    }
}

/// What the presentation layer needs from the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestView {
    pub child_height: u32,
}

struct GuestInner<D> {
    host_url: String,
    channel: Arc<dyn MessageChannel>,
    document: SharedDocument<D>,
    state: Mutex<GuestState>,
    alive: AtomicBool,
    reports_sent: AtomicU64,
    height_tx: watch::Sender<u32>,
    subscription: Mutex<Option<Subscription>>,
}

impl<D: Document> GuestInner<D> {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn handle_envelope(&self, envelope: &Envelope) {
        if !self.is_alive() {
            return;
        }
        let mut state = self.state.lock();
        if envelope.origin != state.host_origin {
            trace!(
                target = "frame_sync::guest",
                origin = %envelope.origin,
                expected = %state.host_origin,
                "ignoring message from unexpected origin"
            );
            return;
        }
        let Some(FrameMessage::HostHeight { pixels }) = FrameMessage::from_value(&envelope.data)
        else {
            trace!(
                target = "frame_sync::guest",
                "ignoring message that is not a host height"
            );
            return;
        };
        if !state.adopt_host_height(pixels) {
            trace!(
                target = "frame_sync::guest",
                pixels,
                locked = ?state.locked_height,
                "already locked; host height ignored"
            );
            return;
        }
        self.document.lock().set_height(pixels);
        drop(state);
        debug!(target = "frame_sync::guest", pixels, "locked to host height");
        self.publish(pixels);
    }

    fn on_render(&self) -> Option<u32> {
        if !self.is_alive() {
            return None;
        }
        let measured = self.document.lock().content_height();
        let mut state = self.state.lock();
        if state.locked_height.is_some() {
            return None;
        }
        // Nothing rendered yet; keep the default.
        if measured == 0 {
            return None;
        }
        state.measured_height = Some(measured);
        drop(state);
        self.publish(measured);

        let Some(parent) = self.channel.parent() else {
            trace!(
                target = "frame_sync::guest",
                measured,
                "not embedded; skipping height report"
            );
            return None;
        };
        let message = FrameMessage::GuestHeight { pixels: measured };
        if !self.channel.send(&parent, message.to_value(), &self.host_url) {
            trace!(
                target = "frame_sync::guest",
                measured,
                "parent unavailable; height report dropped"
            );
            return None;
        }
        self.reports_sent.fetch_add(1, Ordering::Relaxed);
        trace!(target = "frame_sync::guest", measured, "reported height to host");
        Some(measured)
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
        debug!(target = "frame_sync::guest", "frame reporter torn down");
    }
}

/// Drives the guest side of the handshake from inside the embedded document.
///
/// Dropping the reporter tears it down.
pub struct GuestFrameReporter<D: Document + 'static> {
    inner: Arc<GuestInner<D>>,
}

impl<D: Document + 'static> GuestFrameReporter<D> {
    /// Hides the document's own scrollbar and starts listening for the host.
    pub fn activate(
        config: GuestConfig,
        channel: Arc<dyn MessageChannel>,
        document: SharedDocument<D>,
    ) -> Self {
        document.lock().hide_vertical_overflow();
        let state = GuestState::new(&config);
        let (height_tx, _) = watch::channel(state.child_height());
        debug!(
            target = "frame_sync::guest",
            host_origin = %state.host_origin(),
            embedded = channel.parent().is_some(),
            "activating frame reporter"
        );
        let inner = Arc::new(GuestInner {
            host_url: config.host_url,
            channel,
            document,
            state: Mutex::new(state),
            alive: AtomicBool::new(true),
            reports_sent: AtomicU64::new(0),
            height_tx,
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = inner.channel.subscribe(Arc::new(move |envelope: &Envelope| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_envelope(envelope);
            }
        }));
        *inner.subscription.lock() = Some(subscription);

        Self { inner }
    }

    /// Call after every render pass. Measures the document and, while
    /// unlocked and embedded, reports the height to the host. Returns the
    /// reported height, if a report was sent.
    pub fn on_render(&self) -> Option<u32> {
        self.inner.on_render()
    }

    /// Feeds one inbound message through origin validation and the protocol.
    pub fn handle_message(&self, envelope: &Envelope) {
        self.inner.handle_envelope(envelope);
    }

    pub fn child_height(&self) -> u32 {
        self.inner.state.lock().child_height()
    }

    pub fn view(&self) -> GuestView {
        GuestView {
            child_height: self.child_height(),
        }
    }

    pub fn phase(&self) -> GuestPhase {
        self.inner.state.lock().phase()
    }

    pub fn state(&self) -> GuestState {
        self.inner.state.lock().clone()
    }

    pub fn reports_sent(&self) -> u64 {
        self.inner.reports_sent.load(Ordering::Relaxed)
    }

    pub fn document(&self) -> SharedDocument<D> {
        Arc::clone(&self.inner.document)
    }

    pub fn watch_height(&self) -> watch::Receiver<u32> {
        self.inner.height_tx.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_alive()
    }

    /// Stops listening. Idempotent.
    pub fn teardown(&self) {
        self.inner.teardown();
    }
}

impl<D: Document + 'static> Drop for GuestFrameReporter<D> {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

#[cfg(test)]
mod tests {
    use frame_bus::Window;

    use super::*;
    use crate::document::SimulatedDocument;

    const HOST_URL: &str = "https://host.example/mini-projects/codeblock";
    const HOST_ORIGIN: &str = "https://host.example";

    fn host_height(origin: &str, pixels: u32) -> Envelope {
        Envelope {
            origin: origin.to_string(),
            data: FrameMessage::HostHeight { pixels }.to_value(),
        }
    }

    fn activate(
        content: u32,
    ) -> (
        Window,
        Window,
        SharedDocument<SimulatedDocument>,
        GuestFrameReporter<SimulatedDocument>,
    ) {
        let host = Window::top(HOST_URL);
        let guest = Window::embed(&host, "https://guest.example");
        let document = SimulatedDocument::shared(content);
        let reporter = GuestFrameReporter::activate(
            GuestConfig::new(HOST_URL),
            Arc::new(guest.channel()),
            Arc::clone(&document),
        );
        (host, guest, document, reporter)
    }

    #[test]
    fn activation_hides_overflow_once() {
        let (_host, _guest, document, reporter) = activate(0);
        assert!(document.lock().overflow_hidden());
        assert_eq!(document.lock().overflow_toggles(), 1);
        assert_eq!(reporter.child_height(), 450);
        assert_eq!(reporter.phase(), GuestPhase::Unlocked);
    }

    #[test]
    fn reports_measured_height_to_parent() {
        let (host, _guest, _document, reporter) = activate(812);
        assert_eq!(reporter.on_render(), Some(812));
        assert_eq!(reporter.child_height(), 812);
        assert_eq!(host.pending(), 1);
        assert_eq!(reporter.reports_sent(), 1);
    }

    #[test]
    fn zero_height_is_not_reported() {
        let (host, _guest, _document, reporter) = activate(0);
        assert_eq!(reporter.on_render(), None);
        assert_eq!(host.pending(), 0);
        assert_eq!(reporter.child_height(), 450);
    }

    #[test]
    fn top_level_document_measures_without_sending() {
        let top = Window::top("https://guest.example");
        let document = SimulatedDocument::shared(640);
        let reporter = GuestFrameReporter::activate(
            GuestConfig::new(HOST_URL),
            Arc::new(top.channel()),
            Arc::clone(&document),
        );
        assert_eq!(reporter.on_render(), None);
        assert_eq!(reporter.child_height(), 640);
        assert_eq!(reporter.reports_sent(), 0);
    }

    #[test]
    fn host_height_locks_and_sizes_document() {
        let (host, _guest, document, reporter) = activate(812);
        reporter.handle_message(&host_height(HOST_ORIGIN, 500));
        assert_eq!(reporter.phase(), GuestPhase::Locked);
        assert_eq!(reporter.child_height(), 500);
        assert_eq!(document.lock().explicit_height(), Some(500));

        document.lock().set_content_height(2000);
        assert_eq!(reporter.on_render(), None);
        assert_eq!(host.pending(), 0);
    }

    #[test]
    fn lock_is_first_write_wins() {
        let (_host, _guest, document, reporter) = activate(812);
        reporter.handle_message(&host_height(HOST_ORIGIN, 300));
        reporter.handle_message(&host_height(HOST_ORIGIN, 300));
        reporter.handle_message(&host_height(HOST_ORIGIN, 999));
        assert_eq!(reporter.state().locked_height(), Some(300));
        assert_eq!(document.lock().explicit_height(), Some(300));
    }

    #[test]
    fn spoofed_host_height_is_ignored() {
        let (_host, _guest, document, reporter) = activate(812);
        reporter.handle_message(&host_height("https://evil.example", 10));
        assert_eq!(reporter.phase(), GuestPhase::Unlocked);
        assert_eq!(document.lock().explicit_height(), None);
    }

    #[test]
    fn teardown_stops_everything() {
        let (host, guest, document, reporter) = activate(812);
        assert_eq!(guest.listener_count(), 1);
        reporter.teardown();
        assert_eq!(guest.listener_count(), 0);
        assert!(!reporter.is_active());

        reporter.handle_message(&host_height(HOST_ORIGIN, 500));
        assert_eq!(reporter.on_render(), None);
        assert_eq!(reporter.phase(), GuestPhase::Unlocked);
        assert_eq!(document.lock().explicit_height(), None);
        assert_eq!(host.pending(), 0);
    }
}
