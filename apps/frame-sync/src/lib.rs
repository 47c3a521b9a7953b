//! Height synchronization between a page and the cross-origin document it
//! frames.
//!
//! The host ([`host::HostFrameController`]) and the guest
//! ([`guest::GuestFrameReporter`]) only ever talk through a
//! [`frame_bus::MessageChannel`], and each checks the sender's origin before
//! acting on a message.

pub mod config;
pub mod document;
pub mod guest;
pub mod host;
pub mod retry;
pub mod telemetry;

pub use config::{ConfigError, GuestConfig, HostConfig};
pub use document::{Document, SharedDocument, SimulatedDocument};
pub use frame_bus::{
    Envelope, LocalChannel, MessageChannel, MessageHandler, Subscription, Window, WindowRef,
};
pub use frame_proto::{DEFAULT_HEIGHT, FrameMessage, resolve_origin};
pub use guest::{GuestFrameReporter, GuestPhase, GuestView};
pub use host::{Delivery, FrameSession, HostFrameController, HostPhase, HostView};
pub use retry::{RetryPolicy, RetryStrategy};
