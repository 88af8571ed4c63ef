//! Multi-session emulator broadcast server
//!
//! Every source image found at startup becomes one [`emu_session`] session
//! with its own broadcast hub. Viewers join a session over a WebSocket,
//! watch its frames, and send button input back. A scheduler periodically
//! persists each session so a restart resumes where it left off.

pub mod config;
pub mod error;
pub mod gateway;
pub mod hub;
pub mod links;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod scheduler;

pub use error::ArcadeError;
pub use gateway::{AppState, router};
pub use hub::{HubHandle, ViewerTicket};
pub use queue::{Outbound, OutboundQueue};
pub use registry::{Room, SessionRegistry};
pub use scheduler::{CaptureOutcome, SnapshotScheduler};
