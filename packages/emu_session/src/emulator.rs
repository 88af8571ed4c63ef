use bytes::Bytes;
use std::time::Duration;

use crate::button::Button;
use crate::error::SessionError;

/// A running emulation core.
///
/// Owned exclusively by one session actor; every method is called from that
/// actor's task, so implementations need no internal locking.
pub trait EmulatorCore: Send + 'static {
    /// Step until a full video frame completes and return its payload.
    fn run_frame(&mut self) -> Option<Bytes>;

    /// Apply one button press.
    fn press(&mut self, button: Button);

    /// Capture the complete machine state, or `None` if no capture is
    /// possible right now.
    fn snapshot(&self) -> Option<Vec<u8>>;

    /// Wall-clock time between two frames.
    fn frame_interval(&self) -> Duration;
}

/// Builds cores from source images or saved snapshots.
pub trait CoreLoader: Send + Sync + 'static {
    fn cold_start(&self, image: &[u8]) -> Result<Box<dyn EmulatorCore>, SessionError>;

    fn warm_start(&self, state: &[u8]) -> Result<Box<dyn EmulatorCore>, SessionError>;
}
