//! Deterministic reference core.
//!
//! `PatternCore` draws a moving test pattern instead of emulating real
//! hardware. Its output depends only on the source image, the number of
//! frames stepped and the input history, which makes it suitable for running
//! the server without an external emulator and for tests that need to check
//! what a session actually received.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::button::Button;
use crate::emulator::{CoreLoader, EmulatorCore};
use crate::error::SessionError;

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

/// ~59.7 frames per second
const FRAME_INTERVAL: Duration = Duration::from_nanos(16_742_706);

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

/// Complete machine state of a [`PatternCore`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternState {
    pub seed: u64,
    pub frame: u64,
    pub last_button: Option<Button>,
    /// Press counters indexed by button id
    pub presses: [u64; 8],
}

pub struct PatternCore {
    state: PatternState,
}

impl PatternCore {
    pub fn from_image(image: &[u8]) -> Result<Self, SessionError> {
        if image.is_empty() {
            return Err(SessionError::ColdStart("source image is empty".into()));
        }
        Ok(Self {
            state: PatternState {
                seed: fnv1a(image),
                frame: 0,
                last_button: None,
                presses: [0; 8],
            },
        })
    }

    pub fn from_state(state: PatternState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &PatternState {
        &self.state
    }

    pub fn presses(&self, button: Button) -> u64 {
        self.state.presses[usize::from(button.id())]
    }

    fn render(&self) -> Vec<u8> {
        let button = self.state.last_button.map_or(0xff, |b| u64::from(b.id()));
        let mut x = self.state.seed
            ^ self.state.frame.wrapping_mul(0x9e37_79b9_7f4a_7c15)
            ^ button.wrapping_mul(0xbf58_476d_1ce4_e5b9);

        let mut pixels = Vec::with_capacity(SCREEN_WIDTH * SCREEN_HEIGHT);
        for _ in 0..SCREEN_WIDTH * SCREEN_HEIGHT {
            // xorshift64
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            pixels.push((x >> 56) as u8);
        }
        pixels
    }
}

impl EmulatorCore for PatternCore {
    fn run_frame(&mut self) -> Option<Bytes> {
        let pixels = self.render();
        self.state.frame += 1;
        Some(Bytes::from(pixels))
    }

    fn press(&mut self, button: Button) {
        self.state.presses[usize::from(button.id())] += 1;
        self.state.last_button = Some(button);
    }

    fn snapshot(&self) -> Option<Vec<u8>> {
        serde_json::to_vec(&self.state).ok()
    }

    fn frame_interval(&self) -> Duration {
        FRAME_INTERVAL
    }
}

/// Loader for [`PatternCore`]
#[derive(Clone, Copy, Debug, Default)]
pub struct PatternLoader;

impl CoreLoader for PatternLoader {
    fn cold_start(&self, image: &[u8]) -> Result<Box<dyn EmulatorCore>, SessionError> {
        Ok(Box::new(PatternCore::from_image(image)?))
    }

    fn warm_start(&self, state: &[u8]) -> Result<Box<dyn EmulatorCore>, SessionError> {
        let state: PatternState =
            serde_json::from_slice(state).map_err(|e| SessionError::WarmStart(e.to_string()))?;
        Ok(Box::new(PatternCore::from_state(state)))
    }
}
