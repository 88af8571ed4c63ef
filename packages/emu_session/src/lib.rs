//! Emulation sessions - lifecycle and durable snapshot library
//!
//! This crate owns everything that happens on the emulator side of the
//! broadcast server: starting a core from a source image or a saved
//! snapshot, stepping it on its own task, accepting button input and
//! persisting snapshots to disk. It has no HTTP dependencies; the emulation
//! core itself is supplied through [`CoreLoader`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use emu_session::{PatternLoader, SessionHandle, SnapshotStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), emu_session::SessionError> {
//!     let store = SnapshotStore::open("saves")?;
//!     let (session, kind) =
//!         SessionHandle::start("zelda", Path::new("roms/zelda.gb"), &store, &PatternLoader).await?;
//!     println!("{} booted via {:?}", session.id(), kind);
//!
//!     let mut frames = session.subscribe();
//!     session.run().await?;
//!     session.submit_input("START").await?;
//!
//!     while let Ok(frame) = frames.recv().await {
//!         println!("frame {} ({} bytes)", frame.seq, frame.data.len());
//!     }
//!     Ok(())
//! }
//! ```

mod button;
mod emulator;
mod error;
pub mod pattern;
pub mod session;
pub mod store;

pub use button::Button;
pub use emulator::{CoreLoader, EmulatorCore};
pub use error::SessionError;
pub use pattern::{PatternCore, PatternLoader};
pub use session::{Frame, SessionHandle, SessionState, StartKind};
pub use store::{SnapshotRecord, SnapshotStore};
