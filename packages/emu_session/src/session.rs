use bytes::Bytes;
use std::future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::button::Button;
use crate::emulator::{CoreLoader, EmulatorCore};
use crate::error::SessionError;
use crate::store::SnapshotStore;

const COMMAND_QUEUE: usize = 64;
const FRAME_FEED: usize = 64;
/// Floor for a core's frame interval; a zero period would never yield.
const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);

/// One completed video frame.
///
/// `seq` increases by one for every frame a session produces. The payload is
/// reference counted, so cloning a frame for many viewers is cheap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub seq: u64,
    pub data: Bytes,
}

/// How a session was brought up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartKind {
    ColdStart,
    WarmStart { timestamp: u64 },
}

/// Point-in-time view of a session
#[derive(Clone, Debug)]
pub struct SessionState {
    pub id: String,
    pub running: bool,
    pub frames_produced: u64,
    pub inputs_applied: u64,
}

/// Messages that can be sent to the session actor
enum SessionMessage {
    Run {
        respond_to: oneshot::Sender<bool>,
    },
    Input {
        button: Button,
    },
    Snapshot {
        respond_to: oneshot::Sender<Option<Vec<u8>>>,
    },
    GetState {
        respond_to: oneshot::Sender<SessionState>,
    },
}

/// Handle to communicate with a session actor
#[derive(Clone)]
pub struct SessionHandle {
    id: Arc<str>,
    sender: mpsc::Sender<SessionMessage>,
    frame_tx: broadcast::Sender<Frame>,
    last_frame: watch::Receiver<Option<Frame>>,
}

impl SessionHandle {
    /// Start a session from a source image. The session is idle until
    /// [`run`](Self::run) is called.
    pub fn cold_start(
        id: &str,
        loader: &dyn CoreLoader,
        image: &[u8],
    ) -> Result<Self, SessionError> {
        let core = loader.cold_start(image)?;
        Ok(SessionActor::spawn(id, core))
    }

    /// Start a session from a previously captured snapshot.
    pub fn warm_start(
        id: &str,
        loader: &dyn CoreLoader,
        state: &[u8],
    ) -> Result<Self, SessionError> {
        let core = loader.warm_start(state)?;
        Ok(SessionActor::spawn(id, core))
    }

    /// Bring a session up from the newest usable snapshot in `store`, or from
    /// the image at `image_path` when no snapshot can be restored.
    ///
    /// Records are tried newest first. One that cannot be read or that the
    /// core rejects is skipped in favor of the next older one.
    pub async fn start(
        id: &str,
        image_path: &Path,
        store: &SnapshotStore,
        loader: &dyn CoreLoader,
    ) -> Result<(Self, StartKind), SessionError> {
        let records = store.records(id).unwrap_or_else(|e| {
            warn!(session = %id, "Failed to list snapshots: {}", e);
            Vec::new()
        });

        for record in records.iter().rev() {
            let restored = store
                .read(record)
                .and_then(|state| Self::warm_start(id, loader, &state));
            match restored {
                Ok(handle) => {
                    info!(session = %id, timestamp = record.timestamp, "Warm started from snapshot");
                    return Ok((
                        handle,
                        StartKind::WarmStart {
                            timestamp: record.timestamp,
                        },
                    ));
                }
                Err(e) => {
                    warn!(
                        session = %id,
                        path = %record.path.display(),
                        "Skipping unusable snapshot: {}",
                        e
                    );
                }
            }
        }
        if !records.is_empty() {
            warn!(session = %id, "No usable snapshot, falling back to cold start");
        }

        let image = tokio::fs::read(image_path).await.map_err(|e| {
            SessionError::ColdStart(format!("{}: {}", image_path.display(), e))
        })?;
        let handle = Self::cold_start(id, loader, &image)?;
        info!(session = %id, image = %image_path.display(), "Cold started from image");
        Ok((handle, StartKind::ColdStart))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Begin producing frames. Returns `false` if the loop was already running.
    pub async fn run(&self) -> Result<bool, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Run { respond_to: tx })
            .await
            .map_err(|_| SessionError::ChannelError("Failed to send run message".into()))?;
        rx.await
            .map_err(|_| SessionError::ChannelError("Failed to receive run response".into()))
    }

    /// Apply one viewer input token. Tokens are applied in the order they
    /// were submitted.
    pub async fn submit_input(&self, raw: &str) -> Result<(), SessionError> {
        let button = raw.parse::<Button>().inspect_err(|_| {
            warn!(session = %self.id, "Rejected malformed input {:?}", raw);
        })?;
        self.sender
            .send(SessionMessage::Input { button })
            .await
            .map_err(|_| SessionError::ChannelError("Failed to send input message".into()))
    }

    /// Capture the complete emulator state. Serviced between frames.
    pub async fn snapshot(&self) -> Result<Option<Vec<u8>>, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::Snapshot { respond_to: tx })
            .await
            .map_err(|_| SessionError::ChannelError("Failed to send snapshot message".into()))?;
        rx.await.map_err(|_| {
            SessionError::ChannelError("Failed to receive snapshot response".into())
        })
    }

    pub async fn state(&self) -> Result<SessionState, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::GetState { respond_to: tx })
            .await
            .map_err(|_| SessionError::ChannelError("Failed to send state message".into()))?;
        rx.await
            .map_err(|_| SessionError::ChannelError("Failed to receive state response".into()))
    }

    /// Subscribe to frames produced from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.frame_tx.subscribe()
    }

    /// The most recently produced frame, if any
    pub fn last_frame(&self) -> Option<Frame> {
        self.last_frame.borrow().clone()
    }
}

/// The actor that owns one emulator core
struct SessionActor {
    id: Arc<str>,
    core: Box<dyn EmulatorCore>,
    receiver: mpsc::Receiver<SessionMessage>,
    frame_tx: broadcast::Sender<Frame>,
    last_frame: watch::Sender<Option<Frame>>,
    running: bool,
    frames_produced: u64,
    inputs_applied: u64,
}

impl SessionActor {
    fn spawn(id: &str, core: Box<dyn EmulatorCore>) -> SessionHandle {
        let id: Arc<str> = Arc::from(id);
        let (msg_tx, msg_rx) = mpsc::channel(COMMAND_QUEUE);
        let (frame_tx, _) = broadcast::channel(FRAME_FEED);
        let (last_tx, last_rx) = watch::channel(None);

        let actor = Self {
            id: id.clone(),
            core,
            receiver: msg_rx,
            frame_tx: frame_tx.clone(),
            last_frame: last_tx,
            running: false,
            frames_produced: 0,
            inputs_applied: 0,
        };
        tokio::spawn(actor.run());

        SessionHandle {
            id,
            sender: msg_tx,
            frame_tx,
            last_frame: last_rx,
        }
    }

    async fn run(mut self) {
        debug!(session = %self.id, "Session actor started");
        let mut ticker: Option<Interval> = None;

        loop {
            tokio::select! {
                biased;
                msg = self.receiver.recv() => match msg {
                    Some(msg) => self.handle(msg, &mut ticker),
                    None => break,
                },
                _ = next_tick(&mut ticker) => self.step(),
            }
        }

        info!(session = %self.id, frames = self.frames_produced, "Session actor shutting down");
    }

    fn handle(&mut self, msg: SessionMessage, ticker: &mut Option<Interval>) {
        match msg {
            SessionMessage::Run { respond_to } => {
                if self.running {
                    info!(session = %self.id, "Run requested but session is already running");
                    let _ = respond_to.send(false);
                    return;
                }
                let period = self.core.frame_interval().max(MIN_FRAME_INTERVAL);
                let mut interval = time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                *ticker = Some(interval);
                self.running = true;
                info!(session = %self.id, "Session running");
                let _ = respond_to.send(true);
            }
            SessionMessage::Input { button } => {
                self.core.press(button);
                self.inputs_applied += 1;
            }
            SessionMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.core.snapshot());
            }
            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(SessionState {
                    id: self.id.to_string(),
                    running: self.running,
                    frames_produced: self.frames_produced,
                    inputs_applied: self.inputs_applied,
                });
            }
        }
    }

    fn step(&mut self) {
        let Some(data) = self.core.run_frame() else {
            return;
        };
        self.frames_produced += 1;
        let frame = Frame {
            seq: self.frames_produced,
            data,
        };
        self.last_frame.send_replace(Some(frame.clone()));
        // No subscribers is fine
        let _ = self.frame_tx.send(frame);
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}
