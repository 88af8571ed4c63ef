//! Broadcast hub: fans one session's frames out to its viewers.
//!
//! Each session gets a single hub task. Attach, detach and frame delivery
//! are all handled by that task, so a newcomer always receives the last
//! known frame before its first viewer count, and every viewer sees frames
//! in the order the session produced them.

use std::collections::HashMap;
use std::sync::Arc;

use emu_session::{Frame, SessionError, SessionHandle};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::queue::{Outbound, OutboundQueue};

/// Identity of an attached viewer within one hub
pub type ViewerId = u64;

/// Returned by [`HubHandle::attach`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewerTicket {
    pub viewer_id: ViewerId,
    /// Viewer count right after this attach
    pub viewers: usize,
}

enum HubMessage {
    Attach {
        queue: Arc<OutboundQueue>,
        respond_to: oneshot::Sender<ViewerTicket>,
    },
    Detach {
        viewer_id: ViewerId,
        respond_to: oneshot::Sender<bool>,
    },
    ViewerCount {
        respond_to: oneshot::Sender<usize>,
    },
}

/// Handle to a session's hub
#[derive(Clone)]
pub struct HubHandle {
    session: SessionHandle,
    sender: mpsc::Sender<HubMessage>,
}

impl HubHandle {
    /// Spawn a hub fed by `session`'s frame feed.
    pub fn spawn(session: SessionHandle) -> Self {
        let feed = session.subscribe();
        let initial = session.last_frame();
        Self::spawn_with_feed(session, feed, initial)
    }

    /// Spawn a hub with explicit frame wiring.
    pub fn spawn_with_feed(
        session: SessionHandle,
        feed: broadcast::Receiver<Frame>,
        initial: Option<Frame>,
    ) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(64);

        let actor = HubActor {
            session_id: session.id().to_string(),
            receiver: msg_rx,
            feed,
            viewers: HashMap::new(),
            next_viewer: 1,
            last_frame: initial,
        };
        tokio::spawn(actor.run());

        Self {
            session,
            sender: msg_tx,
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Add a viewer. It receives the last known frame (if any), then every
    /// viewer receives the new count.
    pub async fn attach(&self, queue: Arc<OutboundQueue>) -> Result<ViewerTicket, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubMessage::Attach {
                queue,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::ChannelError("Failed to send attach message".into()))?;
        rx.await
            .map_err(|_| SessionError::ChannelError("Failed to receive attach response".into()))
    }

    /// Remove a viewer. Returns `false` if it was not attached.
    pub async fn detach(&self, viewer_id: ViewerId) -> Result<bool, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubMessage::Detach {
                viewer_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::ChannelError("Failed to send detach message".into()))?;
        rx.await
            .map_err(|_| SessionError::ChannelError("Failed to receive detach response".into()))
    }

    pub async fn viewer_count(&self) -> Result<usize, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubMessage::ViewerCount { respond_to: tx })
            .await
            .map_err(|_| SessionError::ChannelError("Failed to send count message".into()))?;
        rx.await
            .map_err(|_| SessionError::ChannelError("Failed to receive count response".into()))
    }

    /// Forward a viewer's input token to the session.
    pub async fn relay_input(&self, raw: &str) -> Result<(), SessionError> {
        self.session.submit_input(raw).await
    }
}

struct HubActor {
    session_id: String,
    receiver: mpsc::Receiver<HubMessage>,
    feed: broadcast::Receiver<Frame>,
    viewers: HashMap<ViewerId, Arc<OutboundQueue>>,
    next_viewer: ViewerId,
    last_frame: Option<Frame>,
}

impl HubActor {
    async fn run(mut self) {
        debug!(session = %self.session_id, "Hub started");
        let mut feed_open = true;

        loop {
            tokio::select! {
                biased;
                msg = self.receiver.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => break,
                },
                result = self.feed.recv(), if feed_open => match result {
                    Ok(frame) => self.fan_out(frame),
                    Err(RecvError::Lagged(n)) => {
                        warn!(session = %self.session_id, "Hub lagged behind frame feed by {} frames", n);
                    }
                    Err(RecvError::Closed) => {
                        info!(session = %self.session_id, "Frame feed closed");
                        feed_open = false;
                    }
                },
            }
        }

        for queue in self.viewers.values() {
            queue.close();
        }
        debug!(session = %self.session_id, "Hub shutting down");
    }

    fn handle(&mut self, msg: HubMessage) {
        match msg {
            HubMessage::Attach { queue, respond_to } => {
                let viewer_id = self.next_viewer;
                self.next_viewer += 1;

                if let Some(frame) = &self.last_frame {
                    queue.push(Outbound::Frame(frame.clone()));
                }
                self.viewers.insert(viewer_id, queue);
                let viewers = self.viewers.len();
                info!(session = %self.session_id, viewer = viewer_id, viewers, "Viewer attached");
                self.broadcast_count();

                let _ = respond_to.send(ViewerTicket { viewer_id, viewers });
            }
            HubMessage::Detach {
                viewer_id,
                respond_to,
            } => {
                let removed = match self.viewers.remove(&viewer_id) {
                    Some(queue) => {
                        queue.close();
                        info!(
                            session = %self.session_id,
                            viewer = viewer_id,
                            viewers = self.viewers.len(),
                            "Viewer detached"
                        );
                        self.broadcast_count();
                        true
                    }
                    None => false,
                };
                let _ = respond_to.send(removed);
            }
            HubMessage::ViewerCount { respond_to } => {
                let _ = respond_to.send(self.viewers.len());
            }
        }
    }

    fn fan_out(&mut self, frame: Frame) {
        // Frames at or before the seeded one were already seen
        if self
            .last_frame
            .as_ref()
            .is_some_and(|last| frame.seq <= last.seq)
        {
            return;
        }
        for queue in self.viewers.values() {
            queue.push(Outbound::Frame(frame.clone()));
        }
        self.last_frame = Some(frame);
    }

    fn broadcast_count(&self) {
        let count = self.viewers.len();
        for queue in self.viewers.values() {
            queue.push(Outbound::ViewerCount(count));
        }
    }
}
