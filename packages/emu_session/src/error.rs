/// Errors that can occur while starting or driving a session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The source image could not be read or was rejected by the core
    #[error("Failed to cold start: {0}")]
    ColdStart(String),
    /// A saved snapshot could not be restored
    #[error("Failed to warm start: {0}")]
    WarmStart(String),
    /// Viewer input that does not name a button
    #[error("Invalid input token: {0:?}")]
    InvalidInput(String),
    /// The session actor is gone or did not answer
    #[error("Channel error: {0}")]
    ChannelError(String),
    /// Snapshot store I/O
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
