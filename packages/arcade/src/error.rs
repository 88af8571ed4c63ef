use std::path::PathBuf;

use emu_session::SessionError;

/// Errors that stop the server from starting
#[derive(Debug, thiserror::Error)]
pub enum ArcadeError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cannot read images directory {path}: {source}")]
    ImagesDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No startable sessions found in {0}")]
    NoSessions(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_convert() {
        let err: ArcadeError = SessionError::ColdStart("empty".into()).into();
        assert!(matches!(err, ArcadeError::Session(_)));
        assert_eq!(err.to_string(), "Failed to cold start: empty");
    }

    #[test]
    fn images_dir_names_path() {
        let err = ArcadeError::ImagesDir {
            path: PathBuf::from("/nope"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("/nope"));
    }
}
