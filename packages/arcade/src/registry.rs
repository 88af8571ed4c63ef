use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs;
use std::path::{Path, PathBuf};

use emu_session::{CoreLoader, SessionHandle, SnapshotStore, StartKind};
use tracing::{error, info, warn};

use crate::error::ArcadeError;
use crate::hub::HubHandle;

/// A session together with the hub that serves its viewers
#[derive(Clone)]
pub struct Room {
    pub session: SessionHandle,
    pub hub: HubHandle,
}

impl Room {
    pub fn new(session: SessionHandle) -> Self {
        let hub = HubHandle::spawn(session.clone());
        Self { session, hub }
    }
}

/// The fixed set of sessions served by this process, keyed by session id.
///
/// Built once at startup and never modified afterwards.
pub struct SessionRegistry {
    rooms: BTreeMap<String, Room>,
}

impl SessionRegistry {
    /// Start one session per source image found in `images_dir`.
    ///
    /// The session id is the file stem. When `extensions` is non-empty only
    /// files with one of those extensions (case-insensitive) are considered.
    pub async fn load(
        images_dir: &Path,
        extensions: &[String],
        store: &SnapshotStore,
        loader: &dyn CoreLoader,
    ) -> Result<Self, ArcadeError> {
        let images = discover_images(images_dir, extensions)?;
        let mut rooms = BTreeMap::new();

        for (id, path) in images {
            match SessionHandle::start(&id, &path, store, loader).await {
                Ok((session, kind)) => {
                    match kind {
                        StartKind::ColdStart => info!(session = %id, "Session ready (cold start)"),
                        StartKind::WarmStart { timestamp } => {
                            info!(session = %id, timestamp, "Session ready (restored)")
                        }
                    }
                    rooms.insert(id, Room::new(session));
                }
                Err(e) => {
                    error!(session = %id, path = %path.display(), "Skipping session: {}", e);
                }
            }
        }

        if rooms.is_empty() {
            return Err(ArcadeError::NoSessions(images_dir.to_path_buf()));
        }
        info!("Loaded {} session(s)", rooms.len());
        Ok(Self { rooms })
    }

    /// Build a registry from already started rooms.
    pub fn from_rooms(rooms: impl IntoIterator<Item = Room>) -> Self {
        Self {
            rooms: rooms
                .into_iter()
                .map(|room| (room.session.id().to_string(), room))
                .collect(),
        }
    }

    pub fn resolve(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    /// Session ids in sorted order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.rooms.keys().map(String::as_str)
    }

    pub fn rooms(&self) -> impl Iterator<Item = (&str, &Room)> {
        self.rooms.iter().map(|(id, room)| (id.as_str(), room))
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Start every session's frame loop.
    pub async fn run_all(&self) {
        for (id, room) in &self.rooms {
            if let Err(e) = room.session.run().await {
                error!(session = %id, "Failed to start frame loop: {}", e);
            }
        }
    }
}

fn discover_images(dir: &Path, extensions: &[String]) -> Result<Vec<(String, PathBuf)>, ArcadeError> {
    let wanted: Vec<String> = extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect();

    let entries = fs::read_dir(dir).map_err(|source| ArcadeError::ImagesDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ArcadeError::ImagesDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') || !path.is_file() {
            continue;
        }

        if !wanted.is_empty() {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase);
            if !ext.is_some_and(|ext| wanted.contains(&ext)) {
                continue;
            }
        }

        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            warn!(path = %path.display(), "Skipping image with non UTF-8 name");
            continue;
        };
        candidates.push((id.to_string(), path.clone()));
    }
    candidates.sort();

    let mut images: BTreeMap<String, PathBuf> = BTreeMap::new();
    for (id, path) in candidates {
        match images.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(path);
            }
            Entry::Occupied(existing) => {
                warn!(
                    session = %existing.key(),
                    kept = %existing.get().display(),
                    skipped = %path.display(),
                    "Duplicate session id"
                );
            }
        }
    }

    Ok(images.into_iter().collect())
}
