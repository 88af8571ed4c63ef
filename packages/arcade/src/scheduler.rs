//! Periodic durable snapshots.
//!
//! One timer per session asks the session for a snapshot every period. The
//! write happens on a tracked blocking task so a slow disk never delays the
//! next tick or the session itself. Shutdown cancels the timers and gives
//! in-flight writes a bounded grace period.

use std::sync::Arc;
use std::time::Duration;

use emu_session::{SessionError, SessionHandle, SnapshotRecord, SnapshotStore};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::ArcadeError;
use crate::metrics::ServerMetrics;
use crate::registry::SessionRegistry;

/// Shortest period a timer will run at
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Result of one capture attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    Written(SnapshotRecord),
    /// The session had nothing to capture
    Skipped,
}

pub struct SnapshotScheduler {
    store: SnapshotStore,
    period: Duration,
    retention: Option<usize>,
    metrics: Arc<ServerMetrics>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl SnapshotScheduler {
    pub fn new(
        store: SnapshotStore,
        period: Duration,
        retention: Option<usize>,
        metrics: Arc<ServerMetrics>,
    ) -> Arc<Self> {
        if period < MIN_PERIOD {
            warn!("Snapshot period {:?} too short, using {:?}", period, MIN_PERIOD);
        }
        Arc::new(Self {
            store,
            period: period.max(MIN_PERIOD),
            retention,
            metrics,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Start one snapshot timer per session in `registry`. The first capture
    /// happens one period from now.
    pub fn spawn(self: &Arc<Self>, registry: &SessionRegistry) {
        info!(
            "Starting snapshot scheduler for {} session(s), period {:?}",
            registry.len(),
            self.period
        );

        for (id, room) in registry.rooms() {
            let scheduler = Arc::clone(self);
            let id = id.to_string();
            let session = room.session.clone();

            self.tracker.spawn(async move {
                let mut interval = time::interval_at(Instant::now() + scheduler.period, scheduler.period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = scheduler.cancel.cancelled() => break,
                        _ = interval.tick() => scheduler.capture(&id, &session).await,
                    }
                }
                debug!(session = %id, "Snapshot timer stopped");
            });
        }
    }

    /// Take a snapshot and write it in the background.
    pub async fn capture(&self, id: &str, session: &SessionHandle) {
        let data = match self.take(id, session).await {
            Some(data) => data,
            None => return,
        };

        let store = self.store.clone();
        let metrics = self.metrics.clone();
        let retention = self.retention;
        let id = id.to_string();
        self.tracker
            .spawn_blocking(move || persist_logged(&store, &metrics, retention, &id, &data));
    }

    /// Take a snapshot and wait for it to be written.
    pub async fn capture_now(
        &self,
        id: &str,
        session: &SessionHandle,
    ) -> Result<CaptureOutcome, ArcadeError> {
        let Some(data) = self.take(id, session).await else {
            return Ok(CaptureOutcome::Skipped);
        };

        let store = self.store.clone();
        let metrics = self.metrics.clone();
        let retention = self.retention;
        let owned_id = id.to_string();
        let record = self
            .tracker
            .spawn_blocking(move || persist(&store, &metrics, retention, &owned_id, &data))
            .await
            .map_err(|e| SessionError::ChannelError(format!("snapshot write task failed: {}", e)))??;

        Ok(CaptureOutcome::Written(record))
    }

    async fn take(&self, id: &str, session: &SessionHandle) -> Option<Vec<u8>> {
        match session.snapshot().await {
            Ok(Some(data)) => Some(data),
            Ok(None) => {
                debug!(session = %id, "Nothing to snapshot");
                self.metrics.snapshot_skipped();
                None
            }
            Err(e) => {
                error!(session = %id, "Failed to take snapshot: {}", e);
                self.metrics.snapshot_failed();
                None
            }
        }
    }

    /// Stop all timers and wait up to `grace` for in-flight writes.
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();
        self.tracker.close();

        if time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                "Snapshot writes still in flight after {:?}, abandoning them",
                grace
            );
        } else {
            info!("Snapshot scheduler stopped");
        }
    }
}

/// Background variant of [`persist`]. Failures are already logged and counted.
fn persist_logged(
    store: &SnapshotStore,
    metrics: &ServerMetrics,
    retention: Option<usize>,
    id: &str,
    data: &[u8],
) {
    if persist(store, metrics, retention, id, data).is_err() {
        debug!(session = %id, "Snapshot dropped, retrying next period");
    }
}

fn persist(
    store: &SnapshotStore,
    metrics: &ServerMetrics,
    retention: Option<usize>,
    id: &str,
    data: &[u8],
) -> Result<SnapshotRecord, SessionError> {
    let timestamp = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);

    let record = match store.write(id, timestamp, data) {
        Ok(record) => record,
        Err(e) => {
            error!(session = %id, "Failed to write snapshot: {}", e);
            metrics.snapshot_failed();
            return Err(e);
        }
    };
    metrics.snapshot_written();
    info!(session = %id, path = %record.path.display(), bytes = data.len(), "Snapshot saved");

    if let Some(keep) = retention {
        if let Err(e) = store.prune(id, keep) {
            warn!(session = %id, "Failed to prune old snapshots: {}", e);
        }
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Room;
    use bytes::Bytes;
    use emu_session::{Button, CoreLoader, EmulatorCore, PatternLoader};
    use tempfile::TempDir;

    struct Blank;

    impl EmulatorCore for Blank {
        fn run_frame(&mut self) -> Option<Bytes> {
            None
        }
        fn press(&mut self, _button: Button) {}
        fn snapshot(&self) -> Option<Vec<u8>> {
            None
        }
        fn frame_interval(&self) -> Duration {
            Duration::from_millis(16)
        }
    }

    struct BlankLoader;

    impl CoreLoader for BlankLoader {
        fn cold_start(&self, _image: &[u8]) -> Result<Box<dyn EmulatorCore>, SessionError> {
            Ok(Box::new(Blank))
        }
        fn warm_start(&self, _state: &[u8]) -> Result<Box<dyn EmulatorCore>, SessionError> {
            Ok(Box::new(Blank))
        }
    }

    fn setup(period: Duration, retention: Option<usize>) -> (TempDir, SnapshotStore, Arc<SnapshotScheduler>) {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::open(dir.path().join("saves")).unwrap();
        let scheduler =
            SnapshotScheduler::new(store.clone(), period, retention, Arc::new(ServerMetrics::new()));
        (dir, store, scheduler)
    }

    fn session(id: &str) -> SessionHandle {
        SessionHandle::cold_start(id, &PatternLoader, b"scheduler").unwrap()
    }

    #[tokio::test]
    async fn capture_now_writes_restorable_record() {
        let (_dir, store, scheduler) = setup(Duration::from_secs(60), None);
        let session = session("zelda");
        session.submit_input("A").await.unwrap();

        let outcome = scheduler.capture_now("zelda", &session).await.unwrap();
        let CaptureOutcome::Written(record) = outcome else {
            panic!("expected a record");
        };
        assert_eq!(record.session_id, "zelda");
        assert_eq!(store.latest("zelda").unwrap(), Some(record.clone()));

        let data = store.read(&record).unwrap();
        assert!(PatternLoader.warm_start(&data).is_ok());
        assert_eq!(scheduler.metrics.snapshot().snapshots.written, 1);
    }

    #[tokio::test]
    async fn retention_prunes_old_records() {
        let (_dir, store, scheduler) = setup(Duration::from_secs(60), Some(2));
        let session = session("zelda");

        for _ in 0..4 {
            scheduler.capture_now("zelda", &session).await.unwrap();
        }
        assert_eq!(store.records("zelda").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn nothing_to_capture_is_skipped() {
        let (_dir, store, scheduler) = setup(Duration::from_secs(60), None);
        let session = SessionHandle::cold_start("blank", &BlankLoader, b"x").unwrap();

        let outcome = scheduler.capture_now("blank", &session).await.unwrap();
        assert_eq!(outcome, CaptureOutcome::Skipped);
        assert!(store.records("blank").unwrap().is_empty());
        assert_eq!(scheduler.metrics.snapshot().snapshots.skipped, 1);
    }

    #[tokio::test]
    async fn write_failure_is_counted_and_next_capture_works() {
        let (_dir, store, scheduler) = setup(Duration::from_secs(60), None);
        let session = session("zelda");

        std::fs::remove_dir_all(store.dir()).unwrap();
        assert!(scheduler.capture_now("zelda", &session).await.is_err());
        assert_eq!(scheduler.metrics.snapshot().snapshots.failed, 1);

        std::fs::create_dir_all(store.dir()).unwrap();
        let outcome = scheduler.capture_now("zelda", &session).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::Written(_)));
    }

    #[tokio::test]
    async fn zero_period_is_clamped() {
        let (_dir, _store, scheduler) = setup(Duration::ZERO, None);
        assert_eq!(scheduler.period, MIN_PERIOD);
    }

    #[tokio::test]
    async fn failing_session_does_not_stall_others() {
        let (_dir, store, scheduler) = setup(Duration::from_millis(50), None);
        // Records for this id land in subdirectories that do not exist yet,
        // so its writes fail until they are created.
        let registry = SessionRegistry::from_rooms([
            Room::new(session("mario")),
            Room::new(session("zelda/cart")),
        ]);
        let zelda_records = || std::fs::read_dir(store.dir().join("zelda")).map_or(0, |d| d.count());

        scheduler.spawn(&registry);

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.records("mario").unwrap().len() < 3 || scheduler.metrics.snapshot().snapshots.failed < 2 {
            assert!(Instant::now() < deadline, "mario stalled behind zelda's failures");
            time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(zelda_records(), 0);

        std::fs::create_dir_all(store.dir().join(".zelda")).unwrap();
        std::fs::create_dir_all(store.dir().join("zelda")).unwrap();
        let mario_before = store.records("mario").unwrap().len();

        while zelda_records() == 0 || store.records("mario").unwrap().len() <= mario_before {
            assert!(Instant::now() < deadline, "zelda never recovered");
            time::sleep(Duration::from_millis(20)).await;
        }

        scheduler.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn timers_capture_every_session_until_shutdown() {
        let (_dir, store, scheduler) = setup(Duration::from_millis(50), None);
        let registry = SessionRegistry::from_rooms([Room::new(session("a")), Room::new(session("b"))]);

        scheduler.spawn(&registry);

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.records("a").unwrap().is_empty() || store.records("b").unwrap().is_empty() {
            assert!(Instant::now() < deadline, "no snapshots written");
            time::sleep(Duration::from_millis(20)).await;
        }

        scheduler.shutdown(Duration::from_secs(2)).await;
        let after_shutdown = store.records("a").unwrap().len();
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.records("a").unwrap().len(), after_shutdown);
    }
}
