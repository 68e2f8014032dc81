//! Background thumbnail prefetching.
//!
//! One worker thread per load cycle walks the records in order and hands every thumbnail
//! that is not yet on disk to the [`Transport`]. The worker never outlives its
//! [`Prefetcher`]: a new one is only spawned after the previous has been joined.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, trace};

use crate::booru::fetcher::Transport;
use crate::booru::image::{FetchState, ThumbnailDownload};

/// Cooperative cancellation flag shared by the worker and every download it starts.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Worker lifetime counters.
#[derive(Debug, Default)]
struct StatsInner {
    spawned: AtomicUsize,
    finished: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    dispatched: AtomicUsize,
}

/// Snapshot of prefetch activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchStats {
    pub spawned: usize,
    pub finished: usize,
    pub active: usize,
    /// Highest number of workers ever alive at the same time.
    pub peak_active: usize,
    /// Thumbnails handed to the transport.
    pub dispatched: usize,
}

/// Decrements the active count even if the worker panics.
struct ActiveGuard<'a>(&'a StatsInner);

impl<'a> ActiveGuard<'a> {
    fn enter(stats: &'a StatsInner) -> Self {
        let active = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak_active.fetch_max(active, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
        self.0.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
enum WorkerState {
    #[default]
    Idle,
    Running {
        token: CancellationToken,
        handle: JoinHandle<()>,
    },
    JoinRequested,
}

/// Owns the single prefetch worker.
#[derive(Debug, Default)]
pub struct Prefetcher {
    state: WorkerState,
    stats: Arc<StatsInner>,
}

impl Prefetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, WorkerState::Running { .. })
    }

    pub fn stats(&self) -> PrefetchStats {
        PrefetchStats {
            spawned: self.stats.spawned.load(Ordering::SeqCst),
            finished: self.stats.finished.load(Ordering::SeqCst),
            active: self.stats.active.load(Ordering::SeqCst),
            peak_active: self.stats.peak_active.load(Ordering::SeqCst),
            dispatched: self.stats.dispatched.load(Ordering::SeqCst),
        }
    }

    /// Waits for the current worker to finish on its own.
    pub fn join(&mut self) {
        match std::mem::replace(&mut self.state, WorkerState::JoinRequested) {
            WorkerState::Running { handle, .. } => {
                trace!("Joining thumbnail worker");
                if handle.join().is_err() {
                    error!("Thumbnail worker panicked");
                }
            }
            WorkerState::Idle | WorkerState::JoinRequested => {}
        }
        self.state = WorkerState::Idle;
    }

    /// Signals the worker to stop, then joins it.
    pub fn cancel(&mut self) {
        if let WorkerState::Running { token, .. } = &self.state {
            token.cancel();
        }
        self.join();
    }

    /// Joins any previous worker and starts a new one over `thumbnails`.
    pub fn restart(
        &mut self,
        thumbnails: Vec<Arc<ThumbnailDownload>>,
        transport: Arc<dyn Transport>,
        token: CancellationToken,
    ) {
        self.join();

        let stats = self.stats.clone();
        let worker_token = token.clone();
        let spawned = thread::Builder::new()
            .name("thumbnail-prefetch".to_string())
            .spawn(move || run_worker(thumbnails, transport, worker_token, stats));

        match spawned {
            Ok(handle) => {
                self.stats.spawned.fetch_add(1, Ordering::SeqCst);
                self.state = WorkerState::Running { token, handle };
            }
            Err(e) => error!("Failed to spawn thumbnail worker: {}", e),
        }
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run_worker(
    thumbnails: Vec<Arc<ThumbnailDownload>>,
    transport: Arc<dyn Transport>,
    token: CancellationToken,
    stats: Arc<StatsInner>,
) {
    let _active = ActiveGuard::enter(&stats);
    let total = thumbnails.len();
    debug!(total, "Thumbnail worker started");

    for (index, thumbnail) in thumbnails.into_iter().enumerate() {
        if token.is_cancelled() {
            info!(index, total, "Thumbnail worker cancelled");
            return;
        }

        if thumbnail.state() == FetchState::Pending && thumbnail.is_materialized() {
            thumbnail.set_state(FetchState::Completed);
        }
        if thumbnail.state() != FetchState::Pending || thumbnail.is_cancelled() {
            continue;
        }

        stats.dispatched.fetch_add(1, Ordering::SeqCst);
        transport.fetch_thumbnail(thumbnail, token.clone());
    }

    debug!(total, "Thumbnail worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booru::image::FetchTarget;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingTransport {
        urls: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl Transport for RecordingTransport {
        fn fetch_thumbnail(&self, thumbnail: Arc<ThumbnailDownload>, _cancel: CancellationToken) {
            thread::sleep(self.delay);
            if thumbnail.try_start() {
                self.urls.lock().push(thumbnail.url().to_string());
                thumbnail.set_state(FetchState::Completed);
            }
        }

        fn prewarm(&self, _targets: Vec<FetchTarget>, _cancel: CancellationToken) {}

        fn shutdown(&self) {}
    }

    fn thumbs(n: usize) -> Vec<Arc<ThumbnailDownload>> {
        (0..n)
            .map(|i| {
                Arc::new(ThumbnailDownload::new(
                    format!("https://x/{}.jpg", i),
                    PathBuf::from(format!("/nonexistent/{}.jpg", i)),
                ))
            })
            .collect()
    }

    #[test]
    fn test_worker_processes_in_order() {
        let transport = Arc::new(RecordingTransport::default());
        let mut prefetcher = Prefetcher::new();

        prefetcher.restart(thumbs(4), transport.clone(), CancellationToken::new());
        prefetcher.join();

        let urls = transport.urls.lock().clone();
        assert_eq!(urls, (0..4).map(|i| format!("https://x/{}.jpg", i)).collect::<Vec<_>>());
        assert!(!prefetcher.is_running());
        assert_eq!(prefetcher.stats().dispatched, 4);
    }

    #[test]
    fn test_completed_thumbnails_are_skipped() {
        let transport = Arc::new(RecordingTransport::default());
        let items = thumbs(3);
        items[1].set_state(FetchState::Completed);

        let mut prefetcher = Prefetcher::new();
        prefetcher.restart(items, transport.clone(), CancellationToken::new());
        prefetcher.join();

        assert_eq!(transport.urls.lock().len(), 2);
    }

    #[test]
    fn test_thumbnail_already_on_disk_is_completed() {
        let dir = tempfile::tempdir().unwrap();
        let cached = dir.path().join("cached.jpg");
        std::fs::write(&cached, b"jpg").unwrap();
        let items = vec![
            Arc::new(ThumbnailDownload::new("https://x/cached.jpg".to_string(), cached)),
            Arc::new(ThumbnailDownload::new(
                "https://x/fresh.jpg".to_string(),
                dir.path().join("fresh.jpg"),
            )),
        ];
        let transport = Arc::new(RecordingTransport::default());

        let mut prefetcher = Prefetcher::new();
        prefetcher.restart(items.clone(), transport.clone(), CancellationToken::new());
        prefetcher.join();

        assert_eq!(items[0].state(), FetchState::Completed);
        assert_eq!(*transport.urls.lock(), vec!["https://x/fresh.jpg".to_string()]);
        assert_eq!(prefetcher.stats().dispatched, 1);
    }

    #[test]
    fn test_cancel_stops_promptly() {
        let transport = Arc::new(RecordingTransport {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let mut prefetcher = Prefetcher::new();

        prefetcher.restart(thumbs(200), transport.clone(), CancellationToken::new());
        thread::sleep(Duration::from_millis(50));
        prefetcher.cancel();

        assert!(transport.urls.lock().len() < 200);
        let stats = prefetcher.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.finished, 1);
    }

    #[test]
    fn test_restart_never_overlaps() {
        let transport = Arc::new(RecordingTransport {
            delay: Duration::from_millis(1),
            ..Default::default()
        });
        let mut prefetcher = Prefetcher::new();
        let token = CancellationToken::new();

        for _ in 0..20 {
            prefetcher.restart(thumbs(5), transport.clone(), token.clone());
        }
        prefetcher.join();

        let stats = prefetcher.stats();
        assert_eq!(stats.spawned, 20);
        assert_eq!(stats.finished, 20);
        assert_eq!(stats.peak_active, 1);
    }
}
