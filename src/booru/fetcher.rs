//! Transport used to materialize thumbnails and read ahead images.
//!
//! [`HttpTransport`] is an async reqwest client running on its own tokio runtime:
//! 1. Downloads are bounded by a semaphore sized to the site's connection limit
//! 2. Bodies are streamed to a `.part` file and renamed into place when complete
//! 3. The cancellation token is checked before the request and between chunks
//! 4. Failures are recorded on the thumbnail, never retried

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use thiserror::Error;
use tokio::fs::{self as async_fs, File};
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::booru::image::{FetchState, FetchTarget, ThumbnailDownload};
use crate::booru::prefetch::CancellationToken;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    Status(reqwest::StatusCode),

    #[error("Download cancelled")]
    Cancelled,
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Fetch collaborator of an image list.
pub trait Transport: Send + Sync {
    /// Starts materializing a thumbnail. May return before the download completes.
    fn fetch_thumbnail(&self, thumbnail: Arc<ThumbnailDownload>, cancel: CancellationToken);

    /// Reads ahead full images near the current selection.
    fn prewarm(&self, targets: Vec<FetchTarget>, cancel: CancellationToken);

    /// Stops accepting work and waits briefly for in-flight downloads.
    fn shutdown(&self);
}

/// Builds a transport from a connection limit.
pub type TransportFactory = Box<dyn Fn(usize) -> FetchResult<Arc<dyn Transport>>>;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub shutdown_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("booru_imagelist/{}", env!("CARGO_PKG_VERSION")),
            timeout_seconds: 30,
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

pub struct HttpTransport {
    client: Client,
    runtime: Mutex<Option<Runtime>>,
    semaphore: Arc<Semaphore>,
    shutdown_timeout: Duration,
}

impl HttpTransport {
    pub fn new(max_connections: usize, config: HttpTransportConfig) -> FetchResult<Self> {
        let max_connections = max_connections.max(1);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(max_connections.min(4))
            .thread_name("booru-fetch")
            .enable_all()
            .build()?;

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_max_idle_per_host(max_connections)
            .gzip(true)
            .build()?;

        info!("Initialized HTTP transport with {} connections", max_connections);

        Ok(Self {
            client,
            runtime: Mutex::new(Some(runtime)),
            semaphore: Arc::new(Semaphore::new(max_connections)),
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// A factory building transports with the given configuration.
    pub fn factory(config: HttpTransportConfig) -> TransportFactory {
        Box::new(move |max_connections| {
            let transport = HttpTransport::new(max_connections, config.clone())?;
            Ok(Arc::new(transport) as Arc<dyn Transport>)
        })
    }

    fn spawn<F>(&self, future: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        match self.runtime.lock().as_ref() {
            Some(runtime) => {
                runtime.spawn(future);
                true
            }
            None => false,
        }
    }
}

impl Transport for HttpTransport {
    fn fetch_thumbnail(&self, thumbnail: Arc<ThumbnailDownload>, cancel: CancellationToken) {
        if !thumbnail.try_start() {
            return;
        }

        let client = self.client.clone();
        let semaphore = self.semaphore.clone();
        let task_thumbnail = thumbnail.clone();
        let spawned = self.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                task_thumbnail.set_state(FetchState::Cancelled);
                return;
            };
            let target = task_thumbnail.target();
            let result = download(&client, target, &cancel, Some(&task_thumbnail)).await;
            let state = match result {
                Ok(()) => FetchState::Completed,
                Err(FetchError::Cancelled) => FetchState::Cancelled,
                Err(e) => {
                    warn!(url = task_thumbnail.url(), "Thumbnail download failed: {}", e);
                    FetchState::Failed
                }
            };
            task_thumbnail.set_state(state);
        });

        if !spawned {
            thumbnail.set_state(FetchState::Cancelled);
        }
    }

    fn prewarm(&self, targets: Vec<FetchTarget>, cancel: CancellationToken) {
        for target in targets {
            if target.path.is_file() {
                continue;
            }
            let client = self.client.clone();
            let semaphore = self.semaphore.clone();
            let cancel = cancel.clone();
            self.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                if let Err(e) = download(&client, &target, &cancel, None).await {
                    debug!(url = %target.url, "Prewarm skipped: {}", e);
                }
            });
        }
    }

    fn shutdown(&self) {
        self.semaphore.close();
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_timeout(self.shutdown_timeout);
            info!("HTTP transport shut down");
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Streams `target` to disk, giving up as soon as the token or the owning thumbnail
/// is cancelled.
#[instrument(skip(client, cancel, owner), fields(url = %target.url))]
async fn download(
    client: &Client,
    target: &FetchTarget,
    cancel: &CancellationToken,
    owner: Option<&ThumbnailDownload>,
) -> FetchResult<()> {
    let stopped = || cancel.is_cancelled() || owner.is_some_and(|o| o.is_cancelled());
    if stopped() {
        return Err(FetchError::Cancelled);
    }

    let response = client.get(&target.url).send().await?;
    if !response.status().is_success() {
        return Err(FetchError::Status(response.status()));
    }

    if let Some(parent) = target.path.parent() {
        async_fs::create_dir_all(parent).await?;
    }
    let temp_path = part_path(&target.path);
    let mut file = File::create(&temp_path).await?;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        if stopped() {
            drop(file);
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(FetchError::Cancelled);
        }
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = async_fs::remove_file(&temp_path).await;
                return Err(FetchError::Request(e));
            }
        };
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    drop(file);
    async_fs::rename(&temp_path, &target.path).await?;
    debug!(path = %target.path.display(), "Download completed");
    Ok(())
}
