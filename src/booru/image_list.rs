//! The record collection behind an image browser.
//!
//! An [`ImageList`] owns the normalized records of one browsing session. It is driven
//! from a single control thread: pages come in through [`ImageList::load`], the view
//! moves the cursor through [`ImageList::set_current`], and [`ImageList::clear`] returns
//! the list to its empty state so it can be reused. Thumbnails are materialized in the
//! background by a [`Prefetcher`] that is restarted after every non-empty load.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::booru::date::DisplayZone;
use crate::booru::document::PostDocument;
use crate::booru::fetcher::{FetchError, Transport, TransportFactory};
use crate::booru::image::{FetchTarget, Image};
use crate::booru::post::{DEFAULT_EXTENSIONS, Dialect, NormalizeContext, PostWarning, RawPost};
use crate::booru::prefetch::{CancellationToken, PrefetchStats, Prefetcher};
use crate::booru::site::Site;
use crate::booru::tag::Tag;
use crate::booru::temp_dir::{TempDir, TempDirError};
use crate::booru::view::ListView;

#[derive(Error, Debug)]
pub enum ImageListError {
    #[error("Storage error: {0}")]
    Storage(#[from] TempDirError),

    #[error("Transport error: {0}")]
    Transport(#[from] FetchError),
}

pub type ImageListResult<T> = Result<T, ImageListError>;

/// Notifications sent to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageListEvent {
    CurrentChanged {
        index: usize,
        post_id: String,
        site: String,
    },
    Cleared,
}

/// Outcome of one [`ImageList::load`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub accepted: usize,
    /// Posts dropped for an unsupported file extension.
    pub rejected: usize,
    pub warnings: Vec<PostWarning>,
}

#[derive(Debug, Clone)]
pub struct ImageListOptions {
    /// Accepted image extensions, compared case insensitively.
    pub extensions: Vec<String>,
    /// How many records on each side of the current one are read ahead.
    pub cache_size: usize,
    pub zone: DisplayZone,
}

impl Default for ImageListOptions {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            cache_size: 2,
            zone: DisplayZone::Local,
        }
    }
}

pub struct ImageList {
    images: Vec<Image>,
    size: usize,
    index: usize,
    path: Option<PathBuf>,
    site: Option<Arc<Site>>,
    view: Box<dyn ListView>,
    temp_dir: Arc<TempDir>,
    transport_factory: TransportFactory,
    transport: Option<Arc<dyn Transport>>,
    token: CancellationToken,
    prefetcher: Prefetcher,
    subscribers: Vec<flume::Sender<ImageListEvent>>,
    options: ImageListOptions,
}

impl ImageList {
    pub fn new(
        view: Box<dyn ListView>,
        temp_dir: Arc<TempDir>,
        transport_factory: TransportFactory,
        options: ImageListOptions,
    ) -> Self {
        Self {
            images: Vec::new(),
            size: 0,
            index: 0,
            path: None,
            site: None,
            view,
            temp_dir,
            transport_factory,
            transport: None,
            token: CancellationToken::new(),
            prefetcher: Prefetcher::new(),
            subscribers: Vec::new(),
            options,
        }
    }

    /// Number of records the board reported, minus rejected posts.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn get(&self, index: usize) -> Option<&Image> {
        self.images.get(index)
    }

    pub fn current(&self) -> Option<&Image> {
        self.images.get(self.index)
    }

    /// The session directory, once the first page has been loaded.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn site(&self) -> Option<&Arc<Site>> {
        self.site.as_ref()
    }

    pub fn options(&self) -> &ImageListOptions {
        &self.options
    }

    pub fn prefetch_stats(&self) -> PrefetchStats {
        self.prefetcher.stats()
    }

    pub fn subscribe(&mut self) -> flume::Receiver<ImageListEvent> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Normalizes and appends one page of posts.
    ///
    /// The first page of an empty list selects record 0. Later pages re-announce the
    /// current record so observers pick up the new site context, even when every post of
    /// the page was rejected. Nothing is appended if the session directory or the
    /// transport cannot be set up.
    #[instrument(skip_all, fields(site = site.name()))]
    pub fn load(
        &mut self,
        document: &dyn PostDocument,
        site: Arc<Site>,
        posts_tags: &[Tag],
    ) -> ImageListResult<LoadReport> {
        let posts = document.posts();
        let was_empty = self.images.is_empty();
        let dialect = Dialect::from(site.site_type());
        let mut report = LoadReport::default();

        let mut size = document.count().unwrap_or(self.images.len() + posts.len());
        let mut accepted = Vec::with_capacity(posts.len());
        for node in posts {
            let raw = RawPost::extract(node, dialect, site.use_samples());
            if raw.has_supported_extension(&self.options.extensions) {
                accepted.push(raw);
            } else {
                debug!(
                    post_id = raw.id(),
                    url = raw.image_url(),
                    "Rejected unsupported file"
                );
                report.rejected += 1;
                size = size.saturating_sub(1);
            }
        }

        if was_empty && accepted.is_empty() {
            self.site = Some(site);
            self.size = size;
            info!(rejected = report.rejected, size, "Loaded page without images");
            return Ok(report);
        }

        let transport = self.transport(&site)?;
        if !accepted.is_empty() {
            let storage_root = self.storage_root()?;
            let ctx = NormalizeContext {
                site: &site,
                storage_root: &storage_root,
                zone: &self.options.zone,
                posts_tags,
            };
            for raw in accepted {
                let (parts, warnings) = raw.into_parts(&ctx);
                site.add_tags(&parts.tags);
                self.images.push(Image::from(parts));
                report.warnings.extend(warnings);
                report.accepted += 1;
            }
        }
        self.site = Some(site);
        self.size = size;

        info!(
            accepted = report.accepted,
            rejected = report.rejected,
            warnings = report.warnings.len(),
            size = self.size,
            "Loaded page"
        );

        if report.accepted > 0 {
            self.view.reserve(self.size);
        }
        let thumbnails = self.images.iter().map(|i| i.thumbnail().clone()).collect();
        self.prefetcher.restart(thumbnails, transport, self.token.clone());

        if was_empty {
            self.index = 0;
            self.set_current(0, false, true);
        } else {
            self.notify_current();
        }
        Ok(report)
    }

    /// Moves the cursor. Returns whether anything changed.
    ///
    /// `from_view` is set when the view itself initiated the change, in which case it is
    /// not told to select the index again.
    pub fn set_current(&mut self, index: usize, from_view: bool, force: bool) -> bool {
        if index >= self.images.len() {
            warn!(index, len = self.images.len(), "Ignoring out of range selection");
            return false;
        }
        if index == self.index && !force {
            return false;
        }

        self.index = index;
        self.notify_current();
        self.prewarm_neighbors();
        if !from_view {
            self.view.set_selected(index);
        }
        true
    }

    /// Cancels background work, drops every record and releases the session directory.
    pub fn clear(&mut self) {
        self.token.cancel();
        for image in &self.images {
            image.cancel_thumbnail_download();
        }
        self.prefetcher.cancel();
        self.token = CancellationToken::new();

        if let Some(transport) = self.transport.take() {
            transport.shutdown();
        }

        self.images.clear();
        self.index = 0;
        self.view.clear();
        self.notify(ImageListEvent::Cleared);

        if let Some(path) = self.path.take() {
            if let Err(e) = self.temp_dir.remove_dir(&path) {
                warn!(path = %path.display(), "Failed to remove session directory: {}", e);
            }
        }

        self.size = 0;
        self.site = None;
        debug!("Image list cleared");
    }

    fn storage_root(&mut self) -> ImageListResult<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => {
                let path = self.temp_dir.make_dir()?;
                self.path = Some(path.clone());
                Ok(path)
            }
        }
    }

    fn transport(&mut self, site: &Site) -> ImageListResult<Arc<dyn Transport>> {
        match &self.transport {
            Some(transport) => Ok(transport.clone()),
            None => {
                let transport = (self.transport_factory)(site.max_connections())?;
                self.transport = Some(transport.clone());
                Ok(transport)
            }
        }
    }

    /// Reads ahead the current image and those within `cache_size` of it, nearest first.
    fn prewarm_neighbors(&self) {
        let radius = self.options.cache_size;
        let Some(transport) = &self.transport else {
            return;
        };
        if radius == 0 || self.images.is_empty() {
            return;
        }

        let mut targets: Vec<FetchTarget> = vec![self.images[self.index].image_target()];
        for distance in 1..=radius {
            if let Some(image) = self.images.get(self.index + distance) {
                targets.push(image.image_target());
            }
            if let Some(image) = self.index.checked_sub(distance).and_then(|i| self.images.get(i)) {
                targets.push(image.image_target());
            }
        }
        transport.prewarm(targets, self.token.clone());
    }

    fn notify_current(&mut self) {
        let Some(image) = self.images.get(self.index) else {
            return;
        };
        let event = ImageListEvent::CurrentChanged {
            index: self.index,
            post_id: image.id().to_string(),
            site: self.site.as_ref().map(|s| s.name().to_string()).unwrap_or_default(),
        };
        self.notify(event);
    }

    fn notify(&mut self, event: ImageListEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Drop for ImageList {
    fn drop(&mut self) {
        self.subscribers.clear();
        self.clear();
    }
}
