use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::booru::tag::Tag;

/// Content rating. Codes other than `s`, `q` and `e` are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rating {
    Safe,
    Questionable,
    Explicit,
    Other(String),
}

impl Rating {
    pub fn from_code(code: &str) -> Self {
        match code {
            "s" => Rating::Safe,
            "q" => Rating::Questionable,
            "e" => Rating::Explicit,
            other => Rating::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Rating::Safe => "Safe",
            Rating::Questionable => "Questionable",
            Rating::Explicit => "Explicit",
            Rating::Other(raw) => raw,
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display metadata of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostInfo {
    pub date: String,
    pub source: String,
    pub rating: Rating,
    pub score: String,
}

/// A remote URL paired with where it is materialized locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    pub url: String,
    pub path: PathBuf,
}

/// Progress of a thumbnail download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchState::Pending => write!(f, "pending"),
            FetchState::InProgress => write!(f, "in_progress"),
            FetchState::Completed => write!(f, "completed"),
            FetchState::Failed => write!(f, "failed"),
            FetchState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The thumbnail fetch sub-object of an [`Image`].
///
/// Shared with the prefetch worker and the transport; this is the only part of a record
/// that changes after construction.
#[derive(Debug)]
pub struct ThumbnailDownload {
    target: FetchTarget,
    state: Mutex<FetchState>,
    cancelled: AtomicBool,
}

impl ThumbnailDownload {
    pub fn new(url: String, path: PathBuf) -> Self {
        Self {
            target: FetchTarget { url, path },
            state: Mutex::new(FetchState::Pending),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn url(&self) -> &str {
        &self.target.url
    }

    pub fn path(&self) -> &Path {
        &self.target.path
    }

    pub fn target(&self) -> &FetchTarget {
        &self.target
    }

    pub fn state(&self) -> FetchState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: FetchState) {
        *self.state.lock() = state;
    }

    /// Moves `Pending` to `InProgress`. Returns false if someone else already claimed it.
    pub fn try_start(&self) -> bool {
        let mut state = self.state.lock();
        if *state == FetchState::Pending && !self.is_cancelled() {
            *state = FetchState::InProgress;
            true
        } else {
            false
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut state = self.state.lock();
        if matches!(*state, FetchState::Pending | FetchState::InProgress) {
            *state = FetchState::Cancelled;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// True once the thumbnail exists on disk.
    pub fn is_materialized(&self) -> bool {
        self.state() == FetchState::Completed || self.target.path.is_file()
    }
}

/// A canonical post.
#[derive(Debug)]
pub struct Image {
    id: String,
    image_url: String,
    image_path: PathBuf,
    post_url: String,
    tags: Vec<Tag>,
    info: PostInfo,
    notes_url: Option<String>,
    thumbnail: Arc<ThumbnailDownload>,
}

/// Fields needed to build an [`Image`].
#[derive(Debug, Clone)]
pub struct ImageParts {
    pub id: String,
    pub image_url: String,
    pub image_path: PathBuf,
    pub thumb_url: String,
    pub thumb_path: PathBuf,
    pub post_url: String,
    pub tags: Vec<Tag>,
    pub info: PostInfo,
    pub notes_url: Option<String>,
}

impl From<ImageParts> for Image {
    fn from(parts: ImageParts) -> Self {
        Image {
            id: parts.id,
            image_url: parts.image_url,
            image_path: parts.image_path,
            post_url: parts.post_url,
            tags: parts.tags,
            info: parts.info,
            notes_url: parts.notes_url,
            thumbnail: Arc::new(ThumbnailDownload::new(parts.thumb_url, parts.thumb_path)),
        }
    }
}

impl Image {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn image_url(&self) -> &str {
        &self.image_url
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub fn thumb_url(&self) -> &str {
        self.thumbnail.url()
    }

    pub fn thumb_path(&self) -> &Path {
        self.thumbnail.path()
    }

    pub fn post_url(&self) -> &str {
        &self.post_url
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn info(&self) -> &PostInfo {
        &self.info
    }

    pub fn notes_url(&self) -> Option<&str> {
        self.notes_url.as_deref()
    }

    pub fn has_notes(&self) -> bool {
        self.notes_url.is_some()
    }

    pub fn thumbnail(&self) -> &Arc<ThumbnailDownload> {
        &self.thumbnail
    }

    pub fn image_target(&self) -> FetchTarget {
        FetchTarget {
            url: self.image_url.clone(),
            path: self.image_path.clone(),
        }
    }

    pub fn cancel_thumbnail_download(&self) {
        self.thumbnail.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_codes() {
        assert_eq!(Rating::from_code("s").as_str(), "Safe");
        assert_eq!(Rating::from_code("q").as_str(), "Questionable");
        assert_eq!(Rating::from_code("e").as_str(), "Explicit");
        assert_eq!(Rating::from_code("x"), Rating::Other("x".to_string()));
        assert_eq!(Rating::from_code("x").to_string(), "x");
    }

    #[test]
    fn test_thumbnail_claim_and_cancel() {
        let thumb =
            ThumbnailDownload::new("https://x/t.jpg".into(), PathBuf::from("/nonexistent/t.jpg"));
        assert!(thumb.try_start());
        assert!(!thumb.try_start());
        assert_eq!(thumb.state(), FetchState::InProgress);

        thumb.cancel();
        assert!(thumb.is_cancelled());
        assert_eq!(thumb.state(), FetchState::Cancelled);
        assert!(!thumb.is_materialized());
    }

    #[test]
    fn test_cancel_keeps_completed_state() {
        let thumb = ThumbnailDownload::new("u".into(), PathBuf::from("p"));
        thumb.set_state(FetchState::Completed);
        thumb.cancel();
        assert_eq!(thumb.state(), FetchState::Completed);
        assert!(thumb.is_materialized());
    }
}
