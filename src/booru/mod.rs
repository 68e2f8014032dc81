//! Image board records and the collection that manages them.

pub mod date;
pub mod document;
pub mod fetcher;
pub mod image;
pub mod image_list;
pub mod post;
pub mod prefetch;
pub mod site;
pub mod tag;
pub mod temp_dir;
pub mod view;

// Re-export commonly used types for convenience
pub use date::{DateFormat, DateWarning, DisplayZone};
pub use document::{DocumentError, DocumentResult, JsonDocument, PostDocument, PostNode};
pub use fetcher::{
    FetchError, FetchResult, HttpTransport, HttpTransportConfig, Transport, TransportFactory,
};
pub use image::{FetchState, FetchTarget, Image, PostInfo, Rating, ThumbnailDownload};
pub use image_list::{
    ImageList, ImageListError, ImageListEvent, ImageListOptions, ImageListResult, LoadReport,
};
pub use post::{DEFAULT_EXTENSIONS, Dialect, PostWarning};
pub use prefetch::{CancellationToken, PrefetchStats, Prefetcher};
pub use site::{Site, SiteType};
pub use tag::{Tag, TagType};
pub use temp_dir::{TempDir, TempDirError, TempDirResult};
pub use view::{ListView, NullView};
