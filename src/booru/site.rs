use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::booru::tag::{Tag, TagType};

/// The API family a board speaks.
///
/// `Danbooru` and `Gelbooru` share the legacy attribute layout, `DanbooruV2` exposes
/// hyphenated value nodes, and `Moebooru` reports unix timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteType {
    Danbooru,
    DanbooruV2,
    Gelbooru,
    Moebooru,
}

impl SiteType {
    pub fn post_url(&self, base: &str, id: &str) -> String {
        match self {
            SiteType::Danbooru | SiteType::DanbooruV2 => format!("{}/posts/{}", base, id),
            SiteType::Gelbooru => format!("{}/index.php?page=post&s=view&id={}", base, id),
            SiteType::Moebooru => format!("{}/post/show/{}", base, id),
        }
    }

    pub fn notes_url(&self, base: &str, id: &str) -> String {
        match self {
            SiteType::Danbooru => format!("{}/notes.xml?post_id={}", base, id),
            SiteType::DanbooruV2 => format!("{}/notes.xml?search[post_id]={}", base, id),
            SiteType::Gelbooru => {
                format!("{}/index.php?page=dapi&s=note&q=index&post_id={}", base, id)
            }
            SiteType::Moebooru => format!("{}/note.xml?post_id={}", base, id),
        }
    }
}

impl fmt::Display for SiteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteType::Danbooru => write!(f, "danbooru"),
            SiteType::DanbooruV2 => write!(f, "danbooru_v2"),
            SiteType::Gelbooru => write!(f, "gelbooru"),
            SiteType::Moebooru => write!(f, "moebooru"),
        }
    }
}

/// Provider context for one board.
///
/// Shared between sessions behind an `Arc`; the tag registry is the only mutable part.
#[derive(Debug)]
pub struct Site {
    name: String,
    url: String,
    site_type: SiteType,
    use_samples: bool,
    max_connections: usize,
    tags: RwLock<BTreeMap<String, TagType>>,
}

impl Site {
    pub fn new(name: impl Into<String>, url: impl Into<String>, site_type: SiteType) -> Self {
        let url: String = url.into();
        Self {
            name: name.into(),
            url: url.trim_end_matches('/').to_string(),
            site_type,
            use_samples: false,
            max_connections: 8,
            tags: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_samples(mut self, use_samples: bool) -> Self {
        self.use_samples = use_samples;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base URL without a trailing slash.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn site_type(&self) -> SiteType {
        self.site_type
    }

    pub fn use_samples(&self) -> bool {
        self.use_samples
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn post_url(&self, id: &str) -> String {
        self.site_type.post_url(&self.url, id)
    }

    pub fn notes_url(&self, id: &str) -> String {
        self.site_type.notes_url(&self.url, id)
    }

    /// Registers tags seen in a page. A known category replaces an unknown one.
    pub fn add_tags(&self, tags: &[Tag]) {
        let mut registry = self.tags.write();
        for tag in tags {
            registry
                .entry(tag.name.clone())
                .and_modify(|existing| {
                    if *existing == TagType::Unknown {
                        *existing = tag.tag_type;
                    }
                })
                .or_insert(tag.tag_type);
        }
    }

    pub fn tags(&self) -> Vec<Tag> {
        self.tags
            .read()
            .iter()
            .map(|(name, tag_type)| Tag::new(name.clone(), *tag_type))
            .collect()
    }
}
