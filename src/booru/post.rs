//! Normalization of raw board posts into [`ImageParts`].
//!
//! Normalizing happens in two steps so the cheap extension check runs before any tag
//! or date work: [`RawPost::extract`] pulls the dialect's fields out of the node, then
//! [`RawPost::into_parts`] builds the canonical record for accepted posts.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::booru::date::{normalize_date, DateFormat, DateWarning, DisplayZone};
use crate::booru::document::PostNode;
use crate::booru::image::{ImageParts, PostInfo, Rating};
use crate::booru::site::{Site, SiteType};
use crate::booru::tag::{classify_categorized, classify_flat, Tag, CATEGORIZED_TAG_FIELDS};

/// Extensions accepted when no list is configured.
pub const DEFAULT_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Directory below the session root holding thumbnails.
pub const THUMBNAIL_DIR: &str = "thumbnails";

/// Host that advertises thumbnails with the original's extension but always serves jpg.
const JPEG_THUMBNAIL_HOST: &str = "safebooru.org";

/// Response layout families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Hyphenated value nodes with pre-categorized tags.
    New,
    /// Attributes with a `has_notes` flag.
    Legacy,
    /// Attributes with a `last_noted_at` timestamp.
    Moe,
}

impl From<SiteType> for Dialect {
    fn from(site_type: SiteType) -> Self {
        match site_type {
            SiteType::DanbooruV2 => Dialect::New,
            SiteType::Danbooru | SiteType::Gelbooru => Dialect::Legacy,
            SiteType::Moebooru => Dialect::Moe,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldAccess {
    Value,
    Attribute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotesField {
    /// Equal to `"true"` when the post has notes.
    Flag(&'static str),
    /// A last-noted timestamp, empty or `"0"` when there are none.
    Timestamp(&'static str),
}

/// Where a dialect keeps each canonical field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldTable {
    access: FieldAccess,
    id: &'static str,
    thumb_url: &'static str,
    file_url: &'static str,
    sample_url: &'static str,
    date: &'static str,
    source: &'static str,
    rating: &'static str,
    score: &'static str,
    tags: &'static str,
    notes: NotesField,
}

const NEW_FIELDS: FieldTable = FieldTable {
    access: FieldAccess::Value,
    id: "id",
    thumb_url: "preview-file-url",
    file_url: "file-url",
    sample_url: "large-file-url",
    date: "created-at",
    source: "source",
    rating: "rating",
    score: "score",
    tags: "tag-string",
    notes: NotesField::Timestamp("last-noted-at"),
};

const LEGACY_FIELDS: FieldTable = FieldTable {
    access: FieldAccess::Attribute,
    id: "id",
    thumb_url: "preview_url",
    file_url: "file_url",
    sample_url: "sample_url",
    date: "created_at",
    source: "source",
    rating: "rating",
    score: "score",
    tags: "tags",
    notes: NotesField::Flag("has_notes"),
};

const MOE_FIELDS: FieldTable = FieldTable {
    notes: NotesField::Timestamp("last_noted_at"),
    ..LEGACY_FIELDS
};

impl Dialect {
    pub fn fields(&self) -> &'static FieldTable {
        match self {
            Dialect::New => &NEW_FIELDS,
            Dialect::Legacy => &LEGACY_FIELDS,
            Dialect::Moe => &MOE_FIELDS,
        }
    }
}

impl FieldTable {
    fn get<'n>(&self, node: &'n dyn PostNode, name: &str) -> Cow<'n, str> {
        let value = match self.access {
            FieldAccess::Value => node.value(name),
            FieldAccess::Attribute => node.attribute(name),
        };
        value.unwrap_or(Cow::Borrowed(""))
    }

    fn has_notes(&self, node: &dyn PostNode) -> bool {
        match self.notes {
            NotesField::Flag(name) => self.get(node, name) == "true",
            NotesField::Timestamp(name) => {
                let value = self.get(node, name);
                let value = value.trim();
                !value.is_empty() && value != "0"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostWarning {
    #[error("post {post_id}: {warning}")]
    Date {
        post_id: String,
        #[source]
        warning: DateWarning,
    },

    #[error("post {post_id}: missing field '{field}'")]
    MissingField { post_id: String, field: &'static str },
}

/// Inputs shared by every post of a page.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    pub site: &'a Site,
    pub storage_root: &'a Path,
    pub zone: &'a DisplayZone,
    /// Categorized tags from a sibling tag query, used to classify flat tag strings.
    pub posts_tags: &'a [Tag],
}

/// Fields read from a post before the extension check.
pub struct RawPost<'n> {
    node: &'n dyn PostNode,
    dialect: Dialect,
    id: Cow<'n, str>,
    thumb_url: Cow<'n, str>,
    image_url: Cow<'n, str>,
}

impl<'n> RawPost<'n> {
    pub fn extract(node: &'n dyn PostNode, dialect: Dialect, use_samples: bool) -> Self {
        let fields = dialect.fields();
        let image_field = if use_samples { fields.sample_url } else { fields.file_url };
        Self {
            node,
            dialect,
            id: fields.get(node, fields.id),
            thumb_url: fields.get(node, fields.thumb_url),
            image_url: fields.get(node, image_field),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn image_url(&self) -> &str {
        &self.image_url
    }

    /// Whether the image URL's extension is in `extensions` (case insensitive).
    pub fn has_supported_extension<S: AsRef<str>>(&self, extensions: &[S]) -> bool {
        match file_extension(&self.image_url) {
            Some(ext) => extensions.iter().any(|e| e.as_ref().eq_ignore_ascii_case(&ext)),
            None => false,
        }
    }

    /// Builds the canonical record. Never fails; degraded fields are reported as warnings.
    pub fn into_parts(self, ctx: &NormalizeContext<'_>) -> (ImageParts, Vec<PostWarning>) {
        let fields = self.dialect.fields();
        let node = self.node;
        let id = self.id.into_owned();
        let mut warnings = Vec::new();

        if id.is_empty() {
            warnings.push(PostWarning::MissingField { post_id: id.clone(), field: fields.id });
        }
        if self.thumb_url.is_empty() {
            warnings.push(PostWarning::MissingField {
                post_id: id.clone(),
                field: fields.thumb_url,
            });
        }

        let tags: Vec<Tag> = match self.dialect {
            Dialect::New => CATEGORIZED_TAG_FIELDS
                .iter()
                .flat_map(|(tag_type, field)| {
                    let tag_string = fields.get(node, field).into_owned();
                    classify_categorized(&tag_string, *tag_type).collect::<Vec<_>>()
                })
                .collect(),
            Dialect::Legacy | Dialect::Moe => {
                classify_flat(&fields.get(node, fields.tags), ctx.posts_tags)
            }
        };

        // Local names come from the URLs as the board reported them
        let thumb_path = ctx
            .storage_root
            .join(THUMBNAIL_DIR)
            .join(local_file_name(&self.thumb_url, &id, "thumb"));
        let image_path = ctx.storage_root.join(local_file_name(&self.image_url, &id, "image"));

        let base_url = ctx.site.url();
        let image_url = normalize_url(&self.image_url, base_url);
        let mut thumb_url = normalize_url(&self.thumb_url, base_url);
        if thumb_url.contains(JPEG_THUMBNAIL_HOST) {
            thumb_url = replace_extension(&thumb_url, "jpg");
        }

        let notes_url = fields.has_notes(node).then(|| ctx.site.notes_url(&id));

        let date = normalize_date(
            &fields.get(node, fields.date),
            DateFormat::from(ctx.site.site_type()),
            ctx.zone,
        );
        for warning in date.warnings {
            warn!(site = ctx.site.name(), post_id = %id, "{}", warning);
            warnings.push(PostWarning::Date {
                post_id: id.clone(),
                warning,
            });
        }

        let info = PostInfo {
            date: date.display,
            source: fields.get(node, fields.source).into_owned(),
            rating: Rating::from_code(&fields.get(node, fields.rating)),
            score: fields.get(node, fields.score).into_owned(),
        };

        debug!(site = ctx.site.name(), post_id = %id, tags = tags.len(), "Normalized post");

        let parts = ImageParts {
            post_url: ctx.site.post_url(&id),
            id,
            image_url,
            image_path,
            thumb_url,
            thumb_path,
            tags,
            info,
            notes_url,
        };
        (parts, warnings)
    }
}

/// Completes protocol-relative URLs and resolves root-relative ones against `base`.
pub fn normalize_url(url: &str, base: &str) -> String {
    if url.starts_with("//") {
        format!("https:{}", url)
    } else if url.starts_with('/') {
        format!("{}{}", base.trim_end_matches('/'), url)
    } else {
        url.to_string()
    }
}

/// Splits off a query string or fragment.
fn split_query(url: &str) -> (&str, &str) {
    match url.find(['?', '#']) {
        Some(idx) => url.split_at(idx),
        None => (url, ""),
    }
}

fn basename(url: &str) -> &str {
    let (path, _) = split_query(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// Lowercased extension of the URL's last path segment.
pub fn file_extension(url: &str) -> Option<String> {
    let name = basename(url);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Swaps the extension of the URL's last path segment, keeping any query string.
pub fn replace_extension(url: &str, extension: &str) -> String {
    let (path, query) = split_query(url);
    let name_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[name_start..].rfind('.') {
        Some(dot) => format!("{}.{}{}", &path[..name_start + dot], extension, query),
        None => url.to_string(),
    }
}

/// Decodes `%XX` escapes. Malformed escapes are kept literally.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = hex::decode(&bytes[i + 1..i + 3]) {
                decoded.push(byte[0]);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn local_file_name(url: &str, id: &str, fallback_suffix: &str) -> PathBuf {
    let name = percent_decode(basename(url));
    // Decoded names must stay inside the session directory
    let name = name.replace(['/', '\\'], "_");
    if name.is_empty() || name == "." || name == ".." {
        PathBuf::from(format!("{}_{}", id, fallback_suffix))
    } else {
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booru::document::{JsonDocument, PostDocument};
    use crate::booru::tag::TagType;
    use serde_json::json;

    fn normalize_first(
        doc: &JsonDocument,
        site: &Site,
        posts_tags: &[Tag],
    ) -> (ImageParts, Vec<PostWarning>) {
        let root = PathBuf::from("/tmp/session");
        let zone = DisplayZone::Utc;
        let ctx = NormalizeContext {
            site,
            storage_root: &root,
            zone: &zone,
            posts_tags,
        };
        let posts = doc.posts();
        let raw = RawPost::extract(posts[0], site.site_type().into(), site.use_samples());
        assert!(raw.has_supported_extension(&DEFAULT_EXTENSIONS[..]));
        raw.into_parts(&ctx)
    }

    #[test]
    fn test_url_normalization() {
        assert_eq!(normalize_url("//x/y", "https://site"), "https://x/y");
        assert_eq!(normalize_url("/x/y", "https://site"), "https://site/x/y");
        assert_eq!(normalize_url("https://x/y", "https://site"), "https://x/y");
    }

    #[test]
    fn test_extension_helpers() {
        assert_eq!(file_extension("https://x/a/b.PNG?123").as_deref(), Some("png"));
        assert_eq!(file_extension("https://x/a/noext"), None);
        assert_eq!(
            replace_extension("https://safebooru.org/thumbnails/1/abc.png?55", "jpg"),
            "https://safebooru.org/thumbnails/1/abc.jpg?55"
        );
        assert_eq!(percent_decode("a%20b%zz%2"), "a b%zz%2");
    }

    #[test]
    fn test_equivalent_posts_across_dialects() {
        let v2 = JsonDocument::from_value(json!([{
            "id": 100, "preview-file-url": "https://cdn/p/abc.jpg", "file-url": "https://cdn/abc.png",
            "created-at": "1970-01-01T00:00:00.000+00:00", "source": "pixiv", "rating": "q", "score": 7,
            "tag-string-artist": "someone", "tag-string-general": "1girl solo"
        }])).unwrap();
        let legacy = JsonDocument::from_value(json!([{
            "id": "100", "preview_url": "https://cdn/p/abc.jpg", "file_url": "https://cdn/abc.png",
            "created_at": "Thu Jan 01 00:00:00 +0000 1970", "source": "pixiv", "rating": "q", "score": "7",
            "tags": "someone 1girl solo"
        }])).unwrap();
        let moe = JsonDocument::from_value(json!([{
            "id": 100, "preview_url": "https://cdn/p/abc.jpg", "file_url": "https://cdn/abc.png",
            "created_at": 0, "source": "pixiv", "rating": "q", "score": 7,
            "tags": "someone 1girl solo", "last_noted_at": 0
        }])).unwrap();

        let sites = [
            (Site::new("d", "https://d", SiteType::DanbooruV2), &v2),
            (Site::new("g", "https://g", SiteType::Gelbooru), &legacy),
            (Site::new("m", "https://m", SiteType::Moebooru), &moe),
        ];

        for (site, doc) in sites.iter() {
            let (parts, warnings) = normalize_first(doc, site, &[]);
            assert!(warnings.is_empty(), "{:?}", warnings);
            assert_eq!(parts.id, "100");
            assert_eq!(parts.info.rating, Rating::Questionable);
            assert_eq!(parts.info.score, "7");
            assert_eq!(parts.info.source, "pixiv");
            assert_eq!(parts.info.date, "01/01/70 00:00:00");
            assert_eq!(parts.image_path, PathBuf::from("/tmp/session/abc.png"));
            assert_eq!(parts.thumb_path, PathBuf::from("/tmp/session/thumbnails/abc.jpg"));
            assert_eq!(parts.tags.len(), 3);
            assert!(parts.notes_url.is_none());
        }
    }

    #[test]
    fn test_new_dialect_categorized_tags_and_samples() {
        let doc = JsonDocument::from_value(json!([{
            "id": 1, "preview-file-url": "/data/preview/a.jpg", "file-url": "/data/a.gif",
            "large-file-url": "/data/sample/a.jpg", "created-at": "2020-01-01T00:00:00+00:00",
            "tag-string-artist": "art", "tag-string-character": "chr", "tag-string-copyright": "cpy",
            "tag-string-meta": "highres", "tag-string-general": "gen", "last-noted-at": "2020-02-02"
        }])).unwrap();
        let site = Site::new("Danbooru", "https://danbooru.donmai.us", SiteType::DanbooruV2)
            .with_samples(true);

        let (parts, _) = normalize_first(&doc, &site, &[]);
        assert_eq!(parts.image_url, "https://danbooru.donmai.us/data/sample/a.jpg");
        assert_eq!(parts.thumb_url, "https://danbooru.donmai.us/data/preview/a.jpg");
        let types: Vec<TagType> = parts.tags.iter().map(|t| t.tag_type).collect();
        assert_eq!(
            types,
            vec![
                TagType::Artist,
                TagType::Character,
                TagType::Copyright,
                TagType::Metadata,
                TagType::General
            ]
        );
        assert_eq!(
            parts.notes_url.as_deref(),
            Some("https://danbooru.donmai.us/notes.xml?search[post_id]=1")
        );
    }

    #[test]
    fn test_flat_tags_use_reference_index() {
        let doc = JsonDocument::from_value(json!([{
            "id": 9, "preview_url": "//img.gelbooru.com/thumbs/t.jpg", "file_url": "//img.gelbooru.com/i.jpg",
            "created_at": "Thu Jan 01 00:00:00 +0000 1970", "tags": "artist_a misc", "has_notes": "true"
        }])).unwrap();
        let site = Site::new("Gelbooru", "https://gelbooru.com", SiteType::Gelbooru);
        let reference = vec![Tag::new("artist_a", TagType::Artist)];

        let (parts, _) = normalize_first(&doc, &site, &reference);
        assert_eq!(parts.tags, vec![Tag::new("artist_a", TagType::Artist), Tag::unknown("misc")]);
        assert_eq!(parts.thumb_url, "https://img.gelbooru.com/thumbs/t.jpg");
        assert!(parts.notes_url.is_some());
    }

    #[test]
    fn test_moebooru_noted_post_links_notes() {
        let doc = JsonDocument::from_value(json!([
            {
                "id": 21, "preview_url": "https://m/p/a.jpg", "file_url": "https://m/i/a.png",
                "created_at": 1554222896, "tags": "solo", "last_noted_at": 1554222896
            },
            {
                "id": 22, "preview_url": "https://m/p/b.jpg", "file_url": "https://m/i/b.png",
                "created_at": 1554222896, "tags": "solo", "last_noted_at": "1554222900"
            }
        ]))
        .unwrap();
        let site = Site::new("Konachan", "https://m", SiteType::Moebooru);
        let root = PathBuf::from("/tmp/session");
        let zone = DisplayZone::Utc;
        let ctx = NormalizeContext {
            site: &site,
            storage_root: &root,
            zone: &zone,
            posts_tags: &[],
        };

        let notes: Vec<Option<String>> = doc
            .posts()
            .into_iter()
            .map(|node| RawPost::extract(node, Dialect::Moe, false).into_parts(&ctx).0.notes_url)
            .collect();
        assert_eq!(
            notes,
            vec![
                Some("https://m/note.xml?post_id=21".to_string()),
                Some("https://m/note.xml?post_id=22".to_string()),
            ]
        );
    }

    #[test]
    fn test_safebooru_thumbnail_correction() {
        let doc = JsonDocument::from_value(json!([{
            "id": 3, "preview_url": "https://safebooru.org/thumbnails/12/thumbnail_abc.png",
            "file_url": "https://safebooru.org/images/12/abc.png", "created_at": "Thu Jan 01 00:00:00 +0000 1970"
        }])).unwrap();
        let safebooru = Site::new("Safebooru", "https://safebooru.org", SiteType::Gelbooru);
        let (parts, _) = normalize_first(&doc, &safebooru, &[]);
        assert!(parts.thumb_url.ends_with("thumbnail_abc.jpg"));
        assert!(parts.image_url.ends_with("abc.png"));

        let other = JsonDocument::from_value(json!([{
            "id": 3, "preview_url": "https://example.net/thumbnails/abc.png",
            "file_url": "https://example.net/images/abc.png", "created_at": "Thu Jan 01 00:00:00 +0000 1970"
        }])).unwrap();
        let site = Site::new("Other", "https://example.net", SiteType::Gelbooru);
        let (parts, _) = normalize_first(&other, &site, &[]);
        assert!(parts.thumb_url.ends_with("abc.png"));
    }

    #[test]
    fn test_malformed_date_keeps_other_fields() {
        let doc = JsonDocument::from_value(json!([{
            "id": 4, "preview-file-url": "https://c/p.jpg", "file-url": "https://c/f.jpg",
            "created-at": "not-a-date", "rating": "x", "score": 1
        }])).unwrap();
        let site = Site::new("d", "https://d", SiteType::DanbooruV2);

        let (parts, warnings) = normalize_first(&doc, &site, &[]);
        assert_eq!(parts.id, "4");
        assert_eq!(parts.info.date, "not-a-date");
        assert_eq!(parts.info.rating.as_str(), "x");
        assert!(matches!(warnings[0], PostWarning::Date { .. }));
    }

    #[test]
    fn test_local_names_are_decoded() {
        let doc = JsonDocument::from_value(json!([{
            "id": 5, "preview_url": "https://c/t/a%20b.jpg", "file_url": "https://c/i/a%20b.jpg?x=1",
            "created_at": "Thu Jan 01 00:00:00 +0000 1970"
        }])).unwrap();
        let site = Site::new("g", "https://c", SiteType::Gelbooru);
        let (parts, _) = normalize_first(&doc, &site, &[]);
        assert_eq!(parts.image_path, PathBuf::from("/tmp/session/a b.jpg"));
        assert_eq!(parts.thumb_path, PathBuf::from("/tmp/session/thumbnails/a b.jpg"));
    }
}
