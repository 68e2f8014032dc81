use std::fmt;

use serde::{Deserialize, Serialize};

/// Category a board assigns to a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagType {
    Artist,
    Character,
    Copyright,
    Metadata,
    General,
    Unknown,
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagType::Artist => write!(f, "artist"),
            TagType::Character => write!(f, "character"),
            TagType::Copyright => write!(f, "copyright"),
            TagType::Metadata => write!(f, "metadata"),
            TagType::General => write!(f, "general"),
            TagType::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub tag_type: TagType,
}

impl Tag {
    pub fn new(name: impl Into<String>, tag_type: TagType) -> Self {
        Self {
            name: name.into(),
            tag_type,
        }
    }

    /// A tag whose category is not known.
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::new(name, TagType::Unknown)
    }
}

/// Field names carrying pre-categorized tag strings on new-style boards.
pub(crate) const CATEGORIZED_TAG_FIELDS: [(TagType, &str); 5] = [
    (TagType::Artist, "tag-string-artist"),
    (TagType::Character, "tag-string-character"),
    (TagType::Copyright, "tag-string-copyright"),
    (TagType::Metadata, "tag-string-meta"),
    (TagType::General, "tag-string-general"),
];

/// Splits a space delimited tag string and assigns every token the same category.
pub fn classify_categorized(tag_string: &str, tag_type: TagType) -> impl Iterator<Item = Tag> + '_ {
    tag_string
        .split_whitespace()
        .map(move |name| Tag::new(name, tag_type))
}

/// Splits a flat tag string, recovering each category from the reference index.
///
/// The first entry in `reference` with a matching name wins. Tags missing from the
/// index, or every tag when the index is empty, come back as [`TagType::Unknown`].
pub fn classify_flat(tag_string: &str, reference: &[Tag]) -> Vec<Tag> {
    tag_string
        .split_whitespace()
        .map(|name| {
            let tag_type = reference
                .iter()
                .find(|tag| tag.name == name)
                .map_or(TagType::Unknown, |tag| tag.tag_type);
            Tag::new(name, tag_type)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorized_split() {
        let tags: Vec<Tag> =
            classify_categorized("  kantoku  ufotable ", TagType::Artist).collect();
        assert_eq!(tags.len(), 2);
        assert!(tags.iter().all(|t| t.tag_type == TagType::Artist));
        assert_eq!(tags[1].name, "ufotable");
    }

    #[test]
    fn test_flat_lookup_first_match_wins() {
        let reference = vec![
            Tag::new("saber", TagType::Character),
            Tag::new("saber", TagType::General),
            Tag::new("fate/stay_night", TagType::Copyright),
        ];

        let tags = classify_flat("saber fate/stay_night 1girl", &reference);
        assert_eq!(tags[0], Tag::new("saber", TagType::Character));
        assert_eq!(tags[1].tag_type, TagType::Copyright);
        assert_eq!(tags[2], Tag::unknown("1girl"));
    }

    #[test]
    fn test_flat_without_reference() {
        let tags = classify_flat("a b", &[]);
        assert_eq!(tags, vec![Tag::unknown("a"), Tag::unknown("b")]);
    }
}
