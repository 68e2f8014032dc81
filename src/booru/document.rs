//! Access to an already parsed board response.
//!
//! Boards either expose post fields as child value nodes (`<preview-file-url>…`) or as
//! attributes on the post element (`preview_url="…"`). [`PostNode`] offers both styles
//! and the normalizer picks the one matching the board's dialect.

use std::borrow::Cow;
use std::fs;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected document layout: {0}")]
    Layout(String),
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// One raw post record.
pub trait PostNode {
    /// Text of a child value node.
    fn value(&self, name: &str) -> Option<Cow<'_, str>>;

    /// An attribute of the post element.
    fn attribute(&self, name: &str) -> Option<Cow<'_, str>>;
}

/// A page of raw posts.
pub trait PostDocument {
    /// Total number of posts matching the query, when the board reports it.
    fn count(&self) -> Option<usize>;

    fn posts(&self) -> Vec<&dyn PostNode>;
}

/// A post backed by a JSON object.
#[derive(Debug, Clone)]
pub struct JsonPost(Value);

impl JsonPost {
    fn lookup(&self, name: &str) -> Option<Cow<'_, str>> {
        let object = self.0.as_object()?;
        let value = object
            .get(name)
            .or_else(|| object.get(&name.replace('-', "_")))?;
        scalar_to_str(value)
    }
}

fn scalar_to_str(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        Value::Null => None,
        _ => None,
    }
}

impl PostNode for JsonPost {
    fn value(&self, name: &str) -> Option<Cow<'_, str>> {
        self.lookup(name)
    }

    fn attribute(&self, name: &str) -> Option<Cow<'_, str>> {
        self.lookup(name)
    }
}

/// A [`PostDocument`] over a `serde_json` tree.
///
/// Accepts a bare array of posts, or an object carrying the posts under `posts` or
/// `post` and the total under `count` or `@attributes.count`.
#[derive(Debug, Clone, Default)]
pub struct JsonDocument {
    count: Option<usize>,
    posts: Vec<JsonPost>,
}

impl JsonDocument {
    pub fn from_value(value: Value) -> DocumentResult<Self> {
        match value {
            Value::Array(posts) => Ok(Self {
                count: None,
                posts: posts.into_iter().map(JsonPost).collect(),
            }),
            Value::Object(mut object) => {
                let count = object
                    .get("count")
                    .or_else(|| object.get("@attributes").and_then(|a| a.get("count")))
                    .and_then(|c| match c {
                        Value::Number(n) => n.as_u64().map(|n| n as usize),
                        Value::String(s) => s.trim().parse().ok(),
                        _ => None,
                    });

                let posts = match object.remove("posts").or_else(|| object.remove("post")) {
                    Some(Value::Array(posts)) => posts,
                    // Single result pages collapse the array on some boards
                    Some(post @ Value::Object(_)) => vec![post],
                    Some(other) => {
                        return Err(DocumentError::Layout(format!(
                            "expected posts to be an array, found {}",
                            other
                        )));
                    }
                    None => Vec::new(),
                };

                Ok(Self {
                    count,
                    posts: posts.into_iter().map(JsonPost).collect(),
                })
            }
            other => Err(DocumentError::Layout(format!(
                "expected an array or object, found {}",
                other
            ))),
        }
    }

    pub fn parse(content: &str) -> DocumentResult<Self> {
        Self::from_value(serde_json::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> DocumentResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}

impl PostDocument for JsonDocument {
    fn count(&self) -> Option<usize> {
        self.count
    }

    fn posts(&self) -> Vec<&dyn PostNode> {
        self.posts.iter().map(|p| p as &dyn PostNode).collect()
    }
}
