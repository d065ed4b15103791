//! Single delta operations

use super::attributes::Attributes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload of an insert: text or one opaque embed token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Content {
    Text(String),
    /// Image reference, placeholder id, ... (length 1)
    Embed(Value),
}

impl Content {
    /// Length in document units (chars for text, 1 for an embed)
    pub fn len(&self) -> usize {
        match self {
            Content::Text(text) => text.chars().count(),
            Content::Embed(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(text) => text.is_empty(),
            Content::Embed(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            Content::Embed(_) => None,
        }
    }

    /// Sub-range of the content, `start` and `len` in document units
    pub(crate) fn slice(&self, start: usize, len: usize) -> Content {
        match self {
            Content::Text(text) => Content::Text(slice_chars(text, start, len).to_string()),
            Content::Embed(value) => Content::Embed(value.clone()),
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

/// Discriminant of an [`Op`], used when peeking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Retain,
    Insert,
    Delete,
}

/// One step of a delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Retain {
        len: usize,
        #[serde(default, skip_serializing_if = "Attributes::is_empty")]
        attributes: Attributes,
    },
    Insert {
        content: Content,
        #[serde(default, skip_serializing_if = "Attributes::is_empty")]
        attributes: Attributes,
    },
    Delete(usize),
}

impl Op {
    pub fn retain(len: usize) -> Self {
        Op::Retain {
            len,
            attributes: Attributes::new(),
        }
    }

    pub fn insert(content: impl Into<Content>) -> Self {
        Op::Insert {
            content: content.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Op::Retain { .. } => OpKind::Retain,
            Op::Insert { .. } => OpKind::Insert,
            Op::Delete(_) => OpKind::Delete,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Op::Retain { len, .. } => *len,
            Op::Insert { content, .. } => content.len(),
            Op::Delete(len) => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Op::Insert { content, .. } => content.is_empty(),
            _ => self.len() == 0,
        }
    }

    /// Attributes of a retain or insert (deletes have none)
    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            Op::Retain { attributes, .. } | Op::Insert { attributes, .. } => Some(attributes),
            Op::Delete(_) => None,
        }
    }

    /// Part of this op starting `offset` units in, at most `len` units long
    pub(crate) fn slice(&self, offset: usize, len: usize) -> Op {
        let len = len.min(self.len() - offset);
        match self {
            Op::Retain { attributes, .. } => Op::Retain {
                len,
                attributes: attributes.clone(),
            },
            Op::Insert {
                content,
                attributes,
            } => Op::Insert {
                content: content.slice(offset, len),
                attributes: attributes.clone(),
            },
            Op::Delete(_) => Op::Delete(len),
        }
    }
}

/// Slice a string by char offsets
pub(crate) fn slice_chars(text: &str, start: usize, len: usize) -> &str {
    let mut indices = text.char_indices().map(|(i, _)| i).chain(Some(text.len()));
    let begin = indices.nth(start).unwrap_or(text.len());
    let end = if len == 0 {
        begin
    } else {
        indices.nth(len - 1).unwrap_or(text.len())
    };
    &text[begin..end]
}
