//! Variable paths into value trees.
//!
//! Syntax: dot-separated field names, each with an optional `[n]` index,
//! e.g. `order.lines[2].sku`. A segment without an index addresses element 0.

use crate::value::Value;
use crate::vector::ValueVector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty path")]
    Empty,

    #[error("empty segment at position {position} in '{path}'")]
    EmptySegment { path: String, position: usize },

    #[error("invalid index in segment '{segment}'")]
    BadIndex { segment: String },

    #[error("invalid character '{ch}' in segment '{segment}'")]
    BadCharacter { segment: String, ch: char },
}

impl PathError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Empty => "PATH_EMPTY",
            Self::EmptySegment { .. } => "PATH_EMPTY_SEGMENT",
            Self::BadIndex { .. } => "PATH_BAD_INDEX",
            Self::BadCharacter { .. } => "PATH_BAD_CHARACTER",
        }
    }
}

/// Anything that can supply the root a path is evaluated against.
///
/// Links hold a scope rather than a tree so the root is looked up on every
/// access.
pub trait PathScope: Send + Sync {
    fn root(&self) -> Value;
}

impl PathScope for Value {
    fn root(&self) -> Value {
        self.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment {
    pub name: String,
    pub index: Option<usize>,
}

impl PathSegment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
        }
    }

    pub fn at(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index: Some(index),
        }
    }

    fn position(&self) -> usize {
        self.index.unwrap_or(0)
    }
}

/// A non-empty sequence of path segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VariablePath {
    segments: Vec<PathSegment>,
}

impl VariablePath {
    pub fn new(segments: Vec<PathSegment>) -> Result<Self, PathError> {
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Look the path up without creating anything. `None` when a field is
    /// missing or an index is past the end of its vector. Links are followed
    /// but their targets are never created.
    pub fn find_value(&self, root: &Value) -> Option<Value> {
        self.segments
            .iter()
            .try_fold(root.clone(), |node, segment| find_element(&node, segment))
    }

    /// The existing vector named by the last segment, with links resolved.
    /// Creates nothing; the last segment's index, if any, is ignored.
    pub fn find_vector(&self, root: &Value) -> Option<ValueVector> {
        let (last, parents) = self.segments.split_last()?;
        let parent = parents
            .iter()
            .try_fold(root.clone(), |node, segment| find_element(&node, segment))?;
        parent.find_children(&last.name)?.resolved()
    }

    /// The value at this path, creating intermediate nodes as needed.
    pub fn value_in(&self, root: &Value) -> Value {
        self.segments.iter().fold(root.clone(), |node, segment| {
            node.children(&segment.name).get(segment.position())
        })
    }

    /// The vector named by the last segment, creating intermediate nodes as
    /// needed. The last segment's index, if any, is ignored.
    pub fn vector_in(&self, root: &Value) -> ValueVector {
        let Some((last, parents)) = self.segments.split_last() else {
            return ValueVector::new();
        };
        let parent = parents.iter().fold(root.clone(), |node, segment| {
            node.children(&segment.name).get(segment.position())
        });
        parent.children(&last.name)
    }
}

fn find_element(node: &Value, segment: &PathSegment) -> Option<Value> {
    let vector = node.find_children(&segment.name)?.resolved()?;
    let position = segment.position();
    (position < vector.size()).then(|| vector.get(position))
}

fn parse_segment(raw: &str, path: &str, position: usize) -> Result<PathSegment, PathError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PathError::EmptySegment {
            path: path.to_string(),
            position,
        });
    }

    let (name, index) = match raw.find('[') {
        Some(open) => {
            let inner = raw[open + 1..]
                .strip_suffix(']')
                .ok_or_else(|| PathError::BadIndex {
                    segment: raw.to_string(),
                })?;
            let index = inner
                .trim()
                .parse::<usize>()
                .map_err(|_| PathError::BadIndex {
                    segment: raw.to_string(),
                })?;
            (&raw[..open], Some(index))
        }
        None => (raw, None),
    };

    if name.is_empty() {
        return Err(PathError::EmptySegment {
            path: path.to_string(),
            position,
        });
    }
    if let Some(ch) = name
        .chars()
        .find(|c| !(c.is_alphanumeric() || *c == '_' || *c == '-' || *c == '$'))
    {
        return Err(PathError::BadCharacter {
            segment: raw.to_string(),
            ch,
        });
    }

    Ok(PathSegment {
        name: name.to_string(),
        index,
    })
}

impl FromStr for VariablePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(PathError::Empty);
        }
        let segments = s
            .split('.')
            .enumerate()
            .map(|(position, raw)| parse_segment(raw, s, position))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(segments)
    }
}

impl TryFrom<String> for VariablePath {
    type Error = PathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<VariablePath> for String {
    fn from(path: VariablePath) -> Self {
        path.to_string()
    }
}

impl fmt::Display for VariablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(&segment.name)?;
            if let Some(index) = segment.index {
                write!(f, "[{index}]")?;
            }
        }
        Ok(())
    }
}
