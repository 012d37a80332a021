//! Dotted-path addressing inside nested row values.
//!
//! A field such as `metadata.contacts[0].email` names the physical column
//! `metadata` and a location inside its JSON value. Paths are parsed once
//! when a table plan is compiled; reading and writing never fail; missing
//! structure reads as absent and is created on write.

use std::fmt;

use serde_json::{Map, Value};

use crate::Result;
use crate::error::PgCloakError;

/// One row of a table: column name to value.
pub type Row = Map<String, Value>;

/// Largest array index a path may address. Writes pad sequences up to the
/// index, so this also caps the padding a single row can allocate.
pub const MAX_PATH_INDEX: usize = 10_000;

/// A single step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object member lookup.
    Key(String),
    /// Element `index` of the sequence stored under `key`.
    Index { key: String, index: usize },
}

impl PathSegment {
    /// The object key this segment reads, ignoring any index.
    pub fn key(&self) -> &str {
        match self {
            Self::Key(key) | Self::Index { key, .. } => key,
        }
    }

    fn parse(raw: &str, path: &str) -> Result<Self> {
        let bad = |reason: &str| {
            PgCloakError::bad_schema(format!("invalid field path '{}': {}", path, reason))
        };

        let Some(open) = raw.find('[') else {
            if raw.is_empty() {
                return Err(bad("empty segment"));
            }
            if raw.contains(']') {
                return Err(bad("unbalanced ']'"));
            }
            return Ok(Self::Key(raw.to_string()));
        };

        let key = &raw[..open];
        let rest = &raw[open..];
        if key.is_empty() {
            return Err(bad("array index without a key"));
        }
        let Some(digits) = rest
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
        else {
            return Err(bad("array index must close the segment"));
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad("array index must be a non-negative integer"));
        }
        let index = digits
            .parse::<usize>()
            .ok()
            .filter(|&index| index <= MAX_PATH_INDEX)
            .ok_or_else(|| {
                bad(&format!("array index must not exceed {}", MAX_PATH_INDEX))
            })?;

        Ok(Self::Index {
            key: key.to_string(),
            index,
        })
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index { key, index } => write!(f, "{}[{}]", key, index),
        }
    }
}

/// A parsed dotted path such as `metadata.contact.email`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl FieldPath {
    /// Parses a dotted path with optional `[n]` index suffixes.
    ///
    /// # Errors
    /// Returns `BadSchemaFormat` for empty segments or malformed indices.
    ///
    /// # Example
    /// ```rust
    /// use pgcloak_core::path::FieldPath;
    ///
    /// let path = FieldPath::parse("metadata.contacts[1].email")?;
    /// assert_eq!(path.root(), "metadata");
    /// assert!(path.is_nested());
    /// # Ok::<(), pgcloak_core::PgCloakError>(())
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(PgCloakError::bad_schema("field path must not be empty"));
        }
        let segments = raw
            .split('.')
            .map(|segment| PathSegment::parse(segment, raw))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The path exactly as written in the schema.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed segments, root first.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// The physical column this path lives in.
    pub fn root(&self) -> &str {
        self.segments.first().map_or("", PathSegment::key)
    }

    /// True when the path addresses something inside the root column.
    pub fn is_nested(&self) -> bool {
        self.segments.len() > 1
            || matches!(self.segments.first(), Some(PathSegment::Index { .. }))
    }

    /// Reads the value at this path. Absent structure yields `None`.
    pub fn get<'a>(&self, row: &'a Row) -> Option<&'a Value> {
        let (first, rest) = self.segments.split_first()?;
        let mut current = read_segment(row, first)?;
        for segment in rest {
            current = read_segment(current.as_object()?, segment)?;
        }
        Some(current)
    }

    /// Writes `value` at this path, creating containers along the way.
    ///
    /// Intermediate values that are not containers of the needed kind are
    /// replaced by empty ones.
    pub fn set(&self, row: &mut Row, value: Value) {
        let Some((last, parents)) = self.segments.split_last() else {
            return;
        };

        let mut current = row;
        for segment in parents {
            let Some(slot) = write_slot(current, segment) else {
                return;
            };
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Some(next) = slot.as_object_mut() else {
                return;
            };
            current = next;
        }

        if let Some(slot) = write_slot(current, last) {
            *slot = value;
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn read_segment<'a>(map: &'a Map<String, Value>, segment: &PathSegment) -> Option<&'a Value> {
    match segment {
        PathSegment::Key(key) => map.get(key),
        PathSegment::Index { key, index } => map.get(key)?.as_array()?.get(*index),
    }
}

fn write_slot<'a>(map: &'a mut Map<String, Value>, segment: &PathSegment) -> Option<&'a mut Value> {
    match segment {
        PathSegment::Key(key) => Some(map.entry(key.clone()).or_insert(Value::Null)),
        PathSegment::Index { key, index } => {
            let entry = map
                .entry(key.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !entry.is_array() {
                *entry = Value::Array(Vec::new());
            }
            let items = entry.as_array_mut()?;
            if items.len() <= *index {
                items.resize(index.saturating_add(1), Value::Object(Map::new()));
            }
            items.get_mut(*index)
        }
    }
}

/// Shape of a nested column, rebuilt from the dotted paths that touch it.
///
/// Leaves hold the original dotted path string so the materializer can
/// address the staged value; they never hold row data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathTree {
    /// Placeholder carrying the full dotted path of a transformed field.
    Leaf(String),
    /// Object members in first-seen order.
    Object(Vec<(String, PathTree)>),
    /// Sequence elements by index.
    Array(Vec<PathTree>),
}

impl PathTree {
    /// Builds one tree from a set of paths.
    ///
    /// Sequences are extended on demand and missing elements start out as
    /// empty objects. A path that is a prefix of another replaces the
    /// deeper structure, and vice versa: the later path wins.
    pub fn build<'a, I>(paths: I) -> Self
    where
        I: IntoIterator<Item = &'a FieldPath>,
    {
        let mut tree = Self::Object(Vec::new());
        for path in paths {
            tree.insert(path.segments(), path.as_str());
        }
        tree
    }

    /// Member `key` of an object node.
    pub fn member(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Object(members) => members.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    fn insert(&mut self, segments: &[PathSegment], leaf: &str) {
        let Some((segment, rest)) = segments.split_first() else {
            return;
        };

        if !matches!(self, Self::Object(_)) {
            *self = Self::Object(Vec::new());
        }
        let Self::Object(members) = self else {
            return;
        };
        let position = match members.iter().position(|(k, _)| k == segment.key()) {
            Some(position) => position,
            None => {
                members.push((segment.key().to_string(), Self::Object(Vec::new())));
                members.len().saturating_sub(1)
            }
        };
        let Some((_, child)) = members.get_mut(position) else {
            return;
        };

        let target = match segment {
            PathSegment::Key(_) => child,
            PathSegment::Index { index, .. } => {
                if !matches!(child, Self::Array(_)) {
                    *child = Self::Array(Vec::new());
                }
                let Self::Array(items) = child else {
                    return;
                };
                if items.len() <= *index {
                    items.resize(index.saturating_add(1), Self::Object(Vec::new()));
                }
                let Some(item) = items.get_mut(*index) else {
                    return;
                };
                item
            }
        };

        if rest.is_empty() {
            *target = Self::Leaf(leaf.to_string());
        } else {
            target.insert(rest, leaf);
        }
    }
}
