//! `format` templates applied to altered values.
//!
//! `{pga_value}` is replaced by the altered value, `{column}` by the current
//! value of any fetched column (already altered if an earlier field changed
//! it). `{{` and `}}` produce literal braces.

use serde_json::Value;

use crate::Result;
use crate::error::PgCloakError;
use crate::path::Row;

/// Placeholder for the altered value.
pub const VALUE_PLACEHOLDER: &str = "pga_value";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Value,
    Column(String),
}

/// A template column that is missing from the row.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("format references unknown column '{0}'")]
pub struct UnknownColumn(pub String);

/// A parsed `format` template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatTemplate {
    pieces: Vec<Piece>,
}

impl FormatTemplate {
    /// Parses a template.
    ///
    /// # Errors
    /// `BadSchemaFormat` for unbalanced braces or empty placeholders.
    pub fn parse(template: &str) -> Result<Self> {
        let bad = |reason: String| {
            PgCloakError::bad_schema(format!("invalid format '{}': {}", template, reason))
        };

        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(bad("nested '{'".to_string())),
                            other => name.push(other),
                        }
                    }
                    if !closed {
                        return Err(bad("unclosed '{'".to_string()));
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(bad("empty placeholder".to_string()));
                    }
                    if !literal.is_empty() {
                        pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    }
                    pieces.push(if name == VALUE_PLACEHOLDER {
                        Piece::Value
                    } else {
                        Piece::Column(name.to_string())
                    });
                }
                '}' => return Err(bad("single '}' must be written as '}}'".to_string())),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Ok(Self { pieces })
    }

    /// Row columns the template reads.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|piece| match piece {
            Piece::Column(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// Renders the template for one row.
    pub fn render(&self, value: &Value, row: &Row) -> std::result::Result<String, UnknownColumn> {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Value => push_value(&mut out, value),
                Piece::Column(name) => {
                    let column = row.get(name).ok_or_else(|| UnknownColumn(name.clone()))?;
                    push_value(&mut out, column);
                }
            }
        }
        Ok(out)
    }
}

/// Strings raw, `NULL` empty, everything else as compact JSON.
fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Null => {}
        other => out.push_str(&other.to_string()),
    }
}
