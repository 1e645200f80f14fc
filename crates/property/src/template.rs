//! Template parsing
//!
//! A template is literal text interleaved with `{Property.Path}` tokens.
//! `{{` and `}}` produce literal braces.

use crate::error::{ExpandError, ExpandResult};
use std::fmt;

/// A dotted property path such as `User.Address.City`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    raw: String,
    segments: Vec<String>,
}

impl PropertyPath {
    /// Parse a dotted path. Empty paths and empty segments are rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let segments: Vec<String> = raw.split('.').map(|s| s.trim().to_string()).collect();
        if segments.iter().any(String::is_empty) {
            return None;
        }
        Some(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The path as written in the template.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The first segment, looked up on the target itself.
    pub fn root(&self) -> &str {
        &self.segments[0]
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Token(PropertyPath),
}

/// A parsed message template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template, validating brace structure and token paths.
    pub fn parse(source: &str) -> ExpandResult<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, ch)) = chars.next() {
            match ch {
                '{' => {
                    if matches!(chars.peek(), Some((_, '{'))) {
                        chars.next();
                        literal.push('{');
                        continue;
                    }

                    let mut token = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => {
                                return Err(ExpandError::Unterminated {
                                    position: pos,
                                    template: source.to_string(),
                                });
                            }
                            _ => token.push(c),
                        }
                    }
                    if !closed {
                        return Err(ExpandError::Unterminated {
                            position: pos,
                            template: source.to_string(),
                        });
                    }

                    let path = PropertyPath::parse(&token).ok_or_else(|| ExpandError::EmptyToken {
                        position: pos,
                        template: source.to_string(),
                    })?;

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Token(path));
                }
                '}' => {
                    if matches!(chars.peek(), Some((_, '}'))) {
                        chars.next();
                        literal.push('}');
                    } else {
                        return Err(ExpandError::UnmatchedClose {
                            position: pos,
                            template: source.to_string(),
                        });
                    }
                }
                _ => literal.push(ch),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The raw template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Iterate over the property paths referenced by this template.
    pub fn tokens(&self) -> impl Iterator<Item = &PropertyPath> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Token(path) => Some(path),
            Segment::Literal(_) => None,
        })
    }

    /// Whether the template contains at least one token.
    pub fn has_tokens(&self) -> bool {
        self.tokens().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
