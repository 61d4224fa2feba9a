//! Path template compilation and matching.
//!
//! Templates are `/`-separated; a segment is either a literal or a whole
//! `{name}` placeholder.

use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Why a path template was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("path template must start with '/': '{0}'")]
    MissingLeadingSlash(String),

    #[error("empty segment in path template '{0}'")]
    EmptySegment(String),

    #[error("placeholder must span a whole segment: '{0}'")]
    PartialPlaceholder(String),

    #[error("empty placeholder name in '{0}'")]
    EmptyPlaceholder(String),

    #[error("duplicate placeholder '{{{name}}}' in '{template}'")]
    DuplicatePlaceholder { name: String, template: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled endpoint path template such as `/materials/{id}`.
#[derive(Debug, Clone, PartialEq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let rest = template
            .strip_prefix('/')
            .ok_or_else(|| TemplateError::MissingLeadingSlash(template.to_string()))?;

        let mut segments = Vec::new();
        let mut seen = HashSet::new();

        // "/" alone is the module root
        if !rest.is_empty() {
            for part in rest.split('/') {
                if part.is_empty() {
                    return Err(TemplateError::EmptySegment(template.to_string()));
                }
                if let Some(inner) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                    if inner.is_empty() {
                        return Err(TemplateError::EmptyPlaceholder(template.to_string()));
                    }
                    if inner.contains(['{', '}']) {
                        return Err(TemplateError::PartialPlaceholder(template.to_string()));
                    }
                    if !seen.insert(inner.to_string()) {
                        return Err(TemplateError::DuplicatePlaceholder {
                            name: inner.to_string(),
                            template: template.to_string(),
                        });
                    }
                    segments.push(Segment::Param(inner.to_string()));
                } else if part.contains(['{', '}']) {
                    return Err(TemplateError::PartialPlaceholder(template.to_string()));
                } else {
                    segments.push(Segment::Literal(part.to_string()));
                }
            }
        }

        Ok(Self {
            raw: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Number of literal segments; more literals means a more specific route.
    pub fn specificity(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// The template with placeholder names erased; templates with equal
    /// shapes match exactly the same paths.
    pub fn shape(&self) -> String {
        let mut shape = String::new();
        for segment in &self.segments {
            shape.push('/');
            match segment {
                Segment::Literal(lit) => shape.push_str(lit),
                Segment::Param(_) => shape.push_str("{}"),
            }
        }
        if shape.is_empty() {
            shape.push('/');
        }
        shape
    }

    /// Match a module-relative path, returning decoded path parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let rest = path.strip_prefix('/').unwrap_or(path);
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        let parts: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };

        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) => {
                    if lit != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), percent_decode(part));
                }
            }
        }
        Some(params)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Decode `%XX` escapes in a path segment.
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}
