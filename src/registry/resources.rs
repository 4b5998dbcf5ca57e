//! URI-addressed resources
//!
//! Patterns look like `scheme://literal/{placeholder}`. Each placeholder captures exactly one
//! non-empty path segment. When several patterns match a URI, the one registered first wins;
//! registration refuses patterns that an earlier one would always shadow.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use regex::Regex;

use crate::{
    errors::HandlerError,
    registry::{CallContext, RegistryError},
};

pub type Placeholders = BTreeMap<String, String>;

#[async_trait]
pub trait ResourceResolver: Send + Sync {
    /// Produces the text content of the resource at `uri`.
    async fn read(
        &self,
        uri: &str,
        placeholders: Placeholders,
        ctx: CallContext,
    ) -> Result<String, HandlerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriPattern {
    raw: String,
    scheme: String,
    segments: Vec<Segment>,
}

fn scheme_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*$").expect("scheme regex"))
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("placeholder regex"))
}

impl UriPattern {
    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        let invalid = |reason: &'static str| RegistryError::InvalidPattern {
            pattern: raw.to_string(),
            reason,
        };

        let (scheme, path) = raw.split_once("://").ok_or_else(|| invalid("missing `scheme://`"))?;
        if !scheme_pattern().is_match(scheme) {
            return Err(invalid("scheme must start with a letter"));
        }
        if path.is_empty() {
            return Err(invalid("path must not be empty"));
        }

        let mut seen = HashSet::new();
        let mut segments = Vec::new();
        for segment in path.split('/') {
            if segment.is_empty() {
                return Err(invalid("path segments must not be empty"));
            }

            if let Some(name) = segment
                .strip_prefix('{')
                .and_then(|rest| rest.strip_suffix('}'))
            {
                if !placeholder_pattern().is_match(name) {
                    return Err(invalid("placeholder names must be identifiers"));
                }
                if !seen.insert(name) {
                    return Err(invalid("placeholder names must be unique"));
                }
                segments.push(Segment::Placeholder(name.to_string()));
            } else if segment.contains(['{', '}']) {
                return Err(invalid("a placeholder must span a whole segment"));
            } else {
                segments.push(Segment::Literal(segment.to_string()));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            scheme: scheme.to_ascii_lowercase(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_template(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Placeholder(_)))
    }

    /// Returns the captured placeholders when `uri` matches.
    pub fn matches(&self, uri: &str) -> Option<Placeholders> {
        let (scheme, path) = uri.split_once("://")?;
        if !scheme.eq_ignore_ascii_case(&self.scheme) {
            return None;
        }

        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut captured = Placeholders::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Placeholder(name) if !part.is_empty() => {
                    captured.insert(name.clone(), part.to_string());
                }
                _ => return None,
            }
        }
        Some(captured)
    }

    /// True when every URI matched by `other` is also matched by `self`.
    fn covers(&self, other: &UriPattern) -> bool {
        self.scheme == other.scheme
            && self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(mine, theirs)| match (mine, theirs) {
                    (Segment::Placeholder(_), _) => true,
                    (Segment::Literal(mine), Segment::Literal(theirs)) => mine == theirs,
                    (Segment::Literal(_), Segment::Placeholder(_)) => false,
                })
    }
}

impl fmt::Display for UriPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Clone)]
pub struct ResourceDefinition {
    pattern: UriPattern,
    name: String,
    description: Option<String>,
    mime_type: Option<String>,
    resolver: Arc<dyn ResourceResolver>,
}

impl ResourceDefinition {
    pub fn new(
        pattern: &str,
        name: impl Into<String>,
        resolver: impl ResourceResolver + 'static,
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            pattern: UriPattern::parse(pattern)?,
            name: name.into(),
            description: None,
            mime_type: None,
            resolver: Arc::new(resolver),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn pattern(&self) -> &UriPattern {
        &self.pattern
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn resolver(&self) -> Arc<dyn ResourceResolver> {
        Arc::clone(&self.resolver)
    }
}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("pattern", &self.pattern.raw)
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct ResourceRegistry {
    entries: Vec<ResourceDefinition>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: ResourceDefinition) -> Result<(), RegistryError> {
        if let Some(existing) = self
            .entries
            .iter()
            .find(|entry| entry.pattern.covers(&definition.pattern))
        {
            return Err(RegistryError::AmbiguousPattern {
                pattern: definition.pattern.raw.clone(),
                existing: existing.pattern.raw.clone(),
            });
        }

        self.entries.push(definition);
        Ok(())
    }

    pub fn resolve(&self, uri: &str) -> Option<(Placeholders, &ResourceDefinition)> {
        self.entries.iter().find_map(|entry| {
            entry
                .pattern
                .matches(uri)
                .map(|placeholders| (placeholders, entry))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDefinition> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
