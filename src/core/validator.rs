//! Size and type checks applied to every candidate before it is queued.

use serde::Deserialize;
use tracing::warn;
use super::errors::ValidationError;
use super::types::{FileCandidate, FileKind};

/// Default per-file limit: 100 MiB
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// One entry of an allow-list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum TypeRule {
    /// `.pdf` or `pdf`
    Extension(String),
    /// `application/pdf`
    MediaType(String),
    /// `image/*`, stored as `image/`
    MediaPrefix(String),
    /// `image`, `document`, ...
    Kind(FileKind),
}

impl TypeRule {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_ascii_lowercase();
        if value.is_empty() {
            return None;
        }

        if let Some(ext) = value.strip_prefix('.') {
            return (!ext.is_empty()).then(|| Self::Extension(ext.to_string()));
        }

        if let Some(prefix) = value.strip_suffix("/*") {
            return (!prefix.is_empty()).then(|| Self::MediaPrefix(format!("{}/", prefix)));
        }

        if value.contains('/') {
            return Some(Self::MediaType(value));
        }

        Some(FileKind::parse(&value)
            .map(Self::Kind)
            .unwrap_or(Self::Extension(value)))
    }

    pub fn matches(&self, candidate: &FileCandidate) -> bool {
        let media_type = candidate.media_type.as_deref().map(str::to_ascii_lowercase);

        match self {
            Self::Extension(ext) => candidate.extension().as_deref() == Some(ext.as_str()),
            Self::MediaType(expected) => media_type.as_deref() == Some(expected.as_str()),
            Self::MediaPrefix(prefix) => media_type.is_some_and(|mt| mt.starts_with(prefix.as_str())),
            Self::Kind(kind) => candidate.kind() == *kind,
        }
    }
}

impl TryFrom<String> for TypeRule {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid file type rule {:?}", value))
    }
}

/// Limits a candidate has to satisfy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub max_size_bytes: u64,
    /// Empty accepts everything
    pub allowed_types: Vec<TypeRule>,
    /// Queue capacity, counting every item that is not a rejection or cancelled
    pub max_files: Option<usize>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            allowed_types: Vec::new(),
            max_files: None,
        }
    }
}

impl Constraints {
    pub fn new(max_size_bytes: u64) -> Self {
        Self {
            max_size_bytes,
            ..Default::default()
        }
    }

    /// Adds allow-list entries. Entries that do not parse are logged and skipped.
    pub fn allow<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for value in types {
            let value = value.as_ref();
            match TypeRule::parse(value) {
                Some(rule) => self.allowed_types.push(rule),
                None => warn!(rule = ?value, "Ignoring invalid file type rule"),
            }
        }
        self
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = Some(max_files);
        self
    }
}

/// Checks size and type. Pure: same input, same answer.
pub fn validate(candidate: &FileCandidate, constraints: &Constraints) -> Result<(), ValidationError> {
    if candidate.size_bytes > constraints.max_size_bytes {
        return Err(ValidationError::TooLarge {
            name: candidate.name.clone(),
            size: candidate.size_bytes,
            max: constraints.max_size_bytes,
        });
    }

    if !constraints.allowed_types.is_empty()
        && !constraints.allowed_types.iter().any(|rule| rule.matches(candidate))
    {
        return Err(ValidationError::TypeNotAllowed {
            name: candidate.name.clone(),
        });
    }

    Ok(())
}
