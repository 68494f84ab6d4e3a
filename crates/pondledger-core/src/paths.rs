// Document paths: validated slash-separated keys into the store.
//
// The path layout is the de facto schema, so every collection root used by
// the ledger is built here rather than formatted ad hoc at call sites.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Characters a path segment may never contain.
const FORBIDDEN_CHARS: &[char] = &['.', '#', '$', '[', ']', '/'];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path `{path}` has an empty segment")]
    EmptySegment { path: String },

    #[error("segment `{segment}` contains forbidden character `{ch}`")]
    ForbiddenChar { segment: String, ch: char },
}

/// A validated store path such as `transactions/abc123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath(String);

impl DocPath {
    /// Parse a path, rejecting empty segments and forbidden characters.
    /// Leading and trailing slashes are tolerated and stripped.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        for segment in trimmed.split('/') {
            validate_segment(segment).map_err(|e| match e {
                PathError::EmptySegment { .. } => PathError::EmptySegment {
                    path: raw.to_string(),
                },
                other => other,
            })?;
        }
        Ok(DocPath(trimmed.to_string()))
    }

    /// Append a single segment.
    pub fn child(&self, segment: &str) -> Result<Self, PathError> {
        validate_segment(segment)?;
        Ok(DocPath(format!("{}/{}", self.0, segment)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// The final segment (the document key).
    pub fn key(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// The enclosing collection, or `None` for a root-level path.
    pub fn parent(&self) -> Option<DocPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| DocPath(parent.to_string()))
    }

    /// True when `other` is this path or lies beneath it.
    pub fn contains(&self, other: &DocPath) -> bool {
        other.0 == self.0
            || (other.0.len() > self.0.len()
                && other.0.starts_with(&self.0)
                && other.0.as_bytes()[self.0.len()] == b'/')
    }

    /// Prefix used for descendant range queries (`path/`).
    pub(crate) fn descendant_prefix(&self) -> String {
        format!("{}/", self.0)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DocPath::parse(&value)
    }
}

impl From<DocPath> for String {
    fn from(path: DocPath) -> Self {
        path.0
    }
}

fn validate_segment(segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::EmptySegment {
            path: segment.to_string(),
        });
    }
    if let Some(ch) = segment.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(PathError::ForbiddenChar {
            segment: segment.to_string(),
            ch,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Collection roots
// ---------------------------------------------------------------------------

pub const TRANSACTIONS: &str = "transactions";
pub const BUDGETS: &str = "budgets";
pub const PROJECTS: &str = "projects";
pub const EMPLOYEES: &str = "employees";
pub const ATTENDANCE: &str = "attendance";
pub const INSIGHTS: &str = "insights";

/// Root of the pre-profile farming data.
pub const LEGACY_FARM_ROOT: &str = "farming";
/// Root under which each farm profile keeps its own ponds.
pub const PROFILE_FARM_ROOT: &str = "shrimp";

/// Profile name that selects the legacy `farming/` root.
pub const LEGACY_PROFILE: &str = "legacy";

/// Build a top-level collection path from one of the constants above.
pub fn collection(name: &str) -> DocPath {
    DocPath(name.to_string())
}

/// Which farming root a request addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FarmScope {
    /// `farming/...`
    Legacy,
    /// `shrimp/{profile}/...`
    Profile(String),
}

impl FarmScope {
    /// Map a profile name to a scope; `legacy` selects the old root.
    pub fn from_profile(profile: &str) -> Result<Self, PathError> {
        if profile == LEGACY_PROFILE {
            return Ok(FarmScope::Legacy);
        }
        validate_segment(profile)?;
        Ok(FarmScope::Profile(profile.to_string()))
    }

    pub fn root(&self) -> DocPath {
        match self {
            FarmScope::Legacy => DocPath(LEGACY_FARM_ROOT.to_string()),
            FarmScope::Profile(name) => DocPath(format!("{PROFILE_FARM_ROOT}/{name}")),
        }
    }

    pub fn ponds(&self) -> DocPath {
        DocPath(format!("{}/ponds", self.root()))
    }

    pub fn inventory(&self) -> DocPath {
        DocPath(format!("{}/inventory", self.root()))
    }

    pub fn activities(&self) -> DocPath {
        DocPath(format!("{}/activities", self.root()))
    }
}
