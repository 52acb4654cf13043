use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, MemoryResult};

/// Scheme prefix shared by every permalink.
pub const SCHEME: &str = "memory://";

/// Folder used when a caller supplies an empty or separator-only folder.
pub const DEFAULT_FOLDER: &str = "default";

/// Normalize a folder path.
///
/// Trims surrounding whitespace, converts backslashes to forward slashes and
/// drops blank segments, which also collapses duplicate separators and strips
/// leading/trailing ones. Inner segments are kept as given. Empty input
/// yields an empty string.
pub fn normalize_folder(path: &str) -> String {
    path.trim()
        .replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.trim().is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalize a folder and substitute [`DEFAULT_FOLDER`] for the root.
pub fn resolve_folder(path: &str) -> String {
    let folder = normalize_folder(path);
    if folder.is_empty() {
        DEFAULT_FOLDER.to_string()
    } else {
        folder
    }
}

/// Build the permalink for `doc_id` inside `folder`.
///
/// The folder is normalized first; an empty folder resolves to
/// [`DEFAULT_FOLDER`]. Fails if `doc_id` is empty or contains `/`.
pub fn generate_identifier(folder: &str, doc_id: &str) -> MemoryResult<Permalink> {
    Permalink::new(folder, doc_id)
}

/// Document ids are opaque but must be non-empty, free of path separators
/// and of surrounding whitespace, so that formatting and parsing agree.
fn check_doc_id(doc_id: &str) -> MemoryResult<()> {
    if doc_id.is_empty() {
        return Err(MemoryError::InvalidIdentifier(
            "document id must not be empty".to_string(),
        ));
    }
    if doc_id.contains('/') || doc_id.contains('\\') {
        return Err(MemoryError::InvalidIdentifier(format!(
            "document id '{doc_id}' must not contain a path separator"
        )));
    }
    if doc_id.trim() != doc_id {
        return Err(MemoryError::InvalidIdentifier(format!(
            "document id '{doc_id}' must not start or end with whitespace"
        )));
    }
    Ok(())
}

/// Split a permalink string into `(folder, doc_id)`.
pub fn parse_identifier(s: &str) -> MemoryResult<(String, String)> {
    let permalink: Permalink = s.parse()?;
    Ok(permalink.into_parts())
}

/// Canonical `memory://<folder>/<doc_id>` identifier.
///
/// The only stable join key between the metadata store and the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permalink {
    folder: String,
    doc_id: String,
}

impl Permalink {
    /// Create a permalink from a raw folder and a document id.
    pub fn new(folder: &str, doc_id: &str) -> MemoryResult<Self> {
        check_doc_id(doc_id)?;
        Ok(Self {
            folder: resolve_folder(folder),
            doc_id: doc_id.to_string(),
        })
    }

    /// Folder (collection) component.
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// Opaque document id component.
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Consume into `(folder, doc_id)`.
    pub fn into_parts(self) -> (String, String) {
        (self.folder, self.doc_id)
    }
}

impl fmt::Display for Permalink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.folder, self.doc_id)
    }
}

impl FromStr for Permalink {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix(SCHEME).ok_or_else(|| {
            MemoryError::InvalidIdentifier(format!("'{s}' does not use the {SCHEME} scheme"))
        })?;
        let (folder, doc_id) = rest.rsplit_once('/').ok_or_else(|| {
            MemoryError::InvalidIdentifier(format!("'{s}' has no folder component"))
        })?;
        if folder.is_empty() || normalize_folder(folder) != folder {
            return Err(MemoryError::InvalidIdentifier(format!(
                "'{s}' must have a normalized, non-empty folder"
            )));
        }
        check_doc_id(doc_id)?;
        Ok(Self {
            folder: folder.to_string(),
            doc_id: doc_id.to_string(),
        })
    }
}

impl TryFrom<String> for Permalink {
    type Error = MemoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Permalink> for String {
    fn from(value: Permalink) -> Self {
        value.to_string()
    }
}
