// Database Path Resolution
// Maps user-supplied filenames onto canonical locations beneath the data directory

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Reserved path meaning "no backing file"
pub const MEMORY_PATH: &str = ":memory:";

/// Name of the data-directory subfolder holding backups
pub const META_DIR: &str = "meta";

/// Resolved identifier of a database: an absolute file path or the in-memory sentinel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalPath(String);

impl CanonicalPath {
    pub fn memory() -> Self {
        Self(MEMORY_PATH.to_string())
    }

    pub fn is_memory(&self) -> bool {
        self.0 == MEMORY_PATH
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves raw user input against a base data directory
#[derive(Debug, Clone)]
pub struct PathResolver {
    data_dir: PathBuf,
}

impl PathResolver {
    /// A relative `data_dir` is anchored to the current working directory so
    /// every resolved file path is absolute
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let anchored = std::path::absolute(&data_dir).unwrap_or(data_dir);
        Self {
            data_dir: normalize(&anchored),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory where backups are written
    pub fn meta_dir(&self) -> PathBuf {
        self.data_dir.join(META_DIR)
    }

    /// Resolve `input` to a canonical path.
    ///
    /// Missing input falls back to `active`, then to the in-memory sentinel.
    /// The sentinel and absolute paths pass through untouched; anything else
    /// is joined beneath the data directory.
    pub fn resolve(&self, input: Option<&str>, active: Option<&CanonicalPath>) -> CanonicalPath {
        let input = match input.map(str::trim).filter(|s| !s.is_empty()) {
            Some(input) => input,
            None => return active.cloned().unwrap_or_else(CanonicalPath::memory),
        };

        if input == MEMORY_PATH || is_absolute_input(input) {
            return CanonicalPath(input.to_string());
        }

        let joined = normalize(&self.data_dir.join(input));
        CanonicalPath(joined.to_string_lossy().to_string())
    }
}

/// Leading separator or a drive marker such as `C:\` / `C:/`
fn is_absolute_input(input: &str) -> bool {
    if input.starts_with('/') || input.starts_with('\\') {
        return true;
    }
    let bytes = input.as_bytes();
    bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes.len() == 2 || bytes[2] == b'\\' || bytes[2] == b'/')
}

/// Lexically drop `.` and fold `..` so equivalent spellings share one pool key
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
