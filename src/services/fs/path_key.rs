//! Normalized absolute paths used as request identity.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A normalized, absolute path
///
/// Two requests naming the same file through different spellings
/// (`a/./b`, `a/c/../b`, relative vs absolute) produce the same key.
/// Normalization is purely lexical and never touches the filesystem, so
/// symlinks are not resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey(PathBuf);

impl PathKey {
    /// Normalize `path`, resolving relative paths against `base`
    /// (or the process working directory when `base` is `None`).
    ///
    /// A relative `base` is itself resolved against the working directory.
    pub fn new(path: &Path, base: Option<&Path>) -> Self {
        let joined = match base {
            Some(base) if !path.is_absolute() => base.join(path),
            _ => path.to_path_buf(),
        };
        if joined.is_absolute() {
            return Self(normalize_lexically(&joined));
        }

        match std::env::current_dir() {
            Ok(cwd) => Self(normalize_lexically(&cwd.join(joined))),
            Err(e) => {
                tracing::debug!(
                    "No working directory to resolve {:?} against: {}",
                    joined,
                    e
                );
                Self(normalize_lexically(&joined))
            }
        }
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl AsRef<Path> for PathKey {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Drop `.` components and fold `..` into their parent.
///
/// `..` at the root stays at the root, like `path.resolve`.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::ParentDir) | None => out.push(".."),
                _ => {}
            },
            Component::Normal(name) => out.push(name),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
