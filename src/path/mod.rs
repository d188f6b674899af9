//! Centralized path normalization module.
//!
//! This module provides cross-platform path handling with:
//! - UTF-8 typed paths via camino (Utf8Path, Utf8PathBuf)
//! - Windows UNC path normalization via dunce
//! - Workspace-relative index keys with forward slashes
//! - Rejection of paths that escape the workspace root

pub use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

use std::fmt;
use std::path::Path;

/// Errors that can occur during path normalization operations.
#[derive(Debug, Clone, PartialEq)]
pub enum PathError {
    /// Path is outside the workspace base directory.
    OutsideRepo {
        path: Utf8PathBuf,
        base: Utf8PathBuf,
    },
    /// Path contains non-UTF-8 characters.
    NonUtf8 { path: std::path::PathBuf },
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::OutsideRepo { path, base } => {
                write!(f, "Path '{}' is outside repository base '{}'", path, base)
            }
            PathError::NonUtf8 { path } => {
                write!(f, "Path contains non-UTF-8 characters: {}", path.display())
            }
        }
    }
}

impl std::error::Error for PathError {}

/// Turns filesystem paths into the keys stored in the semantic index.
#[derive(Debug, Clone)]
pub struct PathNormalizer {
    base_dir: Utf8PathBuf,
}

impl PathNormalizer {
    pub fn new(base_dir: Utf8PathBuf) -> Self {
        Self {
            base_dir: lexical_normalize(&base_dir),
        }
    }

    pub fn from_std_base(base_dir: &Path) -> Result<Self, PathError> {
        Ok(Self::new(Self::from_std_path(base_dir)?))
    }

    pub fn base_dir(&self) -> &Utf8Path {
        &self.base_dir
    }

    /// Normalize a path for comparison purposes.
    ///
    /// Uses `dunce::simplified()` to drop verbatim UNC prefixes on Windows and
    /// converts backslashes to forward slashes.
    pub fn normalize_for_compare(&self, path: &Utf8Path) -> Result<Utf8PathBuf, PathError> {
        let simplified = dunce::simplified(path.as_std_path());

        let utf8_path =
            Utf8PathBuf::from_path_buf(simplified.to_path_buf()).map_err(|_| {
                PathError::NonUtf8 {
                    path: simplified.to_path_buf(),
                }
            })?;

        Ok(Utf8PathBuf::from(utf8_path.as_str().replace('\\', "/")))
    }

    /// Convert a path to be relative to the base directory.
    ///
    /// Relative inputs are interpreted against the base. `.` and `..` are
    /// resolved lexically before the prefix check, so `base/../etc` is rejected.
    pub fn relative_to_base(&self, path: &Utf8Path) -> Result<Utf8PathBuf, PathError> {
        let normalized = self.normalize_for_compare(path)?;
        let absolute = if normalized.is_absolute() {
            normalized
        } else {
            self.base_dir.join(normalized)
        };
        let resolved = lexical_normalize(&absolute);

        match resolved.strip_prefix(&self.base_dir) {
            Ok(relative) => {
                if relative.as_str().is_empty() {
                    Ok(".".into())
                } else {
                    Ok(relative.to_path_buf())
                }
            }
            Err(_) => Err(PathError::OutsideRepo {
                path: resolved,
                base: self.base_dir.clone(),
            }),
        }
    }

    pub fn validate_within_base(&self, path: &Utf8Path) -> Result<(), PathError> {
        self.relative_to_base(path).map(|_| ())
    }

    /// Key under which a file's records are stored: forward-slash, workspace relative.
    pub fn index_key(&self, path: &Path) -> Result<String, PathError> {
        let utf8 = Self::from_std_path(path)?;
        Ok(self.relative_to_base(&utf8)?.as_str().to_string())
    }

    pub fn join_base(&self, relative: &str) -> Utf8PathBuf {
        self.base_dir.join(relative)
    }

    pub fn from_std_path(path: &Path) -> Result<Utf8PathBuf, PathError> {
        Utf8PathBuf::from_path_buf(path.to_path_buf()).map_err(|_| PathError::NonUtf8 {
            path: path.to_path_buf(),
        })
    }
}

fn lexical_normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_str()),
        }
    }
    out
}
