//! `hostutils::path` is a module containing path utilities for the hostcore project.

use typed_path::{Utf8UnixComponent, Utf8UnixPathBuf};

use crate::{HostutilsError, HostutilsResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The type of a supported path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedPathType {
    /// Any path type.
    Any,

    /// An absolute path.
    Absolute,

    /// A relative path.
    Relative,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Normalizes a Unix path string.
///
/// Rules:
/// - Resolves `.` and `..` components lexically, without touching the filesystem
/// - Rejects any `..` that would climb above the start of the path
/// - Collapses repeated separators and drops trailing slashes
/// - Enforces the requested path type
pub fn normalize_path(path: &str, path_type: SupportedPathType) -> HostutilsResult<String> {
    if path.is_empty() {
        return Err(HostutilsError::PathValidation(
            "Path cannot be empty".to_string(),
        ));
    }

    let path = Utf8UnixPathBuf::from(path);
    let is_absolute = path.is_absolute();

    match path_type {
        SupportedPathType::Absolute if !is_absolute => {
            return Err(HostutilsError::PathValidation(format!(
                "Path must be absolute (start with '/'): {path}"
            )));
        }
        SupportedPathType::Relative if is_absolute => {
            return Err(HostutilsError::PathValidation(format!(
                "Path must be relative (must not start with '/'): {path}"
            )));
        }
        _ => {}
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in path.components() {
        match component {
            Utf8UnixComponent::RootDir | Utf8UnixComponent::CurDir => {}
            Utf8UnixComponent::ParentDir => {
                if parts.pop().is_none() {
                    return Err(HostutilsError::PathValidation(format!(
                        "Invalid path: cannot traverse above root directory: {path}"
                    )));
                }
            }
            Utf8UnixComponent::Normal(part) if !part.is_empty() => parts.push(part),
            Utf8UnixComponent::Normal(_) => {}
        }
    }

    let joined = parts.join("/");
    if is_absolute {
        Ok(format!("/{joined}"))
    } else {
        Ok(joined)
    }
}

/// Returns true if `path` is `base` itself or lies underneath it.
///
/// Both paths are normalized first; any path that fails normalization is treated as outside.
pub fn is_within(base: &str, path: &str) -> bool {
    let (Ok(base), Ok(path)) = (
        normalize_path(base, SupportedPathType::Absolute),
        normalize_path(path, SupportedPathType::Absolute),
    ) else {
        return false;
    };

    if base == "/" {
        return true;
    }

    path == base || path.starts_with(&format!("{base}/"))
}

/// Resolves `path` against `base` and requires the result to stay under `base`.
///
/// Absolute inputs are normalized and checked as-is; relative inputs are joined onto `base`.
pub fn resolve_under(base: &str, path: &str) -> HostutilsResult<String> {
    let candidate = if path.starts_with('/') {
        normalize_path(path, SupportedPathType::Absolute)?
    } else {
        normalize_path(&format!("{base}/{path}"), SupportedPathType::Absolute)?
    };

    if !is_within(base, &candidate) {
        return Err(HostutilsError::PathValidation(format!(
            "{candidate} escapes {base}"
        )));
    }

    Ok(candidate)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
