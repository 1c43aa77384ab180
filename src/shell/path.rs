//! Path validation for `navigate`.
//!
//! Only a validated absolute form ever reaches the adapter. Device
//! namespace prefixes and administrative shares are refused outright, and
//! `.`/`..` segments are resolved lexically so a traversal cannot survive
//! into the normalized path.

use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path contains a NUL byte")]
    NulByte,
    #[error("device namespace paths are not allowed")]
    DeviceNamespace,
    #[error("administrative shares are not allowed")]
    AdminShare,
    #[error("path is not rooted")]
    NotRooted,
}

/// `\\host\C$`, `\\host\ADMIN$`, `\\host\IPC$` — with either separator.
static ADMIN_SHARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[\\/]{2}[^\\/]+[\\/](?:[a-z]\$|admin\$|ipc\$)([\\/]|$)")
        .expect("regex: admin share")
});

/// Validate and normalize a client-supplied path.
///
/// Accepts Unix absolute paths, Windows drive paths, and plain UNC shares;
/// everything else is rejected. The returned path has `.`/`..` segments
/// resolved and is the only value that may be handed to the adapter.
pub fn validate_path(input: &str) -> Result<PathBuf, PathError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }
    if trimmed.contains('\0') {
        return Err(PathError::NulByte);
    }

    if is_device_namespace(trimmed) {
        return Err(PathError::DeviceNamespace);
    }
    if ADMIN_SHARE.is_match(trimmed) {
        return Err(PathError::AdminShare);
    }

    if trimmed.starts_with('/') {
        return Ok(normalize_components(Path::new(trimmed)));
    }
    if is_windows_rooted(trimmed) {
        let normalized = normalize_windows(trimmed);
        if is_device_namespace(&normalized) {
            return Err(PathError::DeviceNamespace);
        }
        if ADMIN_SHARE.is_match(&normalized) {
            return Err(PathError::AdminShare);
        }
        return Ok(PathBuf::from(normalized));
    }

    Err(PathError::NotRooted)
}

fn is_device_namespace(s: &str) -> bool {
    for prefix in [r"\\?\", r"\\.\", "//?/", "//./"] {
        if s.starts_with(prefix) {
            return true;
        }
    }
    false
}

fn is_windows_rooted(s: &str) -> bool {
    let bytes = s.as_bytes();
    let drive_rooted = bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/');
    drive_rooted || s.starts_with(r"\\") || s.starts_with("//")
}

/// Resolve `.` and `..` lexically without touching the filesystem
/// (canonicalization would require the path to exist).
fn normalize_components(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
                // `..` at the root is dropped.
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}

/// Same resolution for a Windows-style string, preserving the drive or UNC
/// root and backslash separators.
fn normalize_windows(s: &str) -> String {
    let (root, rest) = if let Some(stripped) = s.strip_prefix(r"\\").or_else(|| s.strip_prefix("//"))
    {
        (r"\\".to_string(), stripped)
    } else {
        // Drive form `X:\…`
        (format!("{}\\", &s[..2]), &s[3..])
    };
    let mut segments: Vec<&str> = Vec::new();
    for segment in rest.split(['\\', '/']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("{root}{}", segments.join("\\"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_unix_absolute() {
        assert_eq!(
            validate_path("/home/alice/Documents").unwrap(),
            PathBuf::from("/home/alice/Documents")
        );
    }

    #[test]
    fn resolves_traversal_lexically() {
        assert_eq!(
            validate_path("/home/alice/../bob/./x").unwrap(),
            PathBuf::from("/home/bob/x")
        );
        // `..` cannot climb above the root.
        assert_eq!(validate_path("/../../etc").unwrap(), PathBuf::from("/etc"));
    }

    #[test]
    fn accepts_windows_drive_path() {
        assert_eq!(
            validate_path(r"C:\Users\alice").unwrap(),
            PathBuf::from(r"C:\Users\alice")
        );
        assert_eq!(
            validate_path("C:/Users/alice").unwrap(),
            PathBuf::from(r"C:\Users\alice")
        );
    }

    #[test]
    fn rejects_empty_and_whitespace() {
        assert_eq!(validate_path(""), Err(PathError::Empty));
        assert_eq!(validate_path("   "), Err(PathError::Empty));
    }

    #[test]
    fn rejects_nul() {
        assert_eq!(validate_path("/tmp/\0x"), Err(PathError::NulByte));
    }

    #[test]
    fn rejects_device_namespace() {
        assert_eq!(
            validate_path(r"\\?\C:\Windows"),
            Err(PathError::DeviceNamespace)
        );
        assert_eq!(
            validate_path(r"\\.\PhysicalDrive0"),
            Err(PathError::DeviceNamespace)
        );
        assert_eq!(validate_path("//?/C:/x"), Err(PathError::DeviceNamespace));
    }

    #[test]
    fn rejects_admin_shares() {
        assert_eq!(
            validate_path(r"\\host\C$\Windows"),
            Err(PathError::AdminShare)
        );
        assert_eq!(
            validate_path(r"\\host\ADMIN$"),
            Err(PathError::AdminShare)
        );
        assert_eq!(
            validate_path(r"\\host\admin$\x"),
            Err(PathError::AdminShare)
        );
    }

    #[test]
    fn accepts_plain_unc_share() {
        assert_eq!(
            validate_path(r"\\host\public\docs").unwrap(),
            PathBuf::from(r"\\host\public\docs")
        );
    }

    #[test]
    fn rejects_relative() {
        assert_eq!(validate_path("Documents/x"), Err(PathError::NotRooted));
        assert_eq!(validate_path("./x"), Err(PathError::NotRooted));
        assert_eq!(validate_path(".."), Err(PathError::NotRooted));
    }

    #[test]
    fn traversal_into_admin_share_is_caught_after_normalization() {
        assert_eq!(
            validate_path(r"\\host\public\..\C$\Windows"),
            Err(PathError::AdminShare)
        );
    }
}
