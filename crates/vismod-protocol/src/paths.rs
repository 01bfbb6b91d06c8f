//! Relative asset path normalization.
//!
//! Both sides run the same check: the sandbox before issuing any request,
//! the host again before touching the filesystem.

/// Normalize a relative asset file path.
///
/// Rejects empty paths, absolute paths, drive-letter prefixes, backslashes,
/// `..` segments, URL schemes, query/fragment markers and NUL bytes.
/// `.` and empty segments are dropped. Returns `None` when rejected.
pub fn normalize_asset_path(rel_path: &str) -> Option<String> {
    let normalized = normalize_asset_dir(rel_path)?;
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Normalize a relative asset directory. The asset root is `""`.
pub fn normalize_asset_dir(rel_dir: &str) -> Option<String> {
    let trimmed = rel_dir.trim();
    if trimmed.starts_with('/') || trimmed.starts_with('~') {
        return None;
    }
    if trimmed
        .chars()
        .any(|c| matches!(c, '\\' | ':' | '?' | '#' | '\0'))
    {
        return None;
    }

    let mut segments = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s => segments.push(s),
        }
    }
    Some(segments.join("/"))
}
