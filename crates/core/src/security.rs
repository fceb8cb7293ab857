//! Path traversal guards for hrefs and externally supplied entry paths.
//!
//! Archive paths are always `/`-separated and relative to the archive root. Nothing here
//! touches the filesystem.

use percent_encoding::percent_decode_str;

use crate::error::ReadError;

/// Collapse `.` and `..` segments and empty components. Returns `None` when a `..` would
/// climb above the start of the path.
pub fn normalize_segments(path: &str) -> Option<String> {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop()?;
            }
            s => out.push(s),
        }
    }
    Some(out.join("/"))
}

/// Directory part of an archive path, with a trailing `/` (empty for top-level entries).
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..=i]).unwrap_or("")
}

/// Split a trailing `#fragment` off an href.
pub fn split_fragment(href: &str) -> (&str, Option<&str>) {
    match href.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (href, None),
    }
}

/// Percent-decode an href, keeping the raw text when the escapes are not valid UTF-8.
pub fn decode_href(href: &str) -> String {
    percent_decode_str(href)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| href.to_string())
}

/// Whether an href points outside the archive (`http:`, `mailto:` and friends).
pub fn is_external(href: &str) -> bool {
    match href.split_once(':') {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme.len() > 1
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Resolve an href found in the document at `base_dir` to an archive-absolute path.
/// The fragment, if any, is kept. Returns `None` for external links and for hrefs that
/// climb out of the archive.
pub fn resolve_relative(base_dir: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || is_external(href) {
        return None;
    }
    let (path, fragment) = split_fragment(href);
    let path = decode_href(path);
    // A bare "#frag" has no document to anchor to once the base is a directory.
    if path.is_empty() {
        return None;
    }
    let joined = match path.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("{base_dir}{path}"),
    };
    let resolved = normalize_segments(&joined)?;
    Some(match fragment {
        Some(f) if !f.is_empty() => format!("{resolved}#{f}"),
        _ => resolved,
    })
}

/// Strip what an external request may carry around an archive path: backslash separators,
/// a `#fragment` and leading slashes.
pub fn clean_request(requested: &str) -> String {
    let cleaned = requested.replace('\\', "/");
    let (cleaned, _) = split_fragment(&cleaned);
    cleaned.trim_start_matches('/').to_string()
}

/// Turn an externally requested entry path into an archive path inside the package rooted at
/// `root_path` (the OPF directory, `/`-terminated or empty).
///
/// The path is taken as-is when it already starts with `root_path`, otherwise it is prefixed
/// with it. `..` may leave the package directory; only climbing above the archive root is
/// rejected. Callers decide which of the resulting paths may be served.
pub fn resolve_package_path(root_path: &str, requested: &str) -> Result<String, ReadError> {
    let trimmed = clean_request(requested);

    let qualified = if root_path.is_empty() || trimmed.starts_with(root_path) {
        trimmed
    } else {
        format!("{root_path}{trimmed}")
    };

    let normalized = normalize_segments(&qualified).ok_or_else(|| ReadError::PathTraversal {
        path: requested.to_string(),
    })?;
    if normalized.is_empty() {
        return Err(ReadError::EntryNotFound(requested.to_string()));
    }
    Ok(normalized)
}
