//! Payload filtering for comic archive entries.

/// Raster formats served as comic pages.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "avif", "heic", "gif", "bmp"];

/// File names written by operating systems and file managers, never pages.
const OS_ARTIFACTS: &[&str] = &["thumbs.db", "ehthumbs.db", "desktop.ini", ".ds_store", "icon\r"];

/// Whether an archive entry is a page image worth numbering.
pub fn is_payload_image(name: &str, is_dir: bool) -> bool {
    if is_dir || name.ends_with('/') {
        return false;
    }
    if is_resource_fork(name) {
        return false;
    }
    let base = base_name(name);
    if base.is_empty() || base.starts_with('.') || is_os_artifact(base) {
        return false;
    }
    has_image_extension(base)
}

/// Last path component of an archive entry name.
pub fn base_name(name: &str) -> &str {
    let trimmed = name.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

pub fn is_os_artifact(base: &str) -> bool {
    let lower = base.to_lowercase();
    OS_ARTIFACTS.contains(&lower.as_str())
}

fn is_resource_fork(name: &str) -> bool {
    name.starts_with("__MACOSX/") || name.contains("/__MACOSX/")
}

fn has_image_extension(base: &str) -> bool {
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => IMAGE_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext)),
        _ => false,
    }
}
