use std::path::{Path, PathBuf};
use url::Url;

/// Last non-empty path segment of `url_str`, or a random `download_<uuid>` name.
pub fn get_filename_from_url(url_str: &str) -> String {
    if let Ok(url) = Url::parse(url_str) {
        if let Some(segments) = url.path_segments() {
            if let Some(filename) = segments.filter(|s| !s.is_empty()).last() {
                return filename.to_string();
            }
        }
    }

    format!("download_{}", uuid::Uuid::new_v4())
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}

/// Joins a `/`-separated relative path onto `root`, sanitizing every component
/// and dropping empty, `.` and `..` segments. The result always names a file
/// below `root`; a path with nothing left gets a random `download_<uuid>` name.
pub fn resolve_relative(root: &Path, relative: &str) -> PathBuf {
    let parts: Vec<String> = relative
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .map(sanitize_filename)
        .collect();
    if parts.is_empty() {
        return root.join(format!("download_{}", uuid::Uuid::new_v4()));
    }
    parts.iter().fold(root.to_path_buf(), |path, part| path.join(part))
}

pub fn get_unique_filepath(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let file_stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().to_string());

    let mut counter = 1;
    loop {
        let new_filename = match &extension {
            Some(ext) => format!("{}_{}.{}", file_stem, counter, ext),
            None => format!("{}_{}", file_stem, counter),
        };
        let candidate = dir.join(new_filename);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
