//! Destination paths for downloaded images and archives.
//!
//! Files land under `<NAMESPACE>/<site>/<date>/<site>_<date>_<index>.<ext>`,
//! archives under `<NAMESPACE>/<site>/<date>.zip`.

use chrono::Utc;
use url::Url;

use crate::state::DownloadTask;

/// Download sub-folder every generated path starts with.
pub const NAMESPACE: &str = "QhromaLabs";

const FALLBACK_SITE: &str = "site";
const FALLBACK_EXTENSION: &str = "jpg";

/// Hostname of `origin` without a leading `www.`, reduced to ASCII alphanumerics.
pub fn site_of(origin: Option<&str>) -> String {
    let host = origin
        .and_then(|o| Url::parse(o).ok())
        .and_then(|u| u.host_str().map(str::to_string));

    let Some(host) = host else {
        return FALLBACK_SITE.to_string();
    };

    let site: String = host
        .strip_prefix("www.")
        .unwrap_or(&host)
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();

    if site.is_empty() {
        FALLBACK_SITE.to_string()
    } else {
        site
    }
}

/// Current UTC calendar date, `YYYY-MM-DD`.
pub fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Final dot suffix of the last path component, `jpg` when there is none.
pub fn extension_of(filename: &str) -> &str {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match base.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext,
        _ => FALLBACK_EXTENSION,
    }
}

/// 1-based position padded to the width of `total`.
pub fn index_label(processed: usize, total: usize) -> String {
    let width = total.to_string().len();
    format!("{:0width$}", processed + 1, width = width)
}

pub fn normalize_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Path for the task's next image, named after the service's suggestion.
pub fn generate_path(task: &DownloadTask, suggested: &str) -> String {
    generate_path_on(task, suggested, &today())
}

pub fn generate_path_on(task: &DownloadTask, suggested: &str, date: &str) -> String {
    let site = site_of(task.options().active_tab_origin.as_deref());
    let index = index_label(task.processed(), task.total());
    let ext = extension_of(suggested);
    normalize_slashes(&format!(
        "{NAMESPACE}/{site}/{date}/{site}_{date}_{index}.{ext}"
    ))
}

pub fn archive_path(site: &str, date: &str) -> String {
    normalize_slashes(&format!("{NAMESPACE}/{site}/{date}.zip"))
}

/// Last segment of a generated path; archive entries drop the folder prefix.
pub fn entry_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
