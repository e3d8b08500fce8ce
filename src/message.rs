use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Option snapshot captured when a task starts.
///
/// The gallery stores every option as a string, so flags accept both
/// `true` and `"true"`. Values of any other shape fall back to the default.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct DownloadOptions {
    #[serde(deserialize_with = "flag")]
    pub zip_download: bool,
    pub active_tab_origin: Option<String>,
    #[serde(deserialize_with = "flag")]
    pub show_image_url: bool,
    #[serde(deserialize_with = "flag")]
    pub show_open_image_button: bool,
    #[serde(deserialize_with = "flag")]
    pub show_download_image_button: bool,
    #[serde(deserialize_with = "number")]
    pub image_min_width: Option<u32>,
    #[serde(deserialize_with = "number")]
    pub image_max_width: Option<u32>,
}

/// Messages the gallery sends to the background worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    #[serde(rename_all = "camelCase")]
    DownloadImages {
        images_to_download: Vec<String>,
        #[serde(default)]
        options: DownloadOptions,
    },
}

impl Message {
    /// Parses a raw message. `Ok(None)` means a well-formed message of another type.
    pub fn parse(raw: &str) -> Result<Option<Message>> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        match value.get("type").and_then(|t| t.as_str()) {
            Some("downloadImages") => Ok(Some(serde_json::from_value(value)?)),
            Some(_) => Ok(None),
            None => Err(Error::InvalidMessage("missing \"type\" field".to_string())),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Loose<T> {
    Typed(T),
    Text(String),
    Other(IgnoredAny),
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    Ok(match Option::<Loose<bool>>::deserialize(deserializer)? {
        Some(Loose::Typed(b)) => b,
        Some(Loose::Text(s)) => s.trim().eq_ignore_ascii_case("true"),
        Some(Loose::Other(_)) | None => false,
    })
}

fn number<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Loose<u32>>::deserialize(deserializer)? {
        Some(Loose::Typed(n)) => Some(n),
        Some(Loose::Text(s)) => s.trim().parse().ok(),
        Some(Loose::Other(_)) | None => None,
    })
}
