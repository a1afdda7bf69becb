use serde::{Deserialize, Serialize};

/// URL prefix under which stored images are served.
pub const UPLOADS_PREFIX: &str = "/uploads/";

/// A journal entry as returned to clients. `timestamp` is the exact string
/// the owner supplied (ISO date or RFC 3339 date-time).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Memory {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub timestamp: String,
    pub images: Vec<MemoryImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryImage {
    pub id: i64,
    pub url: String,
    pub original_name: Option<String>,
}

/// Build the public URL of a stored file.
pub fn upload_url(stored_name: &str) -> String {
    format!("{}{}", UPLOADS_PREFIX, stored_name)
}
