use serde::{Deserialize, Deserializer, Serialize};

/// One line of the ingestion feed.
///
/// Absent fields and explicit `null`s both decode to the zero value, so a
/// sparse line still lands in the store instead of being dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Record {
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(deserialize_with = "null_as_default")]
    pub thumb_url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub updated_at: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub image_urls: Vec<String>,
}

impl Record {
    /// Decodes one feed line. Invalid UTF-8 is replaced with U+FFFD rather
    /// than rejecting the whole record.
    pub fn from_line(line: &[u8]) -> serde_json::Result<Self> {
        match std::str::from_utf8(line) {
            Ok(text) => serde_json::from_str(text),
            Err(_) => serde_json::from_str(&String::from_utf8_lossy(line)),
        }
    }
}

/// The projection of a record returned by search. Tags and images are not
/// part of the search payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub thumb_url: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
