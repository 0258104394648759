//! Plaud records as the bridge relays them.
//!
//! The service owns these; the bridge only reads them. Fields the bridge does not
//! interpret are kept in `extra` so callers see the record exactly as it arrived.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const MILLIS_PER_DAY: i64 = 86_400_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub filename: String,
    /// Recording start, epoch milliseconds.
    #[serde(default, deserialize_with = "lenient_millis")]
    pub start_time: i64,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub duration: i64,
    #[serde(rename = "is_trans", default, deserialize_with = "lenient_flag")]
    pub has_transcript: bool,
    #[serde(rename = "is_summary", default, deserialize_with = "lenient_flag")]
    pub has_summary: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileMeta {
    pub fn started_at_or_after(&self, lower_bound_ms: i64) -> bool {
        self.start_time >= lower_bound_ms
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileDetail {
    #[serde(default, deserialize_with = "lenient_references")]
    pub content_list: Vec<ContentReference>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileDetail {
    pub fn reference(&self, kind: ContentKind) -> Option<&ContentReference> {
        self.content_list
            .iter()
            .find(|item| item.data_type == kind.data_type() && item.data_link.is_some())
    }
}

/// A `(kind, signed-url)` pair. Signed URLs expire; they are never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentReference {
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub data_link: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Transcript,
    Summary,
}

impl ContentKind {
    pub fn data_type(self) -> &'static str {
        match self {
            ContentKind::Transcript => "transaction",
            ContentKind::Summary => "auto_sum_note",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Transcript => f.write_str("transcript"),
            ContentKind::Summary => f.write_str("summary"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub speaker: String,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub start_time: i64,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub end_time: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Joins the non-empty segment contents, one per line.
pub fn transcript_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .filter(|seg| !seg.content.is_empty())
        .map(|seg| seg.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default, deserialize_with = "lenient_string")]
    pub ai_content: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub header: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub category: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchMatch {
    pub file_id: String,
    pub title: String,
    pub start_time: i64,
    pub duration: i64,
    pub excerpt: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrashFilter {
    Trashed,
    Untrashed,
    #[default]
    All,
}

impl TrashFilter {
    pub fn as_param(self) -> u8 {
        match self {
            TrashFilter::Trashed => 0,
            TrashFilter::Untrashed => 1,
            TrashFilter::All => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListFilesParams {
    pub skip: u32,
    pub limit: u32,
    pub trash: TrashFilter,
    pub sort_by: String,
    pub descending: bool,
}

impl Default for ListFilesParams {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: 100,
            trash: TrashFilter::All,
            sort_by: "start_time".to_string(),
            descending: true,
        }
    }
}

impl ListFilesParams {
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn to_query(&self) -> Map<String, Value> {
        let mut query = Map::new();
        query.insert("skip".into(), Value::from(self.skip));
        query.insert("limit".into(), Value::from(self.limit));
        query.insert("is_trash".into(), Value::from(self.trash.as_param()));
        query.insert("sort_by".into(), Value::from(self.sort_by.clone()));
        query.insert(
            "is_desc".into(),
            Value::from(if self.descending { "true" } else { "false" }),
        );
        query
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) => text,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    })
}

fn lenient_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(num)) => num
            .as_i64()
            .or_else(|| num.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(text)) => text.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(flag)) => flag,
        Some(Value::Number(num)) => num.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(text)) => matches!(text.as_str(), "1" | "true"),
        _ => false,
    })
}

fn lenient_references<'de, D>(deserializer: D) -> Result<Vec<ContentReference>, D::Error>
where
    D: Deserializer<'de>,
{
    let references = Option::<Vec<ContentReference>>::deserialize(deserializer)?;
    Ok(references.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn file_meta_tolerates_loose_types_and_keeps_unknown_fields() {
        let file: FileMeta = serde_json::from_value(json!({
            "id": "abc",
            "filename": "Standup",
            "start_time": 1_700_000_000_000i64,
            "duration": null,
            "is_trans": 1,
            "is_summary": false,
            "scene": 7
        }))
        .expect("file meta");
        assert_eq!(file.filename, "Standup");
        assert_eq!(file.duration, 0);
        assert!(file.has_transcript);
        assert!(!file.has_summary);
        assert_eq!(file.extra.get("scene"), Some(&json!(7)));

        let relayed = serde_json::to_value(&file).expect("serialize");
        assert_eq!(relayed["is_trans"], json!(true));
        assert_eq!(relayed["scene"], json!(7));
    }

    #[test_timeout::timeout]
    fn detail_selects_reference_by_kind() {
        let detail: FileDetail = serde_json::from_value(json!({
            "file_id": "abc",
            "content_list": [
                {"data_type": "outline", "data_link": "https://cdn/outline"},
                {"data_type": "transaction", "data_link": "https://cdn/trans"},
                {"data_type": "auto_sum_note", "data_link": null}
            ]
        }))
        .expect("detail");
        let transcript = detail
            .reference(ContentKind::Transcript)
            .expect("transcript");
        assert_eq!(transcript.data_link.as_deref(), Some("https://cdn/trans"));
        assert!(detail.reference(ContentKind::Summary).is_none());
    }

    #[test_timeout::timeout]
    fn detail_without_content_list_has_no_references() {
        let detail: FileDetail = serde_json::from_value(json!({
            "content_list": null
        }))
        .expect("detail");
        assert!(detail.content_list.is_empty());
    }

    #[test_timeout::timeout]
    fn transcript_text_skips_empty_segments() {
        let segments = vec![
            Segment {
                content: "hello".into(),
                ..Segment::default()
            },
            Segment::default(),
            Segment {
                content: "world".into(),
                ..Segment::default()
            },
        ];
        assert_eq!(transcript_text(&segments), "hello\nworld");
    }

    #[test_timeout::timeout]
    fn list_params_render_service_query() {
        let query = ListFilesParams::default().to_query();
        assert_eq!(query["skip"], json!(0));
        assert_eq!(query["limit"], json!(100));
        assert_eq!(query["is_trash"], json!(2));
        assert_eq!(query["sort_by"], json!("start_time"));
        assert_eq!(query["is_desc"], json!("true"));
    }
}
