use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// `/history` timestamp layout.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A stored analysis, as read back from the `analysis` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AnalysisRow {
    pub id: i64,
    pub text: String,
    pub sentiment: Option<String>,
    pub emotion: Option<String>,
    pub date: NaiveDateTime,
}

/// Fields supplied by the caller on insert; `id` and `date` come from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnalysis {
    pub text: String,
    pub sentiment: serde_json::Value,
    pub emotion: serde_json::Value,
}

/// One `/history` item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub text: String,
    pub date: String,
    pub sentiment: serde_json::Value,
    pub emotion: serde_json::Value,
}

impl TryFrom<AnalysisRow> for HistoryEntry {
    type Error = serde_json::Error;

    fn try_from(row: AnalysisRow) -> Result<Self, Self::Error> {
        Ok(Self {
            date: row.date.format(DATE_FORMAT).to_string(),
            sentiment: decode_column(row.sentiment.as_deref())?,
            emotion: decode_column(row.emotion.as_deref())?,
            text: row.text,
        })
    }
}

/// NULL columns read back as an empty mapping.
fn decode_column(raw: Option<&str>) -> Result<serde_json::Value, serde_json::Error> {
    match raw {
        Some(s) => serde_json::from_str(s),
        None => Ok(serde_json::json!({})),
    }
}
