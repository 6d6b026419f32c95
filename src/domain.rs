// src/domain.rs
// Feed-facing and persisted data types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Envelope returned by the BSE announcement endpoint: the payload proper in
/// `Table`, a row-count sidecar in `Table1`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnnouncementEnvelope {
    #[serde(rename = "Table", default)]
    pub table: Vec<Announcement>,
    #[serde(rename = "Table1", default)]
    pub table1: Vec<RowCount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RowCount {
    #[serde(rename = "ROWCNT", default)]
    pub rowcnt: i64,
}

/// One disclosure record from the feed. Read-only; the feed is the source of
/// truth and the pipeline never mutates these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Announcement {
    #[serde(rename = "NEWSID", default)]
    pub news_id: String,
    #[serde(rename = "SCRIP_CD", default)]
    pub scrip_code: i64,
    #[serde(rename = "NEWSSUB", default)]
    pub news_subject: String,
    #[serde(rename = "NEWS_DT", default)]
    pub news_date: String,
    #[serde(rename = "HEADLINE", default)]
    pub headline: String,
    #[serde(rename = "CATEGORYNAME", default)]
    pub category_name: String,
    #[serde(rename = "SUBCATNAME", default)]
    pub subcategory_name: String,
    #[serde(rename = "ATTACHMENTNAME", default)]
    pub attachment_name: String,
    #[serde(rename = "PDFFLAG", default)]
    pub pdf_flag: i32,
    #[serde(rename = "SLONGNAME", default)]
    pub issuer_name: String,
    #[serde(rename = "NSURL", default)]
    pub ns_url: String,
}

impl Announcement {
    /// Disclosure date as `YYYY-MM-DD` (the feed sends `YYYY-MM-DDThh:mm:ss`).
    pub fn date_part(&self) -> &str {
        self.news_date
            .split('T')
            .next()
            .unwrap_or(self.news_date.as_str())
    }
}

/// Distilled guidance persisted after successful enrichment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuidanceRecord {
    pub id: String,
    pub name: String,
    /// `YYYY-MM-DD`
    pub date: String,
    pub guidance: String,
    pub created_at: DateTime<Utc>,
}

impl GuidanceRecord {
    pub fn new(name: &str, date: &str, guidance: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            date: date.to_string(),
            guidance,
            created_at: Utc::now(),
        }
    }
}

/// Projection used by list/find responses (no id, no created_at).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuidanceLite {
    pub name: String,
    pub date: String,
    pub guidance: String,
}

impl From<&GuidanceRecord> for GuidanceLite {
    fn from(r: &GuidanceRecord) -> Self {
        Self {
            name: r.name.clone(),
            date: r.date.clone(),
            guidance: r.guidance.clone(),
        }
    }
}

/// Validated from/to range driving one feed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// Missing bounds default to today. `from > to` is a validation error.
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Result<Self, PipelineError> {
        let today = Utc::now().date_naive();
        let from = match from {
            Some(s) if !s.trim().is_empty() => parse_flexible_date(s)
                .ok_or_else(|| PipelineError::Validation(format!("invalid 'from' date: {s:?}")))?,
            _ => today,
        };
        let to = match to {
            Some(s) if !s.trim().is_empty() => parse_flexible_date(s)
                .ok_or_else(|| PipelineError::Validation(format!("invalid 'to' date: {s:?}")))?,
            _ => today,
        };
        if from > to {
            return Err(PipelineError::Validation(format!(
                "'from' date ({from}) cannot be after 'to' date ({to})"
            )));
        }
        Ok(Self { from, to })
    }

    /// Compact `YYYYMMDD` pair, the format the feed API expects.
    pub fn compact(&self) -> (String, String) {
        (
            self.from.format("%Y%m%d").to_string(),
            self.to.format("%Y%m%d").to_string(),
        )
    }
}

/// Accepts the date formats observed from callers: ISO, DD-MM-YYYY,
/// MM/DD/YYYY, DD/MM/YYYY, compact YYYYMMDD, and long month names.
pub fn parse_flexible_date(s: &str) -> Option<NaiveDate> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%d",
        "%d-%m-%Y",
        "%m/%d/%Y",
        "%d/%m/%Y",
        "%Y%m%d",
        "%B %d, %Y",
        "%d %B %Y",
    ];
    let s = s.trim();
    for fmt in FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    // RFC 3339 timestamps also show up; take the date component.
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcement_date_part_strips_time() {
        let a = Announcement {
            news_date: "2025-10-18T15:04:05".into(),
            ..Default::default()
        };
        assert_eq!(a.date_part(), "2025-10-18");
    }

    #[test]
    fn flexible_date_accepts_known_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 10, 18).unwrap();
        for s in [
            "2025-10-18",
            "18-10-2025",
            "10/18/2025",
            "20251018",
            "October 18, 2025",
            "18 October 2025",
            "2025-10-18T00:00:00Z",
        ] {
            assert_eq!(parse_flexible_date(s), Some(expected), "failed for {s}");
        }
        assert_eq!(parse_flexible_date("not-a-date"), None);
    }

    #[test]
    fn range_rejects_from_after_to() {
        let err = DateRange::parse(Some("2025-10-19"), Some("2025-10-18")).unwrap_err();
        assert!(err.to_string().contains("cannot be after"));
    }

    #[test]
    fn range_defaults_missing_bounds_to_today() {
        let r = DateRange::parse(None, None).unwrap();
        assert_eq!(r.from, r.to);
    }

    #[test]
    fn compact_format_is_yyyymmdd() {
        let r = DateRange::parse(Some("2025-01-02"), Some("2025-01-03")).unwrap();
        assert_eq!(r.compact(), ("20250102".to_string(), "20250103".to_string()));
    }

    #[test]
    fn envelope_parses_feed_payload() {
        let json = r#"{
            "Table": [
                {"NEWSID":"n1","SLONGNAME":"Acme Ltd","NEWS_DT":"2025-10-18T10:00:00",
                 "ATTACHMENTNAME":"acme.pdf","SUBCATNAME":"Earnings Call Transcript"}
            ],
            "Table1": [{"ROWCNT": 1}]
        }"#;
        let env: AnnouncementEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(env.table.len(), 1);
        assert_eq!(env.table[0].issuer_name, "Acme Ltd");
        assert_eq!(env.table1[0].rowcnt, 1);
    }
}
