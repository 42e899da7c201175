use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

pub type EmailId = String;
pub type AccountId = String;

/// Category value the backend uses for emails it has not sorted yet.
pub const NO_CATEGORY: &str = "none";

/// Key used in the unread index for emails without a category.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// One email as shown in the dashboard lists.
///
/// The serde names follow the live-channel message shape, so the same type
/// parses push events and round-trips through the persisted cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSummary {
    pub id: EmailId,
    #[serde(rename = "account")]
    pub account_id: AccountId,
    #[serde(default)]
    pub subject: String,
    #[serde(rename = "body", default)]
    pub body_html: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default = "default_category", deserialize_with = "category_or_none")]
    pub category: String,
}

impl EmailSummary {
    /// Category name used for badge counts.
    pub fn category_key(&self) -> &str {
        category_key(&self.category)
    }
}

pub fn category_key(category: &str) -> &str {
    if category.is_empty() || category == NO_CATEGORY {
        UNCATEGORIZED
    } else {
        category
    }
}

fn default_category() -> String {
    NO_CATEGORY.to_string()
}

fn category_or_none<'de, D>(de: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let v: Option<String> = Option::deserialize(de)?;
    Ok(v.filter(|s| !s.is_empty()).unwrap_or_else(default_category))
}

/// RFC 3339 first, then a naive `YYYY-MM-DD[T ]HH:MM:SS[.f]` read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Missing, null or unreadable timestamps become `None` instead of failing
/// the whole record.
pub(crate) fn lenient_timestamp<'de, D>(de: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(de)?;
    Ok(raw.as_deref().and_then(|s| {
        let parsed = parse_timestamp(s);
        if parsed.is_none() {
            log::debug!("ignoring unreadable timestamp {s:?}");
        }
        parsed
    }))
}

/// Full email as returned by `GET /emails/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailDetail {
    pub id: EmailId,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default = "default_category", deserialize_with = "category_or_none")]
    pub category: String,
    #[serde(default)]
    pub account: AccountId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_push_message() {
        let raw = r#"{"account":"u1","id":"e1","subject":"Hi","body":"<p>x</p>",
            "summary":"short","received_at":"2024-05-01T10:00:00Z","category":"Work"}"#;
        let e: EmailSummary = serde_json::from_str(raw).unwrap();
        assert_eq!(e.account_id, "u1");
        assert_eq!(e.body_html, "<p>x</p>");
        assert_eq!(e.summary.as_deref(), Some("short"));
        assert_eq!(e.category_key(), "Work");
    }

    #[test]
    fn missing_or_null_category_is_uncategorized() {
        let raw = r#"{"account":"u1","id":"e1","received_at":"2024-05-01T10:00:00+00:00","category":null}"#;
        let e: EmailSummary = serde_json::from_str(raw).unwrap();
        assert_eq!(e.category, NO_CATEGORY);
        assert_eq!(e.category_key(), UNCATEGORIZED);

        let raw = r#"{"account":"u1","id":"e2","received_at":"2024-05-01T10:00:00Z"}"#;
        let e: EmailSummary = serde_json::from_str(raw).unwrap();
        assert_eq!(e.category_key(), UNCATEGORIZED);
    }

    #[test]
    fn naive_timestamp_is_read_as_utc() {
        let raw = r#"{"account":"u1","id":"e1","received_at":"2024-05-01T10:00:00"}"#;
        let e: EmailSummary = serde_json::from_str(raw).unwrap();
        assert_eq!(e.received_at, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).single());

        assert_eq!(
            parse_timestamp("2024-05-01 10:00:00.250").map(|t| t.timestamp_millis()),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap().timestamp_millis() + 250)
        );
        assert_eq!(
            parse_timestamp("2024-05-01T12:00:00+02:00"),
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).single()
        );
    }

    #[test]
    fn null_missing_or_garbled_timestamp_keeps_the_email() {
        for raw in [
            r#"{"account":"u1","id":"e1","received_at":null}"#,
            r#"{"account":"u1","id":"e1"}"#,
            r#"{"account":"u1","id":"e1","received_at":"yesterday"}"#,
        ] {
            let e: EmailSummary = serde_json::from_str(raw).unwrap();
            assert_eq!(e.id, "e1");
            assert!(e.received_at.is_none());
        }
    }

    #[test]
    fn cached_summary_reads_back() {
        let raw = r#"{"account":"u1","id":"e1","received_at":"2024-05-01T10:00:00"}"#;
        let e: EmailSummary = serde_json::from_str(raw).unwrap();
        let back: EmailSummary = serde_json::from_str(&serde_json::to_string(&e).unwrap()).unwrap();
        assert_eq!(back, e);
    }
}
