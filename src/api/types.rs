use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::email::{EmailDetail, EmailId, EmailSummary, NO_CATEGORY, lenient_timestamp};

#[derive(Debug, Serialize)]
pub struct BulkRequest<'a> {
    pub email_ids: &'a [EmailId],
}

#[derive(Debug, Serialize)]
pub struct FetchRequest {
    pub limit: u32,
}

/// Body of `POST /fetch-emails`: the newest emails of every connected
/// account, grouped by the category the backend sorted them into.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchResponse {
    #[serde(default)]
    pub accounts: Vec<FetchedAccount>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchedAccount {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub categories: Vec<FetchedCategory>,
    /// Emails the backend has not categorized.
    #[serde(default)]
    pub raw_emails: Vec<FetchedEmail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchedCategory {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub emails: Vec<FetchedEmail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FetchedEmail {
    pub id: EmailId,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub received_at: Option<DateTime<Utc>>,
}

impl FetchedEmail {
    pub fn into_summary(self, account_id: &str, category: &str) -> EmailSummary {
        EmailSummary {
            id: self.id,
            account_id: account_id.to_string(),
            subject: self.subject,
            body_html: self.body,
            summary: self.summary,
            received_at: self.received_at,
            category: category.to_string(),
        }
    }
}

impl FetchedAccount {
    /// Flattens the groups into summaries for `account_id`, categorized
    /// ones first, uncategorized ones as `"none"`.
    pub fn into_summaries(self, account_id: &str) -> Vec<EmailSummary> {
        let mut out = Vec::new();
        for category in self.categories {
            let name = if category.name.is_empty() {
                NO_CATEGORY.to_string()
            } else {
                category.name
            };
            out.extend(
                category
                    .emails
                    .into_iter()
                    .map(|e| e.into_summary(account_id, &name)),
            );
        }
        out.extend(
            self.raw_emails
                .into_iter()
                .map(|e| e.into_summary(account_id, NO_CATEGORY)),
        );
        out
    }
}

#[derive(Debug, Serialize)]
pub struct DisconnectRequest<'a> {
    pub uid: &'a str,
}

/// Body of `POST /delete-emails`. Failures are counted, never inspected
/// beyond an optional id.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeleteResponse {
    #[serde(default)]
    pub successes: Vec<EmailId>,
    #[serde(default)]
    pub failures: Vec<serde_json::Value>,
}

impl DeleteResponse {
    /// Ids of failed items, when the backend reports them as strings or as
    /// objects with an `id` field.
    pub fn failed_ids(&self) -> Vec<EmailId> {
        self.failures
            .iter()
            .filter_map(|f| match f {
                serde_json::Value::String(id) => Some(id.clone()),
                serde_json::Value::Object(map) => {
                    map.get("id").and_then(|v| v.as_str()).map(str::to_string)
                }
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnsubscribeFailure {
    pub id: EmailId,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub error: String,
}

impl UnsubscribeFailure {
    pub fn display_name(&self) -> &str {
        self.subject
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.id)
    }
}

/// Body of `POST /unsubscribe-emails`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UnsubscribeResponse {
    #[serde(default)]
    pub success_ids: Vec<EmailId>,
    #[serde(default)]
    pub failures: Vec<UnsubscribeFailure>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecategorizeResponse {
    pub email: EmailDetail,
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenStatus {
    #[serde(default)]
    pub has_refresh_token: bool,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_failures_accept_ids_and_objects() {
        let r: DeleteResponse = serde_json::from_str(
            r#"{"successes":["a"],"failures":["b",{"id":"c","error":"x"},42]}"#,
        )
        .unwrap();
        assert_eq!(r.successes, vec!["a"]);
        assert_eq!(r.failures.len(), 3);
        assert_eq!(r.failed_ids(), vec!["b", "c"]);
    }

    #[test]
    fn unsubscribe_failure_falls_back_to_id() {
        let r: UnsubscribeResponse = serde_json::from_str(
            r#"{"success_ids":["a"],"failures":[{"id":"b","error":"no link found"},
                {"id":"c","subject":"Weekly deals","error":"timeout"}]}"#,
        )
        .unwrap();
        assert_eq!(r.failures[0].display_name(), "b");
        assert_eq!(r.failures[1].display_name(), "Weekly deals");
    }

    #[test]
    fn missing_lists_default_to_empty() {
        let r: UnsubscribeResponse = serde_json::from_str("{}").unwrap();
        assert!(r.success_ids.is_empty() && r.failures.is_empty());
    }

    #[test]
    fn fetch_response_flattens_groups() {
        let r: FetchResponse = serde_json::from_str(
            r#"{"accounts":[{"email":"me@example.com",
                "categories":[{"name":"Work","description":"job","emails":[
                    {"id":"e1","subject":"Standup","body":"<p>x</p>","received_at":"2024-05-01T10:00:00"}]}],
                "raw_emails":[{"id":"e2","subject":"Hello","body":"","hasReviewedByAI":false}]}]}"#,
        )
        .unwrap();
        let account = r.accounts.into_iter().next().unwrap();
        assert_eq!(account.email, "me@example.com");
        assert!(account.uid.is_none());

        let emails = account.into_summaries("u1");
        assert_eq!(emails.len(), 2);
        assert_eq!((emails[0].id.as_str(), emails[0].category.as_str()), ("e1", "Work"));
        assert!(emails[0].received_at.is_some());
        assert_eq!((emails[1].id.as_str(), emails[1].category.as_str()), ("e2", NO_CATEGORY));
        assert!(emails.iter().all(|e| e.account_id == "u1"));
    }
}
