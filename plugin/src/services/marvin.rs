use std::time::Duration;

use async_trait::async_trait;
use serde::{de, Deserialize, Deserializer};
use streamdeck::Client;

use crate::engine::{render_count, Service};
use crate::error::InboxError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "lowercase")]
pub struct MarvinSettings {
    pub server: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

/// Count of unassigned, not-done, non-recurring tasks in the Amazing Marvin
/// CouchDB database.
pub struct MarvinService {
    http: reqwest::Client,
    refresh: Duration,
}

/// Marvin's `parentId` arrives in several shapes: a plain string (a UUID or
/// `"unassigned"`), a literal null, an empty string, or an `{op, val}`
/// object. Each known shape is tried in order; anything else is an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentId(pub String);

impl<'de> Deserialize<'de> for ParentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wrapped {
            val: String,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Text(String),
            Object(Wrapped),
            Null(Option<()>),
        }

        match Shape::deserialize(deserializer) {
            Ok(Shape::Text(s)) => Ok(ParentId(s)),
            Ok(Shape::Object(w)) => Ok(ParentId(w.val)),
            Ok(Shape::Null(_)) => Ok(ParentId::default()),
            Err(_) => Err(de::Error::custom("parentId: unrecognized shape")),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TaskDoc {
    title: String,
    db: String,
    done: bool,
    recurring: bool,
    #[serde(rename = "parentId")]
    parent_id: ParentId,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Row {
    doc: TaskDoc,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AllDocsResponse {
    rows: Vec<Row>,
}

fn count_inbox_tasks(response: &AllDocsResponse) -> u64 {
    response
        .rows
        .iter()
        .filter(|row| {
            let task = &row.doc;
            !task.title.is_empty()
                && task.db == "Tasks"
                && task.parent_id.0 == "unassigned"
                && !task.done
                && !task.recurring
        })
        .count() as u64
}

impl MarvinService {
    pub fn new(http: reqwest::Client, refresh: Duration) -> Self {
        Self { http, refresh }
    }
}

#[async_trait]
impl Service for MarvinService {
    type Settings = MarvinSettings;
    type Output = u64;

    fn action_uuid(&self) -> &'static str {
        "ca.michaelabon.streamdeck-inboxes.marvin.action"
    }

    fn refresh_interval(&self) -> Duration {
        self.refresh
    }

    async fn fetch(&self, settings: &mut MarvinSettings) -> Result<u64, InboxError> {
        if settings.server.is_empty() {
            return Err(InboxError::missing_field("Server"));
        }
        if settings.database.is_empty() {
            return Err(InboxError::missing_field("Database"));
        }
        if settings.user.is_empty() {
            return Err(InboxError::missing_field("User"));
        }
        if settings.password.is_empty() {
            return Err(InboxError::missing_field("Password"));
        }

        let mut url = reqwest::Url::parse(&settings.server)
            .map_err(|e| InboxError::rejected(format!("invalid server url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| InboxError::rejected("server url cannot be a base"))?
            .push(&settings.database)
            .push("_all_docs");
        url.query_pairs_mut().append_pair("include_docs", "true");

        let response = self
            .http
            .get(url)
            .basic_auth(&settings.user, Some(&settings.password))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(InboxError::from_http)?;
        if !response.status().is_success() {
            return Err(InboxError::from_status("marvin", response.status()));
        }

        let docs: AllDocsResponse = response
            .json()
            .await
            .map_err(|e| InboxError::protocol(e.to_string()))?;

        Ok(count_inbox_tasks(&docs))
    }

    fn render(&self, client: &Client, outcome: Result<&u64, &InboxError>) -> Result<(), InboxError> {
        render_count(client, outcome.copied())
    }

    fn open_url(&self, _settings: &MarvinSettings, _result: &u64) -> Option<String> {
        Some("https://app.amazingmarvin.com".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_id_decodes_all_known_shapes() {
        let plain: ParentId = serde_json::from_str(r#""unassigned""#).unwrap();
        assert_eq!(plain, ParentId("unassigned".to_string()));

        let uuid: ParentId = serde_json::from_str(r#""3c6f-41aa""#).unwrap();
        assert_eq!(uuid, ParentId("3c6f-41aa".to_string()));

        let null: ParentId = serde_json::from_str("null").unwrap();
        assert_eq!(null, ParentId::default());

        let object: ParentId = serde_json::from_str(r#"{"op": "set", "val": "p-1"}"#).unwrap();
        assert_eq!(object, ParentId("p-1".to_string()));
    }

    #[test]
    fn test_parent_id_rejects_unknown_shapes() {
        assert!(serde_json::from_str::<ParentId>("42").is_err());
        assert!(serde_json::from_str::<ParentId>("[1, 2]").is_err());
    }

    #[test]
    fn test_counts_only_unassigned_open_tasks() {
        let response: AllDocsResponse = serde_json::from_str(
            r#"{
                "total_rows": 6,
                "rows": [
                    {"doc": {"title": "Keep me", "db": "Tasks", "parentId": "unassigned"}},
                    {"doc": {"title": "Wrong db", "db": "Projects", "parentId": "unassigned"}},
                    {"doc": {"title": "Assigned", "db": "Tasks", "parentId": "abc-123"}},
                    {"doc": {"title": "Done", "db": "Tasks", "parentId": "unassigned", "done": true}},
                    {"doc": {"title": "Recurring", "db": "Tasks", "parentId": "unassigned", "recurring": true}},
                    {"doc": {"title": "", "db": "Tasks", "parentId": "unassigned"}},
                    {"doc": {"title": "Wrapped", "db": "Tasks", "parentId": {"op": "eq", "val": "unassigned"}}}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(count_inbox_tasks(&response), 2);
    }

    #[test]
    fn test_settings_decode_lowercase_fields() {
        let settings: MarvinSettings = serde_json::from_str(
            r#"{"server": "https://couch.example.com", "database": "marvin", "user": "u", "password": "p"}"#,
        )
        .unwrap();
        assert_eq!(settings.database, "marvin");
    }
}
