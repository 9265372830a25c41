use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use streamdeck::Client;

use crate::engine::{render_count, Service};
use crate::error::InboxError;

const PROJECTS_URL: &str = "https://api.todoist.com/rest/v2/projects";
const TASKS_URL: &str = "https://api.todoist.com/rest/v2/tasks";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TodoistSettings {
    pub api_token: String,
}

/// Count of tasks across the user's inbox projects (personal and team).
pub struct TodoistService {
    http: reqwest::Client,
    refresh: Duration,
}

#[derive(Debug, Deserialize)]
struct Project {
    id: String,
    #[serde(default)]
    is_inbox_project: bool,
    #[serde(default)]
    is_team_inbox: bool,
}

impl TodoistService {
    pub fn new(http: reqwest::Client, refresh: Duration) -> Self {
        Self { http, refresh }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        token: &str,
    ) -> Result<T, InboxError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .map_err(InboxError::from_http)?;
        if !response.status().is_success() {
            return Err(InboxError::from_status("todoist", response.status()));
        }
        response
            .json()
            .await
            .map_err(|e| InboxError::protocol(e.to_string()))
    }
}

#[async_trait]
impl Service for TodoistService {
    type Settings = TodoistSettings;
    type Output = u64;

    fn action_uuid(&self) -> &'static str {
        "ca.michaelabon.streamdeck-inboxes.todoist.action"
    }

    fn refresh_interval(&self) -> Duration {
        self.refresh
    }

    async fn fetch(&self, settings: &mut TodoistSettings) -> Result<u64, InboxError> {
        if settings.api_token.is_empty() {
            return Err(InboxError::missing_field("ApiToken"));
        }

        let projects: Vec<Project> = self
            .get_json(PROJECTS_URL, &[], &settings.api_token)
            .await?;

        let mut total: u64 = 0;
        for project in inbox_projects(&projects) {
            let tasks: Vec<serde_json::Value> = self
                .get_json(TASKS_URL, &[("project_id", project.id.as_str())], &settings.api_token)
                .await?;
            total += tasks.len() as u64;
        }

        Ok(total)
    }

    fn render(&self, client: &Client, outcome: Result<&u64, &InboxError>) -> Result<(), InboxError> {
        render_count(client, outcome.copied())
    }

    fn open_url(&self, _settings: &TodoistSettings, _result: &u64) -> Option<String> {
        Some("https://app.todoist.com/".to_string())
    }
}

fn inbox_projects(projects: &[Project]) -> impl Iterator<Item = &Project> {
    projects
        .iter()
        .filter(|p| p.is_inbox_project || p.is_team_inbox)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_decode_api_token() {
        let settings: TodoistSettings = serde_json::from_str(r#"{"apiToken":"t0ken"}"#).unwrap();
        assert_eq!(settings.api_token, "t0ken");
    }

    #[test]
    fn test_only_inbox_projects_are_counted() {
        let projects: Vec<Project> = serde_json::from_str(
            r#"[
                {"id": "1", "name": "Inbox", "is_inbox_project": true},
                {"id": "2", "name": "Work"},
                {"id": "3", "name": "Team Inbox", "is_team_inbox": true}
            ]"#,
        )
        .unwrap();

        let ids: Vec<&str> = inbox_projects(&projects).map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["1", "3"]);
    }
}
