use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use streamdeck::Client;

use crate::display::{encode_svg, pad_right};
use crate::engine::{Service, DEFAULT_STATE, GOLD_STATE};
use crate::error::InboxError;

const PER_PAGE: &str = "20";
const PAGINATION: &str = "keyset";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GitLabSettings {
    #[serde(rename = "personalAccessToken")]
    pub personal_access_token: String,
    pub server: String,
    /// Resolved from `/user` on the first fetch and cached through the
    /// registry write-back, like YNAB's routing hint.
    #[serde(skip)]
    pub username: String,
    #[serde(skip)]
    pub user_id: u64,
}

/// The four per-category counts shown on the badge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GitLabResult {
    pub assigned_issues: u64,
    pub assigned_mrs: u64,
    pub review_mrs: u64,
    pub todos: u64,
}

impl GitLabResult {
    pub fn total(&self) -> u64 {
        self.assigned_issues + self.assigned_mrs + self.review_mrs + self.todos
    }
}

pub struct GitLabService {
    http: reqwest::Client,
    refresh: Duration,
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: u64,
    username: String,
}

impl GitLabService {
    pub fn new(http: reqwest::Client, refresh: Duration) -> Self {
        Self { http, refresh }
    }

    fn api_url(server: &str, path: &[&str]) -> Result<reqwest::Url, InboxError> {
        let mut url = reqwest::Url::parse(server)
            .map_err(|e| InboxError::rejected(format!("invalid server url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| InboxError::rejected("server url cannot be a base"))?
            .pop_if_empty()
            .extend(["api", "v4"].iter().chain(path));
        Ok(url)
    }

    async fn current_user(&self, settings: &GitLabSettings) -> Result<CurrentUser, InboxError> {
        let url = Self::api_url(&settings.server, &["user"])?;
        let response = self
            .http
            .get(url)
            .header("PRIVATE-TOKEN", &settings.personal_access_token)
            .send()
            .await
            .map_err(InboxError::from_http)?;
        if !response.status().is_success() {
            return Err(InboxError::from_status("gitlab", response.status()));
        }
        response
            .json()
            .await
            .map_err(|e| InboxError::protocol(e.to_string()))
    }

    /// Count every item across all keyset pages of a list endpoint.
    async fn count_paginated(
        &self,
        first: reqwest::Url,
        token: &str,
    ) -> Result<u64, InboxError> {
        let mut total: u64 = 0;
        let mut next = Some(first);

        while let Some(url) = next.take() {
            let response = self
                .http
                .get(url)
                .header("PRIVATE-TOKEN", token)
                .send()
                .await
                .map_err(InboxError::from_http)?;
            if !response.status().is_success() {
                return Err(InboxError::from_status("gitlab", response.status()));
            }

            next = response
                .headers()
                .get(reqwest::header::LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_next_link)
                .map(|link| reqwest::Url::parse(&link))
                .transpose()
                .map_err(|e| InboxError::protocol(format!("bad Link header: {e}")))?;

            let items: Vec<serde_json::Value> = response
                .json()
                .await
                .map_err(|e| InboxError::protocol(e.to_string()))?;
            total += items.len() as u64;
        }

        Ok(total)
    }

    async fn count_listing(
        &self,
        settings: &GitLabSettings,
        path: &[&str],
        query: &[(&str, &str)],
    ) -> Result<u64, InboxError> {
        let mut url = Self::api_url(&settings.server, path)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("per_page", PER_PAGE);
            pairs.append_pair("pagination", PAGINATION);
        }
        self.count_paginated(url, &settings.personal_access_token)
            .await
    }
}

/// Pull the `rel="next"` target out of an RFC 5988 Link header.
fn parse_next_link(header: &str) -> Option<String> {
    for part in header.split(',') {
        let mut sections = part.trim().split(';');
        let target = sections.next()?.trim();
        let is_next = sections
            .any(|param| param.trim().eq_ignore_ascii_case(r#"rel="next""#));
        if is_next && target.starts_with('<') && target.ends_with('>') {
            return Some(target[1..target.len() - 1].to_string());
        }
    }
    None
}

#[async_trait]
impl Service for GitLabService {
    type Settings = GitLabSettings;
    type Output = GitLabResult;

    fn action_uuid(&self) -> &'static str {
        "ca.michaelabon.streamdeck-inboxes.gitlab.action"
    }

    fn refresh_interval(&self) -> Duration {
        self.refresh
    }

    async fn fetch(&self, settings: &mut GitLabSettings) -> Result<GitLabResult, InboxError> {
        if settings.personal_access_token.is_empty() {
            return Err(InboxError::missing_field("PersonalAccessToken"));
        }
        if settings.server.is_empty() {
            return Err(InboxError::missing_field("Server"));
        }

        if settings.user_id == 0 || settings.username.is_empty() {
            let user = self.current_user(settings).await?;
            settings.username = user.username;
            settings.user_id = user.id;
        }
        let user_id = settings.user_id.to_string();

        let assigned_issues = self
            .count_listing(
                settings,
                &["issues"],
                &[
                    ("assignee_username", settings.username.as_str()),
                    ("state", "opened"),
                    ("scope", "all"),
                ],
            )
            .await?;

        let assigned_mrs = self
            .count_listing(
                settings,
                &["merge_requests"],
                &[
                    ("assignee_id", user_id.as_str()),
                    ("state", "opened"),
                    ("scope", "all"),
                ],
            )
            .await?;

        let review_mrs = self
            .count_listing(
                settings,
                &["merge_requests"],
                &[
                    ("reviewer_id", user_id.as_str()),
                    ("state", "opened"),
                    ("scope", "all"),
                ],
            )
            .await?;

        let todos = self.count_listing(settings, &["todos"], &[]).await?;

        Ok(GitLabResult {
            assigned_issues,
            assigned_mrs,
            review_mrs,
            todos,
        })
    }

    fn render(
        &self,
        client: &Client,
        outcome: Result<&GitLabResult, &InboxError>,
    ) -> Result<(), InboxError> {
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                let shown = client
                    .set_title(&pad_right("!"))
                    .and_then(|()| client.set_state(DEFAULT_STATE))
                    .and_then(|()| client.set_image(""));
                if let Err(display_err) = shown {
                    return Err(InboxError::DisplayUpdateFailed(format!(
                        "{display_err} -- while reporting: {err}"
                    )));
                }
                return Ok(());
            }
        };

        let state = if result.total() == 0 {
            GOLD_STATE
        } else {
            DEFAULT_STATE
        };
        client.set_state(state)?;
        client.set_title("")?;
        client.set_image(&encode_svg(&badge_svg(result)))?;
        Ok(())
    }

    fn open_url(&self, settings: &GitLabSettings, result: &GitLabResult) -> Option<String> {
        if settings.server.is_empty() {
            return None;
        }
        let Ok(mut url) = reqwest::Url::parse(&settings.server) else {
            return Some(settings.server.clone());
        };

        // Jump to the most actionable category first.
        if result.todos > 0 {
            url.set_path("/dashboard/todos");
        } else if result.review_mrs > 0 {
            url.set_path("/dashboard/merge_requests");
            url.query_pairs_mut()
                .append_pair("reviewer_username", &settings.username);
        } else if result.assigned_mrs > 0 {
            url.set_path("/dashboard/merge_requests");
            url.query_pairs_mut()
                .append_pair("assignee_username", &settings.username);
        } else if result.assigned_issues > 0 {
            url.set_path("/dashboard/issues");
            url.query_pairs_mut()
                .append_pair("state", "opened")
                .append_pair("assignee_username[]", &settings.username);
        } else {
            url.set_path("/dashboard/projects/starred");
        }

        Some(url.to_string())
    }
}

/// Three-row badge: issues, merge requests (assigned + review), todos.
fn badge_svg(result: &GitLabResult) -> String {
    let mrs = result.assigned_mrs + result.review_mrs;
    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 144 144"><circle cx="28" cy="32" r="10" fill="#fc6d26"/><text x="48" y="42" font-family="sans-serif" font-size="30" fill="#fff">{issues}</text><circle cx="28" cy="76" r="10" fill="#fca326"/><text x="48" y="86" font-family="sans-serif" font-size="30" fill="#fff">{mrs}</text><circle cx="28" cy="120" r="10" fill="#e24329"/><text x="48" y="130" font-family="sans-serif" font-size="30" fill="#fff">{todos}</text></svg>"##,
        issues = result.assigned_issues,
        mrs = mrs,
        todos = result.todos,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn service() -> GitLabService {
        GitLabService::new(reqwest::Client::new(), Duration::from_secs(60))
    }

    fn settings() -> GitLabSettings {
        GitLabSettings {
            personal_access_token: "glpat-x".to_string(),
            server: "https://gitlab.example.com".to_string(),
            username: "dev".to_string(),
            user_id: 42,
        }
    }

    #[test]
    fn test_parse_next_link_finds_rel_next() {
        let header = r#"<https://gitlab.example.com/api/v4/issues?cursor=abc>; rel="next", <https://gitlab.example.com/api/v4/issues>; rel="first""#;
        assert_eq!(
            parse_next_link(header).unwrap(),
            "https://gitlab.example.com/api/v4/issues?cursor=abc"
        );
    }

    #[test]
    fn test_parse_next_link_absent_on_last_page() {
        let header = r#"<https://gitlab.example.com/api/v4/issues>; rel="first""#;
        assert_eq!(parse_next_link(header), None);
    }

    #[test]
    fn test_api_url_keeps_server_prefix() {
        let url = GitLabService::api_url("https://gitlab.example.com/", &["todos"]).unwrap();
        assert_eq!(url.as_str(), "https://gitlab.example.com/api/v4/todos");
    }

    #[test]
    fn test_open_url_priority_order() {
        let service = service();
        let settings = settings();

        let todos = GitLabResult {
            todos: 2,
            review_mrs: 1,
            ..Default::default()
        };
        assert_eq!(
            service.open_url(&settings, &todos).unwrap(),
            "https://gitlab.example.com/dashboard/todos"
        );

        let review = GitLabResult {
            review_mrs: 1,
            assigned_mrs: 3,
            ..Default::default()
        };
        assert_eq!(
            service.open_url(&settings, &review).unwrap(),
            "https://gitlab.example.com/dashboard/merge_requests?reviewer_username=dev"
        );

        let assigned = GitLabResult {
            assigned_issues: 4,
            ..Default::default()
        };
        assert_eq!(
            service.open_url(&settings, &assigned).unwrap(),
            "https://gitlab.example.com/dashboard/issues?state=opened&assignee_username%5B%5D=dev"
        );

        let empty = GitLabResult::default();
        assert_eq!(
            service.open_url(&settings, &empty).unwrap(),
            "https://gitlab.example.com/dashboard/projects/starred"
        );
    }

    #[test]
    fn test_badge_shows_merged_mr_count() {
        let badge = badge_svg(&GitLabResult {
            assigned_issues: 1,
            assigned_mrs: 2,
            review_mrs: 3,
            todos: 4,
        });
        assert!(badge.contains(">1</text>"));
        assert!(badge.contains(">5</text>"));
        assert!(badge.contains(">4</text>"));
    }

    #[test]
    fn test_error_render_blanks_the_badge() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = streamdeck::CommandSink::new(tx).for_context("B1");
        let err = InboxError::missing_field("Server");

        service().render(&client, Err(&err)).unwrap();

        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
            events.push(json["event"].as_str().unwrap().to_string());
        }
        assert_eq!(events, ["setTitle", "setState", "setImage"]);
    }
}
