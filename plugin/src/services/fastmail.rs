use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de, Deserialize, Deserializer};
use streamdeck::Client;

use crate::engine::{render_count, Service};
use crate::error::InboxError;

const SESSION_URL: &str = "https://api.fastmail.com/jmap/session";
const API_URL: &str = "https://api.fastmail.com/jmap/api";
const JMAP_MAIL_URN: &str = "urn:ietf:params:jmap:mail";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FastmailSettings {
    pub api_token: String,
}

/// Unread count of the JMAP inbox mailbox.
pub struct FastmailService {
    http: reqwest::Client,
    refresh: Duration,
}

impl FastmailService {
    pub fn new(http: reqwest::Client, refresh: Duration) -> Self {
        Self { http, refresh }
    }

    async fn get_session(&self, token: &str) -> Result<SessionResponse, InboxError> {
        let response = self
            .http
            .get(SESSION_URL)
            .bearer_auth(token)
            .send()
            .await
            .map_err(InboxError::from_http)?;
        if !response.status().is_success() {
            return Err(InboxError::from_status("fastmail", response.status()));
        }
        response
            .json()
            .await
            .map_err(|e| InboxError::protocol(e.to_string()))
    }

    async fn get_mailboxes(
        &self,
        token: &str,
        account_id: &str,
    ) -> Result<ApiResponse, InboxError> {
        let body = serde_json::json!({
            "using": ["urn:ietf:params:jmap:core", JMAP_MAIL_URN],
            "methodCalls": [[
                "Mailbox/get",
                { "accountId": account_id, "ids": null },
                "0"
            ]]
        });

        let response = self
            .http
            .post(API_URL)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(InboxError::from_http)?;
        if !response.status().is_success() {
            return Err(InboxError::from_status("fastmail", response.status()));
        }
        response
            .json()
            .await
            .map_err(|e| InboxError::protocol(e.to_string()))
    }
}

#[async_trait]
impl Service for FastmailService {
    type Settings = FastmailSettings;
    type Output = u64;

    fn action_uuid(&self) -> &'static str {
        "ca.michaelabon.streamdeck-inboxes.fastmail.action"
    }

    fn refresh_interval(&self) -> Duration {
        self.refresh
    }

    async fn fetch(&self, settings: &mut FastmailSettings) -> Result<u64, InboxError> {
        if settings.api_token.is_empty() {
            return Err(InboxError::missing_field("ApiToken"));
        }

        let session = self.get_session(&settings.api_token).await?;
        let account_id = session
            .primary_accounts
            .get(JMAP_MAIL_URN)
            .ok_or_else(|| InboxError::protocol("no primary mail account in JMAP session"))?;

        tracing::debug!(account_id, "resolved fastmail primary account");

        let api = self.get_mailboxes(&settings.api_token, account_id).await?;
        let invocation = api
            .method_responses
            .first()
            .ok_or_else(|| InboxError::protocol("empty JMAP method responses"))?;
        if invocation.name != "Mailbox/get" {
            return Err(InboxError::protocol(format!(
                "unexpected JMAP method response: {}",
                invocation.name
            )));
        }

        invocation
            .args
            .list
            .iter()
            .find(|mailbox| mailbox.role.as_deref() == Some("inbox"))
            .map(|mailbox| mailbox.unread_emails)
            .ok_or_else(|| InboxError::protocol("unable to find inbox in Mailbox/get response"))
    }

    fn render(&self, client: &Client, outcome: Result<&u64, &InboxError>) -> Result<(), InboxError> {
        render_count(client, outcome.copied())
    }

    fn open_url(&self, _settings: &FastmailSettings, _result: &u64) -> Option<String> {
        Some("https://app.fastmail.com/mail/Inbox".to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SessionResponse {
    primary_accounts: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ApiResponse {
    method_responses: Vec<Invocation>,
}

/// JMAP invocations are `[name, arguments, callId]` triplets on the wire.
#[derive(Debug)]
struct Invocation {
    name: String,
    args: MailboxGetResponse,
    #[allow(dead_code)]
    call_id: String,
}

impl<'de> Deserialize<'de> for Invocation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let parts: Vec<serde_json::Value> = Vec::deserialize(deserializer)?;
        if parts.len() != 3 {
            return Err(de::Error::custom(
                "malformed JMAP invocation: need exactly 3 elements",
            ));
        }
        let mut parts = parts.into_iter();
        let name = serde_json::from_value(parts.next().unwrap_or_default())
            .map_err(de::Error::custom)?;
        let args = serde_json::from_value(parts.next().unwrap_or_default())
            .map_err(de::Error::custom)?;
        let call_id = serde_json::from_value(parts.next().unwrap_or_default())
            .map_err(de::Error::custom)?;
        Ok(Invocation {
            name,
            args,
            call_id,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MailboxGetResponse {
    account_id: String,
    list: Vec<Mailbox>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Mailbox {
    role: Option<String>,
    unread_emails: u64,
}
