use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use streamdeck::Client;

use crate::engine::{render_count, Service};
use crate::error::InboxError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct YnabSettings {
    pub budget_uuid: String,
    #[serde(rename = "apiToken")]
    pub personal_access_token: String,
    /// Routing hint cached from the last fetch; never part of the host
    /// settings JSON. Persisted through the registry write-back so a key
    /// press can deep-link without a fresh fetch.
    #[serde(skip)]
    pub next_account_id: String,
}

/// Count of unapproved transactions plus the account to jump to on press.
#[derive(Debug, Clone, Default)]
pub struct YnabResult {
    pub count: u64,
    pub next_account_id: String,
}

pub struct YnabService {
    http: reqwest::Client,
    refresh: Duration,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    account_name: String,
    account_id: String,
}

#[derive(Debug, Deserialize)]
struct TransactionsData {
    transactions: Vec<Transaction>,
}

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    data: TransactionsData,
}

/// Accounts whose names carry these prefixes are deferred/managed and do
/// not count as pending work.
fn is_ignored_account(name: &str) -> bool {
    name.starts_with("[D]") || name.starts_with("[MD]")
}

fn summarize(response: TransactionsResponse) -> YnabResult {
    let pending: Vec<Transaction> = response
        .data
        .transactions
        .into_iter()
        .filter(|t| !is_ignored_account(&t.account_name))
        .collect();

    YnabResult {
        count: pending.len() as u64,
        next_account_id: pending
            .first()
            .map(|t| t.account_id.clone())
            .unwrap_or_default(),
    }
}

impl YnabService {
    pub fn new(http: reqwest::Client, refresh: Duration) -> Self {
        Self { http, refresh }
    }
}

#[async_trait]
impl Service for YnabService {
    type Settings = YnabSettings;
    type Output = YnabResult;

    fn action_uuid(&self) -> &'static str {
        "ca.michaelabon.streamdeck-inboxes.ynab.action"
    }

    fn refresh_interval(&self) -> Duration {
        self.refresh
    }

    async fn fetch(&self, settings: &mut YnabSettings) -> Result<YnabResult, InboxError> {
        if settings.budget_uuid.is_empty() {
            return Err(InboxError::missing_field("BudgetUuid"));
        }
        if settings.personal_access_token.is_empty() {
            return Err(InboxError::missing_field("PersonalAccessToken"));
        }

        let url = format!(
            "https://api.ynab.com/v1/budgets/{}/transactions?type=unapproved",
            settings.budget_uuid
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(&settings.personal_access_token)
            .send()
            .await
            .map_err(InboxError::from_http)?;
        if !response.status().is_success() {
            return Err(InboxError::from_status("ynab", response.status()));
        }
        let transactions: TransactionsResponse = response
            .json()
            .await
            .map_err(|e| InboxError::protocol(e.to_string()))?;

        let result = summarize(transactions);
        // Documented side effect: the routing hint rides along in settings
        // so it survives in the registry for the next key press.
        settings.next_account_id = result.next_account_id.clone();
        Ok(result)
    }

    fn render(
        &self,
        client: &Client,
        outcome: Result<&YnabResult, &InboxError>,
    ) -> Result<(), InboxError> {
        render_count(client, outcome.map(|result| result.count))
    }

    fn open_url(&self, settings: &YnabSettings, result: &YnabResult) -> Option<String> {
        let base = "https://app.ynab.com/";
        if settings.budget_uuid.is_empty() {
            return Some(base.to_string());
        }

        let mut url = format!("{base}{}/accounts", settings.budget_uuid);
        if !result.next_account_id.is_empty() {
            url.push('/');
            url.push_str(&result.next_account_id);
        }
        Some(url)
    }
}
