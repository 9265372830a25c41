use std::time::Duration;

use async_imap::Session;
use async_native_tls::TlsStream;
use async_std::net::TcpStream;
use async_trait::async_trait;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::value::RawValue;
use streamdeck::Client;

use crate::engine::{render_count, Service};
use crate::error::InboxError;

const IMAP_SERVER: &str = "imap.gmail.com";
const IMAP_PORT: u16 = 993;

/// The mailbox monitored when no label is configured.
pub const DEFAULT_MAILBOX: &str = "INBOX";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GmailSettings {
    #[serde(alias = "Username")]
    pub username: String,
    #[serde(alias = "Password")]
    pub password: String,
    /// Gmail label/mailbox to monitor; empty means [`DEFAULT_MAILBOX`].
    #[serde(alias = "Label")]
    pub label: String,
}

impl GmailSettings {
    fn mailbox(&self) -> &str {
        if self.label.is_empty() {
            DEFAULT_MAILBOX
        } else {
            &self.label
        }
    }
}

/// Unseen count of one Gmail mailbox, checked over IMAP.
pub struct GmailService {
    refresh: Duration,
    timeout: Duration,
}

type ImapSession = Session<TlsStream<TcpStream>>;

impl GmailService {
    pub fn new(refresh: Duration, timeout: Duration) -> Self {
        Self { refresh, timeout }
    }

    fn check_credentials(settings: &GmailSettings) -> Result<(), InboxError> {
        if settings.username.is_empty() {
            return Err(InboxError::missing_field("Username"));
        }
        if settings.password.is_empty() {
            return Err(InboxError::missing_field("Password"));
        }
        Ok(())
    }

    async fn connect(&self, settings: &GmailSettings) -> Result<ImapSession, InboxError> {
        let tcp = TcpStream::connect((IMAP_SERVER, IMAP_PORT))
            .await
            .map_err(|e| InboxError::unavailable(format!("imap dial failed: {e}")))?;
        let tls = async_native_tls::TlsConnector::new();
        let tls_stream = tls
            .connect(IMAP_SERVER, tcp)
            .await
            .map_err(|e| InboxError::unavailable(format!("tls handshake failed: {e}")))?;

        let client = async_imap::Client::new(tls_stream);
        client
            .login(&settings.username, &settings.password)
            .await
            .map_err(|(e, _)| InboxError::rejected(format!("imap login failed: {e}")))
    }

    async fn unseen_count(&self, settings: &GmailSettings) -> Result<u64, InboxError> {
        let mut session = self.connect(settings).await?;
        let status = session
            .status(settings.mailbox(), "(UNSEEN)")
            .await
            .map_err(|e| {
                InboxError::protocol(format!(
                    "unable to get status of {}: {e}",
                    settings.mailbox()
                ))
            })?;
        if let Err(e) = session.logout().await {
            tracing::debug!("imap logout failed: {e}");
        }
        Ok(u64::from(status.unseen.unwrap_or(0)))
    }

    /// All mailbox names for the account, INBOX first, rest alphabetical.
    /// Feeds the property inspector's label picker.
    async fn fetch_labels(&self, settings: &GmailSettings) -> Result<Vec<String>, InboxError> {
        Self::check_credentials(settings)?;

        let mut session = self.connect(settings).await?;
        let mut labels = Vec::new();
        {
            let mut names = session
                .list(None, Some("*"))
                .await
                .map_err(|e| InboxError::unavailable(format!("imap list failed: {e}")))?;
            while let Some(name) = names
                .try_next()
                .await
                .map_err(|e| InboxError::unavailable(format!("imap list failed: {e}")))?
            {
                labels.push(name.name().to_string());
            }
        }
        if let Err(e) = session.logout().await {
            tracing::debug!("imap logout failed: {e}");
        }

        labels.sort();
        if let Some(pos) = labels.iter().position(|label| label == DEFAULT_MAILBOX) {
            if pos > 0 {
                let inbox = labels.remove(pos);
                labels.insert(0, inbox);
            }
        }
        Ok(labels)
    }
}

#[derive(Debug, Deserialize)]
struct InspectorRequest {
    #[serde(default)]
    action: String,
}

#[async_trait]
impl Service for GmailService {
    type Settings = GmailSettings;
    type Output = u64;

    fn action_uuid(&self) -> &'static str {
        "ca.michaelabon.streamdeck-inboxes.gmail.action"
    }

    fn refresh_interval(&self) -> Duration {
        self.refresh
    }

    async fn fetch(&self, settings: &mut GmailSettings) -> Result<u64, InboxError> {
        Self::check_credentials(settings)?;

        tokio::time::timeout(self.timeout, self.unseen_count(settings))
            .await
            .map_err(|_| InboxError::unavailable("imap status timed out"))?
    }

    fn render(&self, client: &Client, outcome: Result<&u64, &InboxError>) -> Result<(), InboxError> {
        render_count(client, outcome.copied())
    }

    fn open_url(&self, settings: &GmailSettings, _result: &u64) -> Option<String> {
        let base = format!(
            "https://mail.google.com/mail/u/0/?authuser={}",
            settings.username
        );

        let label = settings.mailbox();
        if label == DEFAULT_MAILBOX {
            return Some(base + "#inbox");
        }

        let fragment = match label {
            "[Gmail]/Starred" => "#starred",
            "[Gmail]/Sent Mail" => "#sent",
            "[Gmail]/Drafts" => "#drafts",
            "[Gmail]/All Mail" => "#all",
            "[Gmail]/Spam" => "#spam",
            "[Gmail]/Trash" => "#trash",
            "[Gmail]/Important" => "#imp",
            _ => return Some(format!("{base}#label/{}", urlencoding::encode(label))),
        };
        Some(base + fragment)
    }

    async fn property_inspector(
        &self,
        settings: &GmailSettings,
        payload: &RawValue,
    ) -> Option<Result<serde_json::Value, InboxError>> {
        let request: InspectorRequest = match serde_json::from_str(payload.get()) {
            Ok(request) => request,
            Err(err) => return Some(Err(InboxError::MalformedSettings(err))),
        };

        match request.action.as_str() {
            "fetchLabels" => {
                let response = match tokio::time::timeout(self.timeout, self.fetch_labels(settings))
                    .await
                    .unwrap_or_else(|_| Err(InboxError::unavailable("imap list timed out")))
                {
                    Ok(labels) => serde_json::json!({
                        "action": "fetchLabels",
                        "labels": labels,
                    }),
                    // The inspector renders the failure inline; this is an
                    // answer, not a transport error.
                    Err(err) => serde_json::json!({
                        "action": "fetchLabels",
                        "error": err.to_string(),
                    }),
                };
                Some(Ok(response))
            }
            _ => None,
        }
    }
}
