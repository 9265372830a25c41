use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use streamdeck::Client;

use crate::error::InboxError;

/// Contract every inbox backend satisfies. Implement this to add a new
/// inbox type; `Registration` supplies all lifecycle behavior.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Backend-specific button configuration, decoded from host JSON.
    type Settings: Clone + DeserializeOwned + Send + Sync + 'static;

    /// Fetch outcome: a plain count for most backends, a composite for
    /// GitLab and YNAB. `Default` is the "not yet loaded" value.
    type Output: Clone + Default + Send + Sync + 'static;

    /// The Stream Deck action identifier this service handles,
    /// e.g. `ca.michaelabon.streamdeck-inboxes.marvin.action`.
    fn action_uuid(&self) -> &'static str;

    /// How often the shared refresh loop ticks for this action.
    fn refresh_interval(&self) -> Duration;

    /// Decode raw settings JSON. Fails with `MalformedSettings`; never
    /// partially populates on failure.
    fn parse_settings(&self, raw: &RawValue) -> Result<Self::Settings, InboxError> {
        serde_json::from_str(raw.get()).map_err(InboxError::from)
    }

    /// Perform the network fetch. Settings are mutable because some
    /// backends cache resolved identity or routing hints in them (GitLab's
    /// user id, YNAB's next account id); the engine persists the mutated
    /// settings back through the registry.
    async fn fetch(&self, settings: &mut Self::Settings) -> Result<Self::Output, InboxError>;

    /// Map a fetch outcome onto the button display. Must not panic; a
    /// failed display update while reporting a backend error is reported as
    /// `DisplayUpdateFailed` carrying both.
    fn render(
        &self,
        client: &Client,
        outcome: Result<&Self::Output, &InboxError>,
    ) -> Result<(), InboxError>;

    /// The deep link to open on key press, chosen from the last cached
    /// result. `None` means no navigation.
    fn open_url(&self, settings: &Self::Settings, result: &Self::Output) -> Option<String>;

    /// Handle a property-inspector message. Services without dynamic
    /// configuration assistance keep the default. A `Some(Ok(value))` is
    /// forwarded to the inspector; `Some(Err(_))` becomes an error payload.
    async fn property_inspector(
        &self,
        _settings: &Self::Settings,
        _payload: &RawValue,
    ) -> Option<Result<serde_json::Value, InboxError>> {
        None
    }
}
