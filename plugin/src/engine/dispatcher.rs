use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::value::RawValue;
use streamdeck::{
    event_names, Client, CommandSink, DidReceiveSettingsPayload, Event, KeyUpPayload,
    WillAppearPayload,
};

use crate::engine::registry::ButtonRegistry;
use crate::engine::render;
use crate::engine::service::Service;
use crate::engine::supervisor::Supervisor;
use crate::error::InboxError;

/// Object-safe face of a [`Registration`], so the event loop can route
/// events across services with heterogeneous settings/result types.
#[async_trait]
pub trait ActionDispatch: Send + Sync {
    fn action_uuid(&self) -> &'static str;
    async fn dispatch(&self, event: Event);
}

/// Binds one [`Service`] to the host event stream.
///
/// Owns the per-button registry and the polling supervisor for its action
/// type. All lifecycle behavior lives here; services only fetch, render,
/// and pick URLs.
pub struct Registration<S: Service> {
    service: Arc<S>,
    registry: Arc<ButtonRegistry<S::Settings, S::Output>>,
    supervisor: Arc<Supervisor>,
    sink: CommandSink,
}

#[derive(Deserialize)]
struct SendToPluginEnvelope {
    #[serde(default)]
    settings: Option<Box<RawValue>>,
}

impl<S: Service> Registration<S> {
    pub fn new(service: S, sink: CommandSink) -> Self {
        Self {
            service: Arc::new(service),
            registry: Arc::new(ButtonRegistry::new()),
            supervisor: Arc::new(Supervisor::new()),
            sink,
        }
    }

    fn client(&self, context: &str) -> Client {
        self.sink.for_context(context)
    }

    /// Run fetch-persist-render as its own task. The event handlers stay
    /// fast: a slow backend must never stall delivery of other events.
    /// Fetch and render failures are logged, never propagated; one button's
    /// failure must not disturb any other.
    fn spawn_fetch(&self, context: &str, settings: S::Settings) {
        let service = Arc::clone(&self.service);
        let registry = Arc::clone(&self.registry);
        let sink = self.sink.clone();
        let context = context.to_string();
        tokio::spawn(async move {
            let mut settings = settings;
            fetch_and_render_inner(&service, &registry, &sink, &context, &mut settings).await;
        });
    }

    /// Make sure the shared refresh loop for this action is running.
    async fn ensure_polling(&self) {
        let service = Arc::clone(&self.service);
        let registry = Arc::clone(&self.registry);
        let sink = self.sink.clone();
        let interval = self.service.refresh_interval();

        self.supervisor
            .ensure_started(interval, move || {
                let service = Arc::clone(&service);
                let registry = Arc::clone(&registry);
                let sink = sink.clone();
                async move {
                    poll_all(&service, &registry, &sink).await;
                }
            })
            .await;
    }

    async fn will_appear(&self, context: &str, event: &Event) {
        let payload: WillAppearPayload = match event.parse_payload() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(action = self.action_uuid(), context, "bad willAppear payload: {err}");
                return;
            }
        };
        let settings = match self.service.parse_settings(&payload.settings) {
            Ok(settings) => settings,
            Err(err) => {
                // This event is abandoned; any previously registered state
                // for the button stays as it was.
                tracing::warn!(action = self.action_uuid(), context, "{err}");
                return;
            }
        };

        self.registry.insert(context, settings.clone()).await;

        if let Err(err) = render::set_loading(&self.client(context)) {
            tracing::warn!(action = self.action_uuid(), context, "{err}");
        }

        self.ensure_polling().await;

        // Immediate out-of-band fetch so the new button doesn't sit on the
        // loading glyph for a full interval.
        self.spawn_fetch(context, settings);
    }

    async fn will_disappear(&self, context: &str) {
        let now_empty = self.registry.remove(context).await;
        if now_empty {
            self.supervisor.stop().await;
        }
    }

    async fn did_receive_settings(&self, context: &str, event: &Event) {
        let payload: DidReceiveSettingsPayload = match event.parse_payload() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(action = self.action_uuid(), context, "bad settings payload: {err}");
                return;
            }
        };
        let settings = match self.service.parse_settings(&payload.settings) {
            Ok(settings) => settings,
            Err(err) => {
                tracing::warn!(action = self.action_uuid(), context, "{err}");
                return;
            }
        };

        self.registry.update_settings(context, settings.clone()).await;
        self.spawn_fetch(context, settings);
    }

    /// Contract: the URL opens with the last cached result first, then the
    /// refetch runs. The press never waits on the network before
    /// navigating.
    async fn key_up(&self, context: &str, event: &Event) {
        // Registry settings are authoritative: they carry identity and
        // routing hints cached by earlier fetches. The payload parse is the
        // fallback for a button we never saw appear.
        let settings = match self.registry.settings(context).await {
            Some(settings) => Some(settings),
            None => event
                .parse_payload::<KeyUpPayload>()
                .ok()
                .and_then(|payload| self.service.parse_settings(&payload.settings).ok()),
        };
        let Some(settings) = settings else {
            tracing::warn!(action = self.action_uuid(), context, "keyUp without usable settings");
            return;
        };

        let (result, _loaded) = self
            .registry
            .cached_result(context)
            .await
            .unwrap_or_else(|| (S::Output::default(), false));

        if let Some(url) = self.service.open_url(&settings, &result) {
            if !url.is_empty() {
                if let Err(err) = self.sink.open_url(&url) {
                    tracing::warn!(action = self.action_uuid(), context, "openUrl failed: {err}");
                }
            }
        }

        self.spawn_fetch(context, settings);
    }

    async fn send_to_plugin(&self, context: &str, event: &Event) {
        let client = self.client(context);
        let raw = event
            .payload
            .as_deref()
            .map(RawValue::get)
            .unwrap_or("{}");

        let envelope: SendToPluginEnvelope =
            serde_json::from_str(raw).unwrap_or(SendToPluginEnvelope { settings: None });

        let settings = match envelope.settings {
            Some(raw_settings) => self.service.parse_settings(&raw_settings),
            None => self
                .registry
                .settings(context)
                .await
                .ok_or_else(|| InboxError::rejected("no settings for this button")),
        };
        let settings = match settings {
            Ok(settings) => settings,
            Err(err) => {
                // Configuration UI errors go back as a payload, never as a
                // transport failure.
                send_error_to_inspector(&client, &err);
                return;
            }
        };

        let Some(payload) = event.payload.clone() else {
            return;
        };

        // Inspector requests can reach out to the backend (the Gmail label
        // list walks IMAP), so they run off the event loop too.
        let service = Arc::clone(&self.service);
        let action = self.action_uuid();
        let context = context.to_string();
        tokio::spawn(async move {
            match service.property_inspector(&settings, &payload).await {
                None => {}
                Some(Ok(response)) => {
                    if let Err(err) = client.send_to_property_inspector(&response) {
                        tracing::warn!(action, context = %context, "{err}");
                    }
                }
                Some(Err(err)) => {
                    tracing::warn!(action, context = %context, "inspector request failed: {err}");
                    send_error_to_inspector(&client, &err);
                }
            }
        });
    }
}

fn send_error_to_inspector(client: &Client, err: &InboxError) {
    let payload = serde_json::json!({ "error": err.to_string() });
    if let Err(send_err) = client.send_to_property_inspector(&payload) {
        tracing::warn!("failed to report error to property inspector: {send_err}");
    }
}

/// One polling tick: snapshot the contexts, refresh each in turn. A failed
/// fetch for one button never aborts the others.
async fn poll_all<S: Service>(
    service: &Arc<S>,
    registry: &Arc<ButtonRegistry<S::Settings, S::Output>>,
    sink: &CommandSink,
) {
    for context in registry.contexts().await {
        let Some(mut settings) = registry.settings(&context).await else {
            continue;
        };
        fetch_and_render_inner(service, registry, sink, &context, &mut settings).await;
    }
}

async fn fetch_and_render_inner<S: Service>(
    service: &Arc<S>,
    registry: &Arc<ButtonRegistry<S::Settings, S::Output>>,
    sink: &CommandSink,
    context: &str,
    settings: &mut S::Settings,
) {
    let client = sink.for_context(context);
    match service.fetch(settings).await {
        Ok(result) => {
            registry
                .store_result(context, settings.clone(), result.clone())
                .await;
            if let Err(err) = service.render(&client, Ok(&result)) {
                tracing::warn!(action = service.action_uuid(), context, "render error: {err}");
            }
        }
        Err(err) => {
            tracing::warn!(action = service.action_uuid(), context, "fetch error: {err}");
            if let Err(render_err) = service.render(&client, Err(&err)) {
                tracing::warn!(
                    action = service.action_uuid(),
                    context,
                    "render error: {render_err}"
                );
            }
        }
    }
}

#[async_trait]
impl<S: Service> ActionDispatch for Registration<S> {
    fn action_uuid(&self) -> &'static str {
        self.service.action_uuid()
    }

    async fn dispatch(&self, event: Event) {
        let Some(context) = event.context().map(str::to_string) else {
            tracing::debug!(action = self.action_uuid(), event = %event.event, "event without context");
            return;
        };

        match event.event.as_str() {
            event_names::WILL_APPEAR => self.will_appear(&context, &event).await,
            event_names::WILL_DISAPPEAR => self.will_disappear(&context).await,
            event_names::DID_RECEIVE_SETTINGS => self.did_receive_settings(&context, &event).await,
            event_names::KEY_UP => self.key_up(&context, &event).await,
            event_names::SEND_TO_PLUGIN => self.send_to_plugin(&context, &event).await,
            other => {
                tracing::debug!(action = self.action_uuid(), event = other, "ignoring event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::render::render_count;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(default)]
    struct MockSettings {
        user: String,
        #[serde(skip)]
        hint: String,
    }

    struct MockService {
        interval: Duration,
        fetch_delay: Duration,
        outcomes: Mutex<VecDeque<Result<u64, InboxError>>>,
    }

    impl MockService {
        fn with_outcomes(outcomes: Vec<Result<u64, InboxError>>) -> Self {
            Self {
                interval: Duration::from_secs(60),
                fetch_delay: Duration::ZERO,
                outcomes: Mutex::new(outcomes.into()),
            }
        }

        fn slow(fetch_delay: Duration, outcomes: Vec<Result<u64, InboxError>>) -> Self {
            Self {
                // Long interval keeps the refresh ticker out of the way.
                interval: Duration::from_secs(600),
                fetch_delay,
                outcomes: Mutex::new(outcomes.into()),
            }
        }
    }

    #[async_trait]
    impl Service for MockService {
        type Settings = MockSettings;
        type Output = u64;

        fn action_uuid(&self) -> &'static str {
            "test.inboxes.mock.action"
        }

        fn refresh_interval(&self) -> Duration {
            self.interval
        }

        async fn fetch(&self, settings: &mut MockSettings) -> Result<u64, InboxError> {
            if !self.fetch_delay.is_zero() {
                tokio::time::sleep(self.fetch_delay).await;
            }
            settings.hint = format!("fetched-for-{}", settings.user);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(0))
        }

        fn render(
            &self,
            client: &Client,
            outcome: Result<&u64, &InboxError>,
        ) -> Result<(), InboxError> {
            render_count(client, outcome.copied())
        }

        fn open_url(&self, settings: &MockSettings, result: &u64) -> Option<String> {
            Some(format!(
                "https://example.com/{}/{}?hint={}",
                settings.user, result, settings.hint
            ))
        }
    }

    fn harness(
        outcomes: Vec<Result<u64, InboxError>>,
    ) -> (Registration<MockService>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = CommandSink::new(tx);
        (
            Registration::new(MockService::with_outcomes(outcomes), sink),
            rx,
        )
    }

    fn event(kind: &str, context: &str, settings: &str) -> Event {
        let frame = format!(
            r#"{{"action":"test.inboxes.mock.action","event":"{kind}","context":"{context}","payload":{{"settings":{settings}}}}}"#
        );
        serde_json::from_str(&frame).unwrap()
    }

    async fn drain_spawned() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    fn decoded(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_appear_then_disappear_leaves_idle() {
        let (registration, _rx) = harness(vec![]);

        registration
            .dispatch(event("willAppear", "B1", r#"{"user":"a"}"#))
            .await;
        registration
            .dispatch(event("willDisappear", "B1", "{}"))
            .await;
        drain_spawned().await;

        assert!(registration.registry.is_empty().await);
        assert!(!registration.supervisor.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_buttons_share_one_supervisor() {
        let (registration, _rx) = harness(vec![]);

        registration
            .dispatch(event("willAppear", "B1", r#"{"user":"a"}"#))
            .await;
        registration
            .dispatch(event("willAppear", "B2", r#"{"user":"b"}"#))
            .await;
        drain_spawned().await;

        assert_eq!(registration.registry.len().await, 2);
        assert!(registration.supervisor.is_active().await);

        // Only the last disappear retires the loop.
        registration
            .dispatch(event("willDisappear", "B1", "{}"))
            .await;
        assert!(registration.supervisor.is_active().await);
        registration
            .dispatch(event("willDisappear", "B2", "{}"))
            .await;
        assert!(!registration.supervisor.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_change_targets_one_button() {
        let (registration, _rx) = harness(vec![Ok(1), Ok(2), Ok(3)]);

        registration
            .dispatch(event("willAppear", "B1", r#"{"user":"one"}"#))
            .await;
        registration
            .dispatch(event("willAppear", "B2", r#"{"user":"two"}"#))
            .await;
        drain_spawned().await;

        registration
            .dispatch(event("didReceiveSettings", "B1", r#"{"user":"changed"}"#))
            .await;
        drain_spawned().await;

        assert_eq!(
            registration.registry.settings("B1").await.unwrap().user,
            "changed"
        );
        assert_eq!(
            registration.registry.settings("B2").await.unwrap().user,
            "two"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_settings_aborts_only_that_event() {
        let (registration, _rx) = harness(vec![]);

        registration
            .dispatch(event("willAppear", "B1", r#"{"user":"a"}"#))
            .await;
        drain_spawned().await;

        registration
            .dispatch(event("didReceiveSettings", "B1", r#""not-an-object""#))
            .await;
        drain_spawned().await;

        // Previous state survives the bad event.
        assert_eq!(registration.registry.settings("B1").await.unwrap().user, "a");
        assert!(registration.supervisor.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_fetch_renders_error_state() {
        let (registration, mut rx) = harness(vec![Err(InboxError::missing_field("ApiToken"))]);

        registration
            .dispatch(event("willAppear", "B1", r#"{"user":"a"}"#))
            .await;
        drain_spawned().await;

        let frames = decoded(&mut rx);
        let last_title = frames
            .iter()
            .rev()
            .find(|f| f["event"] == "setTitle")
            .unwrap();
        assert_eq!(last_title["payload"]["title"], "!         ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_up_opens_cached_url_before_refetch() {
        let (registration, mut rx) = harness(vec![Ok(5), Ok(9)]);

        registration
            .dispatch(event("willAppear", "B1", r#"{"user":"a"}"#))
            .await;
        drain_spawned().await;
        let _ = decoded(&mut rx);

        registration
            .dispatch(event("keyUp", "B1", r#"{"user":"a"}"#))
            .await;
        drain_spawned().await;

        let frames = decoded(&mut rx);
        // The openUrl frame must come first and use the cached count (5)
        // and the side-channel hint persisted by the first fetch.
        assert_eq!(frames[0]["event"], "openUrl");
        assert_eq!(
            frames[0]["payload"]["url"],
            "https://example.com/a/5?hint=fetched-for-a"
        );
        // The refetch then renders the new count.
        let last_title = frames
            .iter()
            .rev()
            .find(|f| f["event"] == "setTitle")
            .unwrap();
        assert_eq!(last_title["payload"]["title"], "9         ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_does_not_stall_event_handling() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registration = Registration::new(
            MockService::slow(Duration::from_secs(120), vec![Ok(2), Ok(8)]),
            CommandSink::new(tx),
        );

        registration
            .dispatch(event("willAppear", "B1", r#"{"user":"a"}"#))
            .await;
        drain_spawned().await;
        tokio::time::advance(Duration::from_secs(121)).await;
        drain_spawned().await;
        let _ = decoded(&mut rx);

        registration
            .dispatch(event("keyUp", "B1", r#"{"user":"a"}"#))
            .await;
        drain_spawned().await;

        // The press is served from cache immediately; the 120s refetch is
        // still in flight, yet dispatch has already returned.
        let frames = decoded(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "openUrl");
        assert_eq!(
            frames[0]["payload"]["url"],
            "https://example.com/a/2?hint=fetched-for-a"
        );

        tokio::time::advance(Duration::from_secs(121)).await;
        drain_spawned().await;
        let frames = decoded(&mut rx);
        let title = frames
            .iter()
            .rev()
            .find(|f| f["event"] == "setTitle")
            .unwrap();
        assert_eq!(title["payload"]["title"], "8         ");
    }

    #[tokio::test(start_paused = true)]
    async fn test_appear_scenario_zero_then_five() {
        let (registration, mut rx) = harness(vec![Ok(0), Ok(5)]);

        registration
            .dispatch(event("willAppear", "B1", r#"{"user":"a@x.com"}"#))
            .await;
        drain_spawned().await;

        let frames = decoded(&mut rx);
        // Loading first, then the gold/blank empty rendering.
        assert_eq!(frames[0]["event"], "setTitle");
        assert_eq!(frames[0]["payload"]["title"], "...      ");
        let gold = frames.iter().rev().find(|f| f["event"] == "setState").unwrap();
        assert_eq!(gold["payload"]["state"], 1);
        let blank = frames.iter().rev().find(|f| f["event"] == "setTitle").unwrap();
        assert_eq!(blank["payload"]["title"], "");

        // One interval later the count is 5.
        tokio::time::advance(Duration::from_secs(61)).await;
        drain_spawned().await;

        let frames = decoded(&mut rx);
        let title = frames.iter().rev().find(|f| f["event"] == "setTitle").unwrap();
        assert_eq!(title["payload"]["title"], "5         ");
        let state = frames.iter().rev().find(|f| f["event"] == "setState").unwrap();
        assert_eq!(state["payload"]["state"], 0);

        registration
            .dispatch(event("willDisappear", "B1", "{}"))
            .await;
        assert!(!registration.supervisor.is_active().await);
    }
}
