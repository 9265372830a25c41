use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::Error;

/// Event names the host delivers that this crate's consumers care about.
pub mod event_names {
    pub const WILL_APPEAR: &str = "willAppear";
    pub const WILL_DISAPPEAR: &str = "willDisappear";
    pub const DID_RECEIVE_SETTINGS: &str = "didReceiveSettings";
    pub const KEY_UP: &str = "keyUp";
    pub const SEND_TO_PLUGIN: &str = "sendToPlugin";
}

/// One inbound frame from the host.
///
/// `payload` is kept raw so each action can decode it into the payload shape
/// it expects; lifecycle events without a payload carry an absent one.
#[derive(Debug, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub action: Option<String>,
    pub event: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
}

impl Event {
    /// Decode this event's payload into a typed shape.
    pub fn parse_payload<'a, T: Deserialize<'a>>(&'a self) -> Result<T, Error> {
        let raw = self
            .payload
            .as_deref()
            .map(RawValue::get)
            .unwrap_or("null");
        Ok(serde_json::from_str(raw)?)
    }

    /// The button context this event targets, if any.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

fn empty_settings() -> Box<RawValue> {
    RawValue::from_string("{}".to_string()).expect("static JSON object")
}

#[derive(Debug, Deserialize)]
pub struct WillAppearPayload {
    #[serde(default = "empty_settings")]
    pub settings: Box<RawValue>,
}

#[derive(Debug, Deserialize)]
pub struct DidReceiveSettingsPayload {
    #[serde(default = "empty_settings")]
    pub settings: Box<RawValue>,
}

#[derive(Debug, Deserialize)]
pub struct KeyUpPayload {
    #[serde(default = "empty_settings")]
    pub settings: Box<RawValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_will_appear_frame() {
        let frame = r#"{
            "action": "ca.michaelabon.streamdeck-inboxes.gmail.action",
            "event": "willAppear",
            "context": "B1",
            "device": "D1",
            "payload": { "settings": { "username": "a@x.com" }, "coordinates": { "column": 0, "row": 0 } }
        }"#;

        let event: Event = serde_json::from_str(frame).unwrap();
        assert_eq!(event.event, "willAppear");
        assert_eq!(event.context(), Some("B1"));

        let payload: WillAppearPayload = event.parse_payload().unwrap();
        assert!(payload.settings.get().contains("a@x.com"));
    }

    #[test]
    fn test_payloadless_frame_defaults_settings() {
        let frame = r#"{ "event": "willDisappear", "context": "B1" }"#;
        let event: Event = serde_json::from_str(frame).unwrap();
        assert!(event.payload.is_none());
    }

    #[test]
    fn test_missing_settings_defaults_to_empty_object() {
        let frame = r#"{ "event": "keyUp", "context": "B1", "payload": {} }"#;
        let event: Event = serde_json::from_str(frame).unwrap();
        let payload: KeyUpPayload = event.parse_payload().unwrap();
        assert_eq!(payload.settings.get(), "{}");
    }
}
