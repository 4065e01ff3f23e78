//! Raw tracker event definition
//!
//! The collection layer stores whatever the tracker posted. Field names
//! drift between tracker versions (`data` vs `payload`, `type` vs
//! `event_type`), timestamps arrive as ISO strings or epoch milliseconds, and
//! the payload is sometimes a JSON-encoded string. `RawEvent` accepts any JSON
//! object; wrongly typed fields are left for the normalizer to skip, so one bad
//! record never fails a batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Tracked interaction types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MouseMove,
    MouseClick,
    Scroll,
    FormInput,
    PageView,
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MouseMove => "mouse_move",
            EventType::MouseClick => "mouse_click",
            EventType::Scroll => "scroll",
            EventType::FormInput => "form_input",
            EventType::PageView => "page_view",
            EventType::Custom => "custom",
        }
    }

    /// Whether events of this type carry pointer coordinates
    pub fn is_spatial(&self) -> bool {
        matches!(self, EventType::MouseMove | EventType::MouseClick)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "mouse_move" | "mousemove" => Ok(EventType::MouseMove),
            "mouse_click" | "click" => Ok(EventType::MouseClick),
            "scroll" => Ok(EventType::Scroll),
            "form_input" | "input" => Ok(EventType::FormInput),
            "page_view" | "pageview" => Ok(EventType::PageView),
            "custom" => Ok(EventType::Custom),
            other => Err(other.to_string()),
        }
    }
}

/// Event payload as stored: either an object or a JSON-encoded string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawPayload {
    Map(Map<String, Value>),
    Encoded(String),
    Other(Value),
}

/// A stored tracker event, before normalization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Interaction type name
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<Value>,
    /// ISO-8601 string or epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    /// Page URL the event was recorded on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Value>,
    /// Opaque session identifier (string or number)
    #[serde(default, alias = "session", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Value>,
    /// Type-specific data (coordinates, button, target element)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<RawPayload>,
    /// Older trackers' name for `payload`; used when `payload` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RawPayload>,
    /// Anything else the tracker sent
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawEvent {
    /// Create a raw event with an object payload
    pub fn new(
        event_type: EventType,
        timestamp: impl Into<Value>,
        session_id: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        RawEvent {
            event_type: Some(Value::from(event_type.as_str())),
            timestamp: Some(timestamp.into()),
            url: Some(Value::String(url.into())),
            session_id: Some(Value::String(session_id.into())),
            payload: None,
            data: None,
            extra: Map::new(),
        }
    }

    /// Attach an object payload
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(match payload {
            Value::Object(map) => RawPayload::Map(map),
            Value::String(s) => RawPayload::Encoded(s),
            other => RawPayload::Other(other),
        });
        self
    }

    /// Attach pointer coordinates as an object payload
    pub fn with_position(self, x: f64, y: f64) -> Self {
        self.with_payload(serde_json::json!({ "x": x, "y": y }))
    }

    /// Session identifier as a string, whatever its stored encoding
    pub fn session_key(&self) -> Option<String> {
        match self.session_id.as_ref()? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Parsed event type, if the stored name is one we know
    pub fn kind(&self) -> Option<EventType> {
        self.event_type.as_ref()?.as_str()?.parse().ok()
    }

    /// Page URL, when stored as a string
    pub fn url_str(&self) -> Option<&str> {
        self.url.as_ref()?.as_str()
    }

    /// The payload under whichever key the tracker used
    pub fn raw_payload(&self) -> Option<&RawPayload> {
        self.payload.as_ref().or(self.data.as_ref())
    }
}

/// A browser session as exposed by the session view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque session identifier
    pub session_id: String,
    /// When the session started
    pub start_time: DateTime<Utc>,
    /// When the session ended, if it has
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Whether the session is still open
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        SessionRecord {
            session_id: session_id.into(),
            start_time,
            end_time: None,
            is_active: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_serialization() {
        let json = serde_json::to_string(&EventType::PageView).unwrap();
        assert_eq!(json, "\"page_view\"");

        let parsed: EventType = serde_json::from_str("\"mouse_click\"").unwrap();
        assert_eq!(parsed, EventType::MouseClick);
    }

    #[test]
    fn test_event_type_from_loose_string() {
        assert_eq!("Mouse-Move".parse::<EventType>(), Ok(EventType::MouseMove));
        assert_eq!("pageview".parse::<EventType>(), Ok(EventType::PageView));
        assert!("hover".parse::<EventType>().is_err());
    }

    #[test]
    fn test_deserialize_tracker_record() {
        let json = r#"{
            "event_type": "mouse_click",
            "timestamp": 1705327200000,
            "url": "https://shop.example/cart",
            "session_id": "sess-1",
            "data": {"x": 120, "y": 45, "button": 0}
        }"#;

        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), Some(EventType::MouseClick));
        assert_eq!(event.session_key().as_deref(), Some("sess-1"));
        assert!(matches!(event.raw_payload(), Some(RawPayload::Map(_))));
    }

    #[test]
    fn test_deserialize_encoded_payload_and_aliases() {
        let json = r#"{
            "type": "mouse_move",
            "timestamp": "2024-01-15T14:00:00Z",
            "session": 42,
            "payload": "{\"x\": 1, \"y\": 2}",
            "screenX": 900
        }"#;

        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), Some(EventType::MouseMove));
        assert_eq!(event.session_key().as_deref(), Some("42"));
        assert!(matches!(event.payload, Some(RawPayload::Encoded(_))));
        assert_eq!(event.extra.get("screenX"), Some(&Value::from(900)));
    }

    #[test]
    fn test_wrongly_typed_fields_still_deserialize() {
        let json = r#"{
            "event_type": 7,
            "url": 404,
            "session_id": "s",
            "timestamp": 0,
            "data": {"x": 1, "y": 2},
            "payload": {"x": 3, "y": 4}
        }"#;

        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), None);
        assert_eq!(event.url_str(), None);
        assert_eq!(event.url, Some(Value::from(404)));
        match event.raw_payload() {
            Some(RawPayload::Map(map)) => assert_eq!(map.get("x"), Some(&Value::from(3))),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_session_record_defaults_active() {
        let json = r#"{"session_id": "s", "start_time": "2024-01-15T14:00:00Z"}"#;
        let session: SessionRecord = serde_json::from_str(json).unwrap();
        assert!(session.is_active);
        assert!(session.end_time.is_none());
    }
}
