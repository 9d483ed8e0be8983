//! Message envelope.
//!
//! The layout matches what the mesh agent speaks on the socket: a header for
//! correlation, a route for addressing, and an opaque content value. Every
//! field defaults on decode, so any balanced JSON object is a valid message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Content key marking a peer lifecycle/topology event.
pub const EVENT_NAME_KEY: &str = "eventName";

/// Content key naming the node an event refers to.
pub const NODE_NAME_KEY: &str = "nodeName";

/// Correlation fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "msg_id", default)]
    pub id: String,
    #[serde(rename = "parent_msg_id", default, skip_serializing_if = "String::is_empty")]
    pub parent_id: String,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(rename = "resourceversion", default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sync: bool,
}

/// Addressing fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Component that produced the message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    /// Destination group.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    /// Verb (e.g. "patch", "update").
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operation: String,
    /// Resource path, `/`-separated.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
}

/// The unit of exchange with the peer and on the internal bus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub header: Header,
    #[serde(default)]
    pub route: Route,
    /// Opaque payload, interpreted by the receiver.
    #[serde(default)]
    pub content: Value,
}

/// A peer lifecycle event carried in a message's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerEvent<'a> {
    pub name: &'a Value,
    pub node: Option<&'a Value>,
}

impl Message {
    /// Create a message with a fresh id and the current timestamp.
    pub fn new(parent_id: impl Into<String>) -> Self {
        Self {
            header: Header {
                id: uuid::Uuid::new_v4().to_string(),
                parent_id: parent_id.into(),
                timestamp: now_millis(),
                ..Header::default()
            },
            ..Self::default()
        }
    }

    /// Set the route.
    pub fn build_router(
        mut self,
        source: impl Into<String>,
        group: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        self.route = Route {
            source: source.into(),
            group: group.into(),
            operation: operation.into(),
            resource: resource.into(),
        };
        self
    }

    /// Set the content.
    pub fn fill_body(mut self, content: impl Into<Value>) -> Self {
        self.content = content.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.header.id
    }

    pub fn resource(&self) -> &str {
        &self.route.resource
    }

    pub fn operation(&self) -> &str {
        &self.route.operation
    }

    /// Content as a string.
    pub fn content_str(&self) -> Result<&str, ContentError> {
        self.content
            .as_str()
            .ok_or_else(|| ContentError::mismatch("string", &self.content))
    }

    /// Content as a JSON object.
    pub fn content_object(&self) -> Result<&Map<String, Value>, ContentError> {
        self.content
            .as_object()
            .ok_or_else(|| ContentError::mismatch("object", &self.content))
    }

    /// The peer event carried by this message, if its content is an object
    /// holding [`EVENT_NAME_KEY`].
    pub fn peer_event(&self) -> Option<PeerEvent<'_>> {
        let content = self.content_object().ok()?;
        let name = content.get(EVENT_NAME_KEY)?;
        Some(PeerEvent {
            name,
            node: content.get(NODE_NAME_KEY),
        })
    }

    pub fn is_peer_event(&self) -> bool {
        self.peer_event().is_some()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Name of a JSON value's shape, for error reporting.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Error accessing message content.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentError {
    #[error("content type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl ContentError {
    fn mismatch(expected: &'static str, found: &Value) -> Self {
        Self::TypeMismatch {
            expected,
            found: json_kind(found),
        }
    }
}
