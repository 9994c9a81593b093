use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::id::EventId;

/// Extension flag stamped on events replayed from the producer repository.
///
/// Its presence tells the admission path the event is already durable: it is neither
/// persisted again nor subject to the quota check.
pub const RESENT_EXTENSION: &str = "__storage";

/// Event header: routing + lifecycle metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHead {
    id: EventId,
    destination: String,
    /// Epoch seconds, set once at creation.
    created_at: i64,
    /// `<= 0` means the event never expires.
    ttl_seconds: i64,
    #[serde(default)]
    extensions: HashMap<String, String>,
}

impl EventHead {
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    pub fn extensions(&self) -> &HashMap<String, String> {
        &self.extensions
    }
}

/// Event body: what happened to which resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    resource: String,
    operation: String,
    #[serde(default)]
    content: JsonMap<String, JsonValue>,
}

impl EventBody {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn content(&self) -> &JsonMap<String, JsonValue> {
        &self.content
    }
}

/// The unit of transport (header + body).
///
/// Only `extensions` may change once the event exists; everything else is fixed at
/// construction. The `with_*` methods are construction-time builders and consume the
/// value, so an event already handed to a pipeline cannot be rewritten through them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    head: EventHead,
    body: EventBody,
}

impl Event {
    /// Create an event with a fresh id, `created_at = now` and no TTL.
    pub fn new(
        destination: impl Into<String>,
        resource: impl Into<String>,
        operation: impl Into<String>,
        content: JsonMap<String, JsonValue>,
    ) -> Self {
        Self {
            head: EventHead {
                id: EventId::new(),
                destination: destination.into(),
                created_at: Utc::now().timestamp(),
                ttl_seconds: 0,
                extensions: HashMap::new(),
            },
            body: EventBody {
                resource: resource.into(),
                operation: operation.into(),
                content,
            },
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: i64) -> Self {
        self.head.ttl_seconds = ttl_seconds;
        self
    }

    pub fn with_id(mut self, id: EventId) -> Self {
        self.head.id = id;
        self
    }

    pub fn with_created_at(mut self, created_at: i64) -> Self {
        self.head.created_at = created_at;
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.head.extensions.insert(key.into(), value.into());
        self
    }

    pub fn head(&self) -> &EventHead {
        &self.head
    }

    pub fn body(&self) -> &EventBody {
        &self.body
    }

    pub fn id(&self) -> EventId {
        self.head.id
    }

    pub fn destination(&self) -> &str {
        &self.head.destination
    }

    pub fn resource(&self) -> &str {
        &self.body.resource
    }

    pub fn operation(&self) -> &str {
        &self.body.operation
    }

    pub fn extension(&self, key: &str) -> Option<&str> {
        self.head.extensions.get(key).map(String::as_str)
    }

    pub fn add_extension(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.head.extensions.insert(key.into(), value.into());
    }

    /// Stamp the event as replayed from the producer repository.
    pub fn mark_resent(&mut self) {
        self.add_extension(RESENT_EXTENSION, "1");
    }

    pub fn is_resent(&self) -> bool {
        self.extension(RESENT_EXTENSION) == Some("1")
    }

    /// Absolute expiry in epoch seconds, if the event has a TTL.
    pub fn expires_at(&self) -> Option<i64> {
        (self.head.ttl_seconds > 0).then(|| self.head.created_at + self.head.ttl_seconds)
    }

    /// `true` when the event has a TTL and `now` (epoch seconds) is past it.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at().is_some_and(|deadline| now > deadline)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }

    /// Seconds elapsed between creation and `now` (never negative).
    pub fn age_secs(&self, now: i64) -> u64 {
        (now - self.head.created_at).max(0) as u64
    }
}
