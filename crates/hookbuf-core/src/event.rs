//! Buffered events and trim markers

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Number of random bytes in an event id (32 hex chars)
pub const EVENT_ID_BYTES: usize = 16;

/// How long an event is nominally kept. Recorded on the event, never enforced.
pub const EVENT_TTL_DAYS: i64 = 7;

/// Wire value of the clear-all marker
pub const CLEAR_ALL_SENTINEL: i64 = -1;

/// Unique identifier of a buffered event
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(hex::encode(rand::random::<[u8; EVENT_ID_BYTES]>()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Target path of an event
///
/// New events always carry [`EventPath::Simple`]. Older producers stored a
/// list of segments of which only the first is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPath {
    Simple(String),
    LegacySegments(Vec<String>),
}

impl EventPath {
    /// The effective target path, if any
    pub fn resolve(&self) -> Option<&str> {
        match self {
            Self::Simple(path) => Some(path),
            Self::LegacySegments(segments) => segments.first().map(String::as_str),
        }
    }
}

impl From<&str> for EventPath {
    fn from(path: &str) -> Self {
        Self::Simple(path.to_string())
    }
}

impl From<String> for EventPath {
    fn from(path: String) -> Self {
        Self::Simple(path)
    }
}

/// Resolve the `path` parameter of an ingestion request
///
/// A string is taken as-is and an array contributes its first element.
/// Anything else, including an absent parameter, is rejected.
pub fn resolve_path_param(value: Option<&Value>) -> Result<String, ValidationError> {
    match value {
        Some(Value::String(path)) => Ok(path.clone()),
        Some(Value::Array(items)) => match items.first() {
            Some(Value::String(path)) => Ok(path.clone()),
            _ => Err(invalid_path(value)),
        },
        _ => Err(invalid_path(value)),
    }
}

fn invalid_path(value: Option<&Value>) -> ValidationError {
    let received = match value {
        None => "undefined".to_string(),
        Some(value) => value.to_string(),
    };
    ValidationError::InvalidPath { received }
}

/// One unit of buffered work
///
/// Immutable once appended to a queue; only ever removed as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedEvent {
    pub id: EventId,
    pub path: EventPath,
    /// Nominal expiry; informational only
    pub exp: DateTime<Utc>,
    pub data: String,
}

impl BufferedEvent {
    /// Build a new event with a fresh id, expiring [`EVENT_TTL_DAYS`] after `now`
    pub fn new(path: impl Into<EventPath>, data: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: EventId::generate(),
            path: path.into(),
            exp: now + Duration::days(EVENT_TTL_DAYS),
            data: data.into(),
        }
    }

    /// The effective target path
    pub fn target_path(&self) -> Option<&str> {
        self.path.resolve()
    }

    /// Marker that acknowledges this event and everything before it
    pub fn marker(&self) -> Marker {
        Marker::Through(self.id.clone())
    }
}

/// What an acknowledgment removes from a queue
///
/// On the wire this is `{"id": "<event id>"}` or `{"id": -1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MarkerWire", into = "MarkerWire")]
pub enum Marker {
    /// Remove the prefix ending at (and including) this event
    Through(EventId),
    /// Remove everything
    ClearAll,
}

impl Marker {
    pub fn is_clear_all(&self) -> bool {
        matches!(self, Self::ClearAll)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Through(id) => write!(f, "through:{}", id),
            Self::ClearAll => f.write_str("clear-all"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MarkerWire {
    id: MarkerWireId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum MarkerWireId {
    Event(String),
    Sentinel(i64),
}

impl TryFrom<MarkerWire> for Marker {
    type Error = ValidationError;

    fn try_from(wire: MarkerWire) -> Result<Self, Self::Error> {
        match wire.id {
            MarkerWireId::Event(id) => Ok(Marker::Through(EventId::new(id))),
            MarkerWireId::Sentinel(CLEAR_ALL_SENTINEL) => Ok(Marker::ClearAll),
            MarkerWireId::Sentinel(other) => Err(ValidationError::InvalidMarker(format!(
                "numeric id must be {}, got {}",
                CLEAR_ALL_SENTINEL, other
            ))),
        }
    }
}

impl From<Marker> for MarkerWire {
    fn from(marker: Marker) -> Self {
        let id = match marker {
            Marker::Through(id) => MarkerWireId::Event(id.0),
            Marker::ClearAll => MarkerWireId::Sentinel(CLEAR_ALL_SENTINEL),
        };
        Self { id }
    }
}
