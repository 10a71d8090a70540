//! Broker-native message shapes.

use std::collections::BTreeMap;

/// A typed value inside a structured (key/value) payload.
#[derive(Clone, Debug, PartialEq)]
pub enum MapValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Char(char),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl From<bool> for MapValue {
    fn from(v: bool) -> Self {
        MapValue::Bool(v)
    }
}

impl From<i32> for MapValue {
    fn from(v: i32) -> Self {
        MapValue::Int(v)
    }
}

impl From<i64> for MapValue {
    fn from(v: i64) -> Self {
        MapValue::Long(v)
    }
}

impl From<f64> for MapValue {
    fn from(v: f64) -> Self {
        MapValue::Double(v)
    }
}

impl From<&str> for MapValue {
    fn from(v: &str) -> Self {
        MapValue::String(v.to_string())
    }
}

impl From<String> for MapValue {
    fn from(v: String) -> Self {
        MapValue::String(v)
    }
}

impl From<Vec<u8>> for MapValue {
    fn from(v: Vec<u8>) -> Self {
        MapValue::Bytes(v)
    }
}

/// Body of a broker message.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageBody {
    /// Structured key/value payload, in insertion order.
    Map(Vec<(String, MapValue)>),
    /// Free-text payload (usually JSON).
    Text(String),
    /// Opaque binary payload.
    Bytes(Vec<u8>),
    /// No body at all.
    Empty,
}

/// A message as delivered by the broker.
#[derive(Clone, Debug, PartialEq)]
pub struct BrokerMessage {
    /// Broker-assigned message identifier
    pub id: String,
    /// String properties (headers); selectors evaluate against these
    pub properties: BTreeMap<String, String>,
    /// Payload
    pub body: MessageBody,
}

impl BrokerMessage {
    /// Create a message with a fresh identifier.
    pub fn new(body: MessageBody) -> Self {
        Self {
            id: format!("ID:{}", uuid::Uuid::new_v4()),
            properties: BTreeMap::new(),
            body,
        }
    }

    /// Create a free-text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(MessageBody::Text(text.into()))
    }

    /// Create an empty structured message; add entries with [`with_entry`](Self::with_entry).
    pub fn map() -> Self {
        Self::new(MessageBody::Map(Vec::new()))
    }

    /// Create a binary message.
    pub fn bytes(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageBody::Bytes(payload.into()))
    }

    /// Create a message with no body.
    pub fn empty() -> Self {
        Self::new(MessageBody::Empty)
    }

    /// Override the message identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Add a string property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add a map entry. A non-map body is replaced by a map.
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<MapValue>) -> Self {
        let key = key.into();
        let value = value.into();
        match &mut self.body {
            MessageBody::Map(entries) => {
                if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
                    slot.1 = value;
                } else {
                    entries.push((key, value));
                }
            }
            body => *body = MessageBody::Map(vec![(key, value)]),
        }
        self
    }

    /// Look up a string property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Look up a map entry by name.
    pub fn map_value(&self, key: &str) -> Option<&MapValue> {
        match &self.body {
            MessageBody::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Get the text payload, if this is a text message.
    pub fn text_body(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(text) => Some(text),
            _ => None,
        }
    }
}
