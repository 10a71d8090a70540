//! Wire message normalization.
//!
//! Turns any broker message into one JSON object:
//! - Map payloads: each entry `key` is stored under the field named by the
//!   message's string property `key`. A missing property is a [`FormatError`].
//! - Text payloads: parsed as JSON and nested under [`TEXT_ROOT_FIELD`]. Text
//!   that is not JSON yields an empty document.
//! - Anything else: an empty document.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::bus::{BrokerMessage, MapValue, MessageBody};
use crate::error::FormatError;

/// Normalized message: an ordered JSON object.
pub type Document = Map<String, Value>;

/// Field that wraps the parsed tree of a text payload.
pub const TEXT_ROOT_FIELD: &str = "root";

/// A function turning a raw message into a document.
pub type MessageParser = fn(&BrokerMessage) -> Result<Document, FormatError>;

/// Normalize a broker message into a [`Document`].
pub fn parse_message(message: &BrokerMessage) -> Result<Document, FormatError> {
    let mut root = Document::new();

    match &message.body {
        MessageBody::Map(entries) => {
            for (key, value) in entries {
                let field = message
                    .property(key)
                    .ok_or_else(|| FormatError::MissingFieldProperty { key: key.clone() })?;
                root.insert(field.to_string(), map_value_to_json(value));
            }
        }
        MessageBody::Text(text) => {
            debug!(id = %message.id, %text, "normalizing text message");
            match serde_json::from_str::<Value>(text) {
                Ok(tree) => {
                    root.insert(TEXT_ROOT_FIELD.to_string(), tree);
                }
                Err(e) => {
                    warn!(
                        id = %message.id,
                        error = %e,
                        "text payload is not JSON; using empty document"
                    );
                }
            }
        }
        MessageBody::Bytes(_) | MessageBody::Empty => {
            warn!(id = %message.id, "unknown message: could not read message body");
        }
    }

    Ok(root)
}

fn map_value_to_json(value: &MapValue) -> Value {
    match value {
        MapValue::Bool(b) => Value::Bool(*b),
        MapValue::Byte(n) => Value::from(*n),
        MapValue::Short(n) => Value::from(*n),
        MapValue::Int(n) => Value::from(*n),
        MapValue::Long(n) => Value::from(*n),
        MapValue::Char(c) => Value::String(c.to_string()),
        MapValue::Float(f) => float_to_json(f64::from(*f)),
        MapValue::Double(f) => float_to_json(*f),
        MapValue::String(s) => Value::String(s.clone()),
        MapValue::Bytes(bytes) => Value::String(STANDARD.encode(bytes)),
    }
}

// Non-finite floats have no JSON representation.
fn float_to_json(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}
