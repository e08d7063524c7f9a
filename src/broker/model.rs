use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Desired subscription in the context broker.
///
/// `description` is the deduplication key: the broker assigns ids, so an
/// existing subscription is recognised by its description alone.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubscriptionSpec {
    pub description: String,
    /// Entity type the subscription watches
    pub entity_type: String,
    /// Entity id pattern (regex), usually `.*`
    pub id_pattern: String,
    /// Attribute changes that trigger a notification
    pub watched_attributes: Vec<String>,
    pub notify_url: String,
    /// Attributes included in the notification body
    pub notify_attributes: Vec<String>,
    /// Metadata included in the notification body
    pub metadata: Vec<String>,
}

impl SubscriptionSpec {
    /// NGSIv2 `POST /v2/subscriptions` body.
    pub fn to_payload(&self) -> Value {
        json!({
            "description": self.description,
            "subject": {
                "entities": [{
                    "idPattern": self.id_pattern,
                    "type": self.entity_type,
                }],
                "condition": {
                    "attrs": self.watched_attributes,
                }
            },
            "notification": {
                "attrs": self.notify_attributes,
                "http": {
                    "url": self.notify_url,
                },
                "metadata": self.metadata,
            }
        })
    }
}

/// Typed attribute value (`{"value": .., "type": ..}` on the wire).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub value: Value,
    #[serde(rename = "type")]
    pub attr_type: String,
}

impl Attribute {
    pub fn float(value: f64) -> Self {
        Self {
            value: json!(value),
            attr_type: "float".to_string(),
        }
    }
}

/// Desired initial state of a sensor entity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntitySpec {
    pub id: String,
    pub entity_type: String,
    pub attributes: BTreeMap<String, Attribute>,
}

impl EntitySpec {
    /// NGSIv2 `POST /v2/entities` body.
    pub fn to_payload(&self) -> Value {
        let mut body = self.attributes_payload();
        body.insert("id".to_string(), json!(self.id));
        body.insert("type".to_string(), json!(self.entity_type));
        Value::Object(body)
    }

    /// Attributes only, as sent to `PATCH /v2/entities/{id}/attrs`.
    pub fn attributes_payload(&self) -> Map<String, Value> {
        self.attributes
            .iter()
            .map(|(name, attr)| {
                (
                    name.clone(),
                    json!({"value": attr.value, "type": attr.attr_type}),
                )
            })
            .collect()
    }
}

/// Subscription as listed by the broker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Remaining fields, kept for introspection
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}
