use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Client → Server: subscription control frame
///
/// Serialized as `{"subscribe": "<topic>"}` or `{"unsubscribe": "<topic>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlFrame {
    Subscribe(String),
    Unsubscribe(String),
}

impl ControlFrame {
    /// Topic this frame refers to
    pub fn topic(&self) -> &str {
        match self {
            ControlFrame::Subscribe(topic) | ControlFrame::Unsubscribe(topic) => topic,
        }
    }
}

/// Payload handed to subscription handlers
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured frame with `labels` stripped
    Json(Value),
    /// Inbound text that was not a JSON object, delivered verbatim
    Raw(String),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Payload::Raw(text) => Some(text),
            Payload::Json(_) => None,
        }
    }
}

/// Server → Client: one inbound frame after parsing
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    /// `None` for raw frames and for objects without a `labels` array
    pub labels: Option<Vec<String>>,
    pub payload: Payload,
}

impl InboundFrame {
    /// Parse inbound text. Never fails: anything that is not a JSON object
    /// degrades to a raw payload.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(mut body)) => {
                let labels = body.remove("labels").and_then(|labels| match labels {
                    Value::Array(items) => Some(
                        items
                            .into_iter()
                            .filter_map(|item| match item {
                                Value::String(label) => Some(label),
                                _ => None,
                            })
                            .collect(),
                    ),
                    _ => None,
                });
                Self {
                    labels,
                    payload: Payload::Json(Value::Object(body)),
                }
            }
            _ => Self {
                labels: None,
                payload: Payload::Raw(text.to_string()),
            },
        }
    }

    /// Whether a subscription on `topic` should receive this frame
    pub fn matches(&self, topic: &str) -> bool {
        match (&self.payload, &self.labels) {
            (Payload::Raw(_), _) => true,
            (Payload::Json(_), Some(labels)) => labels.iter().any(|label| label == topic),
            (Payload::Json(_), None) => false,
        }
    }
}

/// Server → Client: labelled data frame as written by the hub
///
/// Wire form is the body's members plus a `labels` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    pub labels: Vec<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl DataFrame {
    pub fn new(labels: Vec<String>, body: Map<String, Value>) -> Self {
        Self { labels, body }
    }
}
