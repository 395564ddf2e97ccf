//! CloudEvents 1.0 envelope and its HTTP decoding.
//!
//! Both HTTP content modes are accepted:
//! - **structured**: the whole event is the JSON body
//!   (`application/cloudevents+json` or plain `application/json`);
//! - **binary**: attributes travel as `ce-*` headers and the body is the event data.
//!
//! ```json
//! {
//!   "specversion": "1.0",
//!   "id": "2b0d4bd6-7a3f-4b5c-9f0e-3e1f8c0d2a11",
//!   "source": "shipyard-controller",
//!   "type": "sh.keptn.event.evaluation.triggered",
//!   "datacontenttype": "application/json",
//!   "data": { "project": "sockshop", "stage": "staging" }
//! }
//! ```

use axum::http::header::CONTENT_TYPE;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SPEC_VERSION: &str = "1.0";

const BINARY_HEADER_PREFIX: &str = "ce-";

/// An inbound event. Lives only as long as the task handling it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub specversion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// Extension attributes, e.g. `shkeptncontext`.
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Malformed event body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Missing required attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("Unsupported specversion: {0}")]
    UnsupportedSpecVersion(String),

    #[error("Header {0} is not valid UTF-8")]
    InvalidHeader(String),
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            event_type: event_type.into(),
            specversion: SPEC_VERSION.to_string(),
            subject: None,
            time: None,
            datacontenttype: None,
            data: Value::Null,
            extensions: Map::new(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.datacontenttype = Some("application/json".to_string());
        self.data = data;
        self
    }

    /// Decodes an event from an HTTP request, picking the content mode from the headers.
    pub fn from_http(headers: &HeaderMap, body: &[u8]) -> Result<Self, EventError> {
        let event = if headers.contains_key("ce-specversion") {
            Self::from_binary(headers, body)?
        } else {
            serde_json::from_slice::<Event>(body)?
        };
        event.validate()?;
        Ok(event)
    }

    fn from_binary(headers: &HeaderMap, body: &[u8]) -> Result<Self, EventError> {
        let mut event = Event::new(String::new(), String::new(), String::new());
        event.specversion = String::new();
        event.datacontenttype = header_str(headers, CONTENT_TYPE.as_str())?;

        for (name, value) in headers {
            let Some(attribute) = name.as_str().strip_prefix(BINARY_HEADER_PREFIX) else {
                continue;
            };
            let value = value
                .to_str()
                .map_err(|_| EventError::InvalidHeader(name.as_str().to_string()))?
                .to_string();
            match attribute {
                "id" => event.id = value,
                "source" => event.source = value,
                "type" => event.event_type = value,
                "specversion" => event.specversion = value,
                "subject" => event.subject = Some(value),
                "time" => event.time = Some(value),
                other => {
                    event.extensions.insert(other.to_string(), Value::String(value));
                }
            }
        }

        event.data = if body.is_empty() {
            Value::Null
        } else if event
            .datacontenttype
            .as_deref()
            .is_some_and(|content_type| content_type.contains("json"))
        {
            serde_json::from_slice(body)?
        } else {
            Value::String(String::from_utf8_lossy(body).into_owned())
        };

        Ok(event)
    }

    fn validate(&self) -> Result<(), EventError> {
        if self.specversion != SPEC_VERSION {
            return Err(EventError::UnsupportedSpecVersion(self.specversion.clone()));
        }
        if self.id.is_empty() {
            return Err(EventError::MissingAttribute("id"));
        }
        if self.source.is_empty() {
            return Err(EventError::MissingAttribute("source"));
        }
        if self.event_type.is_empty() {
            return Err(EventError::MissingAttribute("type"));
        }
        Ok(())
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Result<Option<String>, EventError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::to_string)
                .map_err(|_| EventError::InvalidHeader(name.to_string()))
        })
        .transpose()
}
