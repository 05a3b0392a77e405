//! Span tree produced from a build.
//!
//! A `SpanRecord` is a fully-resolved span: every timestamp is explicit, so
//! the tree can be replayed into any tracing backend after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::Int(i64::from(value))
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanAttribute {
    pub key: String,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanStatus {
    pub code: StatusCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub events: Vec<SpanEvent>,
    pub attributes: Vec<SpanAttribute>,
    pub status: SpanStatus,
    /// Child spans, in the order they must be started.
    pub children: Vec<SpanRecord>,
}

impl SpanRecord {
    pub fn new(name: impl Into<String>, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            start_time,
            end_time,
            events: Vec::new(),
            attributes: Vec::new(),
            status: SpanStatus::default(),
            children: Vec::new(),
        }
    }

    pub fn add_event(&mut self, name: impl Into<String>, timestamp: DateTime<Utc>) {
        self.events.push(SpanEvent {
            name: name.into(),
            timestamp,
        });
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.push(SpanAttribute {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn set_status(&mut self, code: StatusCode, message: impl Into<String>) {
        self.status = SpanStatus {
            code,
            message: message.into(),
        };
    }

    /// Last value recorded for `key`.
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .rev()
            .find(|attr| attr.key == key)
            .map(|attr| &attr.value)
    }

    pub fn event(&self, name: &str) -> Option<&SpanEvent> {
        self.events.iter().find(|event| event.name == name)
    }

    /// Number of spans in this tree, including the root.
    pub fn span_count(&self) -> usize {
        1 + self.children.iter().map(SpanRecord::span_count).sum::<usize>()
    }
}
