//! Core data models used throughout mailcue.
//!
//! These types represent the stored question/answer records, the chat turns
//! sent to the language model, and the transient status events published by
//! the pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored training example: one captured (incoming, outgoing) pair.
///
/// Immutable once created except for deletion; there is no update operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub input: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    /// ISO-8601 creation time. Records created by hand may omit it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// A record before the store has assigned it an identifier.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub input: String,
    pub output: String,
    pub raw_input: Option<String>,
    pub raw_output: Option<String>,
    pub timestamp: Option<String>,
}

impl NewRecord {
    /// A plain pair with no raw forms, as created via the records CLI or
    /// the `POST /records` endpoint.
    pub fn pair(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            raw_input: None,
            raw_output: None,
            timestamp: None,
        }
    }
}

/// Speaker role for a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of the seed conversation handed to a model session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters for a model session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_k: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
        }
    }
}

/// The closed set of status event variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusKind {
    Status,
    Response,
    Error,
}

/// A transient pipeline status message. Never persisted; the status bus
/// keeps only the most recent one for late-joining readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub kind: StatusKind,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(kind: StatusKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }
}
