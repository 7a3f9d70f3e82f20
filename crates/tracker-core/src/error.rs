//! Error types for tracker-core.
//!
//! Each stage of the pipeline has its own error type. None of them escape
//! the ingestion path: the coordinator logs them and drops the message.
//!
//! | Error | Raised by | Handling |
//! |-------|-----------|----------|
//! | [`DecodeError`] | payload decoders | logged, message dropped |
//! | [`StoreError`] | state store adapter | logged, reads degrade to "no data" |
//! | [`PublishError`] | command publishers | surfaced to the caller, no retry |
//! | [`PushError`] | push gateways | logged per token, batch continues |
//! | [`CommandError`] | command dispatcher | surfaced to the caller |

use std::time::Duration;

use thiserror::Error;

use tracker_types::ParseError;

use crate::router::TopicKind;

/// A payload could not be turned into a typed record.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The topic requires a JSON object but the payload was plain text.
    #[error("{kind} payload is not JSON: {payload:?}")]
    NotJson { kind: TopicKind, payload: String },

    /// The JSON did not match the record schema.
    #[error("invalid {kind} payload: {source}")]
    Schema {
        kind: TopicKind,
        #[source]
        source: serde_json::Error,
    },

    /// The record parsed but violates a field invariant.
    #[error("invalid {kind} payload: {source}")]
    Validation {
        kind: TopicKind,
        #[source]
        source: ParseError,
    },
}

/// Failure of the state store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Backend(#[from] tracker_store::Error),

    /// A stored document does not match the expected record type.
    #[error("document error: {0}")]
    Document(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// An outbound publish to the device failed.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker not connected")]
    NotConnected,

    #[error("publish to {topic} rejected: {reason}")]
    Rejected { topic: String, reason: String },

    #[error("publish transport error: {0}")]
    Transport(String),
}

/// A push notification could not be delivered to one token.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("push gateway returned {status}: {body}")]
    Gateway { status: u16, body: String },

    #[error("push transport error: {0}")]
    Transport(String),
}

/// A command could not be dispatched.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("invalid argument for {command}: {reason}")]
    InvalidArgument {
        command: &'static str,
        reason: String,
    },

    /// The device stayed asleep for the whole wake-wait window.
    #[error("device did not wake within {}s, {command} not sent", .waited.as_secs())]
    WakeTimeout {
        command: &'static str,
        waited: Duration,
    },

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("command queue closed")]
    QueueClosed,
}

/// The pipeline coordinator has shut down and no longer accepts input.
#[derive(Debug, Clone, Copy, Error)]
#[error("pipeline is not running")]
pub struct PipelineClosed;
