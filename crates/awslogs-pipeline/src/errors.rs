// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Outcome of a call against a remote client, as classified by the client implementation.
///
/// The sequenced sink reacts to the first three variants specifically; everything else is
/// treated as an opaque failure of the call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("resource already exists")]
    ResourceAlreadyExists,

    #[error("data already accepted, expected sequence token {expected_sequence_token:?}")]
    DataAlreadyAccepted {
        expected_sequence_token: Option<String>,
    },

    #[error("invalid sequence token, expected {expected_sequence_token:?}")]
    InvalidSequenceToken {
        expected_sequence_token: Option<String>,
    },

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("service error {code}: {message}")]
    Service { code: String, message: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Failure of a [`crate::sink::Sink`] operation. Surfaced to the worker as a failed flush.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to create remote client: {0}")]
    Client(#[source] ApiError),

    #[error("PutLogEvents failed: {0}")]
    PutLogEvents(#[source] ApiError),

    #[error("sequence token rejected again after retrying with the expected token")]
    SequenceTokenRetryExhausted(#[source] ApiError),

    #[error("PutObject failed for key {key}: {source}")]
    PutObject {
        key: String,
        #[source]
        source: ApiError,
    },

    #[error("failed to encode batch: {0}")]
    Encode(#[from] std::io::Error),

    #[error("failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Invalid or unresolvable configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("unknown log output type: {0}")]
    UnknownOutputType(String),

    #[error("unknown time zone: {0}")]
    UnknownTimeZone(String),

    #[error("{0} is required for the selected output type")]
    Missing(&'static str),
}
