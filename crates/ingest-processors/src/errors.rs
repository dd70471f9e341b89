// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::path::PathBuf;

/// Error returned by an [`crate::entry::EntryWriter`]. Sinks are external, so their
/// error type is opaque to the pipeline.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Failures resolving or validating tag names.
#[derive(Debug, thiserror::Error)]
pub enum TagError {
    #[error("tag name is empty")]
    Empty,

    #[error("tag name is {0} bytes long, maximum is 4096")]
    TooLong(usize),

    #[error("tag name {name:?} contains forbidden character {character:?}")]
    ForbiddenCharacter { name: String, character: char },

    #[error("tag namespace is full")]
    Exhausted,

    #[error("failed to negotiate tag {name:?}: {reason}")]
    Negotiation { name: String, reason: String },
}

/// Configuration errors. All of them are detected while building stages, never while
/// processing entries.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown processor type {0:?}")]
    UnknownProcessor(String),

    #[error("preprocessor {0:?} is not defined")]
    UnknownPreprocessor(String),

    #[error("processor {name:?} has no Type")]
    MissingType { name: String },

    #[error("invalid {kind} configuration: {source}")]
    Deserialize {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("both {0} and {1} are set, they are mutually exclusive")]
    MutuallyExclusive(&'static str, &'static str),

    #[error("duplicate {kind} {value:?}")]
    Duplicate { kind: &'static str, value: String },

    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    #[error("regular expression has no capture group named {0:?}")]
    MissingCaptureName(String),

    #[error("malformed route {0:?}, expected <value>:<tag>")]
    MalformedRoute(String),

    #[error("unknown protocol {0:?}")]
    UnknownProtocol(String),

    #[error("unknown format {0:?}")]
    UnknownFormat(String),

    #[error("{0} requires a tagger")]
    MissingTagger(&'static str),

    #[error("invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tag error: {0}")]
    Tag(#[from] TagError),

    #[error("invalid key path: {0}")]
    KeyPath(#[from] crate::jsonpath::PathError),

    #[error("invalid timestamp settings: {0}")]
    Timestamp(#[from] crate::timestamp::TimestampError),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("no async runtime available to start the forwarder worker")]
    NoRuntime,

    #[error("preprocessor {name:?}: {source}")]
    InBlock {
        name: String,
        #[source]
        source: Box<ConfigError>,
    },
}

impl ConfigError {
    pub(crate) fn in_block(self, name: &str) -> Self {
        ConfigError::InBlock {
            name: name.to_string(),
            source: Box::new(self),
        }
    }

    /// The underlying error, without the preprocessor names wrapped around it.
    #[must_use]
    pub fn root(&self) -> &ConfigError {
        match self {
            ConfigError::InBlock { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Per-entry and teardown errors.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("processor set is not ready")]
    NotReady,

    #[error("invalid entry")]
    InvalidEntry,

    #[error("data is not gzip compressed")]
    NotGzipped,

    #[error("gzip decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("timestamp extraction failed: {0}")]
    Timestamp(#[from] crate::timestamp::TimestampError),

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("sink write failed: {0}")]
    Sink(#[source] SinkError),

    #[error("forwarder worker failed: {0}")]
    Worker(String),
}

/// Every stage that failed to close, in stage order.
#[derive(Debug, Default)]
pub struct CloseError {
    pub failures: Vec<StageCloseFailure>,
}

#[derive(Debug)]
pub struct StageCloseFailure {
    pub index: usize,
    pub stage: &'static str,
    pub error: ProcessError,
}

impl CloseError {
    pub(crate) fn push(&mut self, index: usize, stage: &'static str, error: ProcessError) {
        self.failures.push(StageCloseFailure {
            index,
            stage,
            error,
        });
    }

    pub(crate) fn into_result(self) -> Result<(), CloseError> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage(s) failed to close", self.failures.len())?;
        for failure in &self.failures {
            write!(
                f,
                "; stage {} ({}): {}",
                failure.index, failure.stage, failure.error
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for CloseError {}
