// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pipeline stages.
//!
//! Every stage implements [`Processor`]. A stage receives one entry and returns the
//! entries that continue down the pipeline:
//!
//! - an empty vector drops the entry (not an error)
//! - one entry is a transformation or a passthrough
//! - several entries fan out, each continuing independently through the later stages
//!
//! Stages are driven through a [`crate::processor_set::ProcessorSet`], which serializes
//! calls, so implementations need not be reentrant.

pub mod drop;
pub mod forwarder;
pub mod gzip;
pub mod json_array_split;
pub mod json_extract;
pub mod json_filter;
pub mod regex_extract;
pub mod regex_router;
pub mod regex_timestamp;

use regex::bytes::Regex;
use tokio_util::sync::CancellationToken;

use crate::entry::Entry;
use crate::errors::{ConfigError, ProcessError};

#[async_trait::async_trait]
pub trait Processor: Send {
    async fn process(&mut self, entry: Entry) -> Result<Vec<Entry>, ProcessError>;

    /// Releases stage resources. Called once, at shutdown.
    async fn close(&mut self) -> Result<(), ProcessError> {
        Ok(())
    }

    /// Token that releases callers blocked inside `process`. A set fires it before
    /// waiting for in-flight entries at shutdown.
    fn abort_token(&self) -> Option<CancellationToken> {
        None
    }

    /// Short stage name used in logs and close errors.
    fn name(&self) -> &'static str;
}

/// Compiles `pattern` for matching raw payload bytes and returns the index of capture
/// group `name`.
pub(crate) fn compile_with_group(
    pattern: &str,
    name: &str,
) -> Result<(Regex, usize), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::MissingField("Regex"));
    }
    if name.is_empty() {
        return Err(ConfigError::MissingCaptureName(String::new()));
    }
    let regex = Regex::new(pattern)?;
    let index = regex
        .capture_names()
        .position(|n| n == Some(name))
        .ok_or_else(|| ConfigError::MissingCaptureName(name.to_string()))?;
    Ok((regex, index))
}
