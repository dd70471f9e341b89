// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The unit of data flowing through a processor pipeline, plus the two capabilities the
//! pipeline borrows from the ingest muxer: tag negotiation and entry delivery.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::errors::{SinkError, TagError};

/// Maximum length of a tag name, in bytes.
pub const MAX_TAG_NAME_LEN: usize = 4096;

const FORBIDDEN_TAG_CHARS: &str = "!@#$%^&*()=+<>,.:;\"'{}[]|\\";

/// Numeric handle naming a logical data category.
///
/// Handles are owned by the muxer's tag namespace; the pipeline only resolves names to
/// handles through a [`Tagger`] and carries them around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EntryTag(pub u16);

impl fmt::Display for EntryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit of log/event data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub ts: DateTime<Utc>,
    /// Source address of the producer, when known.
    pub src: Option<IpAddr>,
    pub tag: EntryTag,
    pub data: Vec<u8>,
}

impl Entry {
    #[must_use]
    pub fn new(tag: EntryTag, data: impl Into<Vec<u8>>) -> Self {
        Entry {
            ts: Utc::now(),
            src: None,
            tag,
            data: data.into(),
        }
    }

    #[must_use]
    pub fn with_src(mut self, src: IpAddr) -> Self {
        self.src = Some(src);
        self
    }

    #[must_use]
    pub fn with_ts(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = ts;
        self
    }

    /// Builds a sibling entry that shares timestamp, source and tag but carries a new
    /// payload. Used by fan-out stages so branches never alias each other's data.
    #[must_use]
    pub fn derive(&self, data: Vec<u8>) -> Self {
        Entry {
            ts: self.ts,
            src: self.src,
            tag: self.tag,
            data,
        }
    }
}

/// Resolves tag names to handles and back.
pub trait Tagger: Send + Sync {
    fn negotiate_tag(&self, name: &str) -> Result<EntryTag, TagError>;

    fn lookup_tag(&self, tag: EntryTag) -> Option<String>;
}

/// Terminal sink of a processor set. Implemented by the ingest muxer.
#[async_trait::async_trait]
pub trait EntryWriter: Send + Sync {
    async fn write_entry(&self, entry: Entry) -> Result<(), SinkError>;

    /// Same as [`EntryWriter::write_entry`] but gives up when `cancel` fires.
    async fn write_entry_context(
        &self,
        cancel: &CancellationToken,
        entry: Entry,
    ) -> Result<(), SinkError>;
}

/// Validates a human readable tag name before it is negotiated.
pub fn check_tag_name(name: &str) -> Result<(), TagError> {
    if name.is_empty() {
        return Err(TagError::Empty);
    }
    if name.len() > MAX_TAG_NAME_LEN {
        return Err(TagError::TooLong(name.len()));
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_whitespace() || FORBIDDEN_TAG_CHARS.contains(*c))
    {
        return Err(TagError::ForbiddenCharacter {
            name: name.to_string(),
            character: c,
        });
    }
    Ok(())
}
