// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory stand-ins for the ingest muxer

use ingest_processors::{
    check_tag_name, Entry, EntryTag, EntryWriter, SinkError, TagError, Tagger,
};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Sink that keeps every entry it receives, in arrival order
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<Entry>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.entries().into_iter().map(|e| e.data).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl EntryWriter for RecordingSink {
    async fn write_entry(&self, entry: Entry) -> Result<(), SinkError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }

    async fn write_entry_context(
        &self,
        cancel: &CancellationToken,
        entry: Entry,
    ) -> Result<(), SinkError> {
        if cancel.is_cancelled() {
            return Err("write cancelled".into());
        }
        self.write_entry(entry).await
    }
}

/// Tag namespace handing out sequential handles, starting at 1
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryTagger {
    tags: Mutex<HashMap<String, EntryTag>>,
}

#[allow(dead_code)]
impl MemoryTagger {
    pub fn tag(&self, name: &str) -> EntryTag {
        self.negotiate_tag(name).unwrap()
    }
}

impl Tagger for MemoryTagger {
    fn negotiate_tag(&self, name: &str) -> Result<EntryTag, TagError> {
        check_tag_name(name)?;
        let mut tags = self.tags.lock().unwrap();
        let next = EntryTag(tags.len() as u16 + 1);
        Ok(*tags.entry(name.to_string()).or_insert(next))
    }

    fn lookup_tag(&self, tag: EntryTag) -> Option<String> {
        self.tags
            .lock()
            .unwrap()
            .iter()
            .find(|(_, t)| **t == tag)
            .map(|(name, _)| name.clone())
    }
}
