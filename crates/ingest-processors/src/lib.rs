// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Entry preprocessing for log ingesters.
//!
//! An ingester reads raw records, wraps each one in an [`Entry`] and submits it to a
//! [`ProcessorSet`]. The set pushes the entry through an ordered list of stages (gzip
//! decompression, JSON field extraction, array splitting, filtering, regex routing and
//! timestamping, forwarding to a remote endpoint) and writes whatever survives to the
//! ingester's [`EntryWriter`].
//!
//! Stages are described by named blocks in the ingester configuration and built through
//! [`ProcessorConfigs`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]

pub mod config;
pub mod entry;
pub mod errors;
pub mod jsonpath;
pub mod processor_set;
pub mod processors;
pub mod timestamp;

pub use config::{build_processor, processor_types, ProcessorBlock, ProcessorConfigs};
pub use entry::{check_tag_name, Entry, EntryTag, EntryWriter, Tagger};
pub use errors::{CloseError, ConfigError, ProcessError, SinkError, TagError};
pub use processor_set::ProcessorSet;
pub use processors::Processor;
