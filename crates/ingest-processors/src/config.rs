// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Preprocessor configuration.
//!
//! Ingesters describe preprocessors as named blocks. Every block carries a `Type`
//! naming the stage and the stage's own settings as key/value pairs:
//!
//! ```json
//! {
//!   "unzip": { "Type": "gzip", "Passthrough_Non_Gzip": true },
//!   "fields": { "Type": "jsonextract", "Extractions": "host msg" }
//! }
//! ```
//!
//! [`ProcessorConfigs::validate`] checks every block when the configuration is loaded,
//! and [`ProcessorConfigs::processor_set`] builds an independent set from an ordered
//! list of block names for each consumer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::debug;

pub use serde_aux::prelude::deserialize_bool_from_anything;

use crate::entry::{EntryWriter, Tagger};
use crate::errors::ConfigError;
use crate::processor_set::ProcessorSet;
use crate::processors::drop::{DropAll, DropConfig};
use crate::processors::forwarder::{Forwarder, ForwarderConfig};
use crate::processors::gzip::{GzipConfig, GzipDecompressor};
use crate::processors::json_array_split::{JsonArraySplitConfig, JsonArraySplitter};
use crate::processors::json_extract::{JsonExtractConfig, JsonExtractor};
use crate::processors::json_filter::{JsonFilter, JsonFilterConfig};
use crate::processors::regex_extract::{RegexExtractConfig, RegexExtractor};
use crate::processors::regex_router::{RegexRouter, RegexRouterConfig};
use crate::processors::regex_timestamp::{RegexTimestamp, RegexTimestampConfig};
use crate::processors::Processor;

/// One named preprocessor block.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProcessorBlock {
    #[serde(rename = "Type", alias = "type", default)]
    pub kind: String,

    /// Everything except `Type`.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ProcessorBlock {
    pub fn new(kind: impl Into<String>) -> Self {
        ProcessorBlock {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    fn settings<T: DeserializeOwned>(&self, kind: &'static str) -> Result<T, ConfigError> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|source| ConfigError::Deserialize { kind, source })
    }
}

type Validator = fn(&ProcessorBlock) -> Result<(), ConfigError>;
type Builder =
    fn(&ProcessorBlock, Option<&Arc<dyn Tagger>>) -> Result<Box<dyn Processor>, ConfigError>;

struct ProcessorKind {
    name: &'static str,
    validate: Validator,
    build: Builder,
}

/// Every known `Type`, matched case-insensitively.
static PROCESSOR_KINDS: &[ProcessorKind] = &[
    ProcessorKind {
        name: "gzip",
        validate: |block| block.settings::<GzipConfig>("gzip").map(|_| ()),
        build: |block, _| {
            Ok(Box::new(GzipDecompressor::new(
                block.settings::<GzipConfig>("gzip")?,
            )))
        },
    },
    ProcessorKind {
        name: "jsonextract",
        validate: |block| {
            block
                .settings::<JsonExtractConfig>("jsonextract")?
                .validate()
                .map(|_| ())
        },
        build: |block, _| {
            Ok(Box::new(JsonExtractor::new(
                block.settings("jsonextract")?,
            )?))
        },
    },
    ProcessorKind {
        name: "jsonarraysplit",
        validate: |block| {
            block
                .settings::<JsonArraySplitConfig>("jsonarraysplit")?
                .validate()
                .map(|_| ())
        },
        build: |block, _| {
            Ok(Box::new(JsonArraySplitter::new(
                block.settings("jsonarraysplit")?,
            )?))
        },
    },
    ProcessorKind {
        name: "jsonfilter",
        validate: |block| {
            let config = block.settings::<JsonFilterConfig>("jsonfilter")?;
            config.validate()?;
            for filter in config.filters()? {
                std::fs::metadata(&filter.path).map_err(|source| ConfigError::Io {
                    path: filter.path.clone(),
                    source,
                })?;
            }
            Ok(())
        },
        build: |block, _| Ok(Box::new(JsonFilter::new(block.settings("jsonfilter")?)?)),
    },
    ProcessorKind {
        name: "regexrouter",
        validate: |block| {
            block
                .settings::<RegexRouterConfig>("regexrouter")?
                .validate()
                .map(|_| ())
        },
        build: |block, tagger| {
            let tagger = tagger.ok_or(ConfigError::MissingTagger("regexrouter"))?;
            Ok(Box::new(RegexRouter::new(
                block.settings("regexrouter")?,
                &**tagger,
            )?))
        },
    },
    ProcessorKind {
        name: "regextimestamp",
        validate: |block| {
            block
                .settings::<RegexTimestampConfig>("regextimestamp")?
                .validate()
                .map(|_| ())
        },
        build: |block, _| {
            Ok(Box::new(RegexTimestamp::new(
                block.settings("regextimestamp")?,
            )?))
        },
    },
    ProcessorKind {
        name: "regexextract",
        validate: |block| {
            block
                .settings::<RegexExtractConfig>("regexextract")?
                .validate()
                .map(|_| ())
        },
        build: |block, _| {
            Ok(Box::new(RegexExtractor::new(
                block.settings("regexextract")?,
            )?))
        },
    },
    ProcessorKind {
        name: "drop",
        validate: |block| block.settings::<DropConfig>("drop").map(|_| ()),
        build: |block, _| {
            block.settings::<DropConfig>("drop")?;
            Ok(Box::new(DropAll))
        },
    },
    ProcessorKind {
        name: "forwarder",
        validate: |block| {
            block
                .settings::<ForwarderConfig>("forwarder")?
                .validate()
                .map(|_| ())
        },
        build: |block, tagger| {
            Ok(Box::new(Forwarder::new(
                block.settings("forwarder")?,
                tagger.cloned(),
            )?))
        },
    },
];

fn lookup_kind(kind: &str) -> Result<&'static ProcessorKind, ConfigError> {
    let kind = kind.trim();
    PROCESSOR_KINDS
        .iter()
        .find(|k| k.name.eq_ignore_ascii_case(kind))
        .ok_or_else(|| ConfigError::UnknownProcessor(kind.to_string()))
}

/// Names of every processor type, for help output.
pub fn processor_types() -> impl Iterator<Item = &'static str> {
    PROCESSOR_KINDS.iter().map(|k| k.name)
}

/// Checks one block without building it.
pub fn validate_block(block: &ProcessorBlock) -> Result<(), ConfigError> {
    (lookup_kind(&block.kind)?.validate)(block)
}

/// Builds a ready-to-use stage from one block. Forwarders start their worker on the
/// current tokio runtime.
pub fn build_processor(
    block: &ProcessorBlock,
    tagger: Option<&Arc<dyn Tagger>>,
) -> Result<Box<dyn Processor>, ConfigError> {
    (lookup_kind(&block.kind)?.build)(block, tagger)
}

/// Named preprocessor blocks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ProcessorConfigs {
    blocks: BTreeMap<String, ProcessorBlock>,
}

impl ProcessorConfigs {
    #[must_use]
    pub fn new() -> Self {
        ProcessorConfigs::default()
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Deserialize {
            kind: "preprocessor",
            source,
        })
    }

    pub fn insert(&mut self, name: impl Into<String>, block: ProcessorBlock) {
        self.blocks.insert(name.into(), block);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProcessorBlock> {
        self.blocks.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Validates every block. Errors name the offending block.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, block) in &self.blocks {
            if block.kind.trim().is_empty() {
                return Err(ConfigError::MissingType { name: name.clone() });
            }
            validate_block(block).map_err(|e| e.in_block(name))?;
        }
        Ok(())
    }

    /// Builds a new set running the named blocks in order. Every call builds fresh
    /// stages, so sets never share state even when they use the same blocks.
    pub fn processor_set<S: AsRef<str>>(
        &self,
        names: &[S],
        sink: Arc<dyn EntryWriter>,
        tagger: Option<Arc<dyn Tagger>>,
    ) -> Result<ProcessorSet, ConfigError> {
        let mut set = ProcessorSet::new(sink);
        for name in names {
            let name = name.as_ref();
            let block = self
                .blocks
                .get(name)
                .ok_or_else(|| ConfigError::UnknownPreprocessor(name.to_string()))?;
            if block.kind.trim().is_empty() {
                return Err(ConfigError::MissingType {
                    name: name.to_string(),
                });
            }
            let stage = build_processor(block, tagger.as_ref()).map_err(|e| e.in_block(name))?;
            debug!("Added preprocessor {} ({})", name, stage.name());
            set.add_processor(stage);
        }
        Ok(set)
    }
}

fn invalid_type<E: serde::de::Error>(expected: &str, got: &Value) -> E {
    E::custom(format!("expected {}, got {}", expected, got))
}

/// Accepts a single string or a list of strings. Numbers are taken as their text.
pub fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    fn item<E: serde::de::Error>(value: Value) -> Result<String, E> {
        match value {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(invalid_type("a string", &other)),
        }
    }

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        Value::Array(values) => values.into_iter().map(item).collect(),
        other => Ok(vec![item(other)?]),
    }
}

/// Seconds as an integer, a float, or a string holding either.
pub fn deserialize_optional_duration_from_seconds<'de, D>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = match Value::deserialize(deserializer)? {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        other => return Err(invalid_type("a duration in seconds", &other)),
    };
    match seconds {
        Some(s) if s.is_finite() && s >= 0.0 => Ok(Some(Duration::from_secs_f64(s))),
        _ => Err(D::Error::custom(
            "duration must be a non-negative number of seconds",
        )),
    }
}

/// A non-negative integer, given as a number or a string.
pub fn deserialize_optional_usize_from_anything<'de, D>(
    deserializer: D,
) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    let parsed = match Value::deserialize(deserializer)? {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        other => return Err(invalid_type("a non-negative integer", &other)),
    };
    parsed
        .map(Some)
        .ok_or_else(|| D::Error::custom("expected a non-negative integer"))
}
