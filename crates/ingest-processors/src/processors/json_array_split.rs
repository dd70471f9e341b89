// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;
use tracing::{debug, trace};

use crate::config::deserialize_bool_from_anything;
use crate::entry::Entry;
use crate::errors::{ConfigError, ProcessError};
use crate::jsonpath::{self, KeyPath};
use crate::processors::Processor;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonArraySplitConfig {
    /// Path to the array. Empty means the payload itself is the array.
    #[serde(rename = "Extraction", default)]
    pub extraction: String,

    #[serde(
        rename = "Passthrough_Misses",
        default,
        deserialize_with = "deserialize_bool_from_anything"
    )]
    pub passthrough_misses: bool,

    /// Wrap every element as `{"<last segment>": element}`.
    #[serde(
        rename = "Force_JSON_Object",
        default,
        deserialize_with = "deserialize_bool_from_anything"
    )]
    pub force_json_object: bool,
}

impl JsonArraySplitConfig {
    pub fn validate(&self) -> Result<KeyPath, ConfigError> {
        let path = KeyPath::parse(&self.extraction)?;
        if path.is_root() && self.force_json_object {
            return Err(ConfigError::Invalid(
                "Force_JSON_Object requires a non-empty Extraction".to_string(),
            ));
        }
        Ok(path)
    }
}

/// Emits one entry per element of a JSON array.
pub struct JsonArraySplitter {
    path: KeyPath,
    /// Quoted object key, set when elements are wrapped.
    wrap_key: Option<Vec<u8>>,
    passthrough_misses: bool,
}

impl JsonArraySplitter {
    pub fn new(config: JsonArraySplitConfig) -> Result<Self, ConfigError> {
        let path = config.validate()?;
        let wrap_key = if config.force_json_object {
            Some(serde_json::to_vec(&path.name()).map_err(|e| {
                ConfigError::Invalid(format!("cannot encode key path {}: {}", path, e))
            })?)
        } else {
            None
        };
        debug!("JSON array splitter configured on path {:?}", path.to_string());
        Ok(JsonArraySplitter {
            path,
            wrap_key,
            passthrough_misses: config.passthrough_misses,
        })
    }
}

#[async_trait::async_trait]
impl Processor for JsonArraySplitter {
    async fn process(&mut self, entry: Entry) -> Result<Vec<Entry>, ProcessError> {
        let mut out = Vec::new();
        let result = jsonpath::array_each(&entry.data, &self.path, |value| {
            let data = match &self.wrap_key {
                Some(key) => {
                    let mut data = Vec::with_capacity(key.len() + value.raw.len() + 5);
                    data.push(b'{');
                    data.extend_from_slice(key);
                    data.push(b':');
                    value.write_json(&mut data);
                    data.push(b'}');
                    data
                }
                None => value.raw.to_vec(),
            };
            out.push(entry.derive(data));
        });

        match result {
            Ok(()) => Ok(out),
            Err(e) => {
                trace!("No array at {}: {}", self.path, e);
                if self.passthrough_misses {
                    Ok(vec![entry])
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "jsonarraysplit"
    }
}
