// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use serde::Deserialize;
use tracing::{debug, trace};

use crate::config::{deserialize_bool_from_anything, deserialize_string_list};
use crate::entry::Entry;
use crate::errors::{ConfigError, ProcessError};
use crate::jsonpath::{self, KeyPath, ScanError};
use crate::processors::Processor;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonExtractConfig {
    /// Key paths to extract, separated by whitespace or commas.
    #[serde(
        rename = "Extractions",
        default,
        deserialize_with = "deserialize_string_list"
    )]
    pub extractions: Vec<String>,

    /// Drop entries that are missing any of the requested keys.
    #[serde(
        rename = "Strict_Extraction",
        default,
        deserialize_with = "deserialize_bool_from_anything"
    )]
    pub strict_extraction: bool,

    /// Pass entries with no matching key through untouched.
    #[serde(
        rename = "Passthrough_Misses",
        default,
        deserialize_with = "deserialize_bool_from_anything"
    )]
    pub passthrough_misses: bool,

    /// Always rebuild an object, even for a single extraction.
    #[serde(
        rename = "Force_JSON_Object",
        default,
        deserialize_with = "deserialize_bool_from_anything"
    )]
    pub force_json_object: bool,
}

impl JsonExtractConfig {
    /// Checks the flags and returns the parsed key paths.
    pub fn validate(&self) -> Result<Vec<KeyPath>, ConfigError> {
        if self.strict_extraction && self.passthrough_misses {
            return Err(ConfigError::MutuallyExclusive(
                "Strict_Extraction",
                "Passthrough_Misses",
            ));
        }
        let mut paths = Vec::new();
        for list in &self.extractions {
            paths.extend(jsonpath::split_paths(list)?);
        }
        if paths.is_empty() {
            return Err(ConfigError::MissingField("Extractions"));
        }
        let mut names = HashSet::new();
        for path in &paths {
            if path.is_root() {
                return Err(ConfigError::Invalid(
                    "Extractions cannot contain an empty key path".to_string(),
                ));
            }
            if !names.insert(path.name()) {
                return Err(ConfigError::Duplicate {
                    kind: "extraction",
                    value: path.name(),
                });
            }
        }
        Ok(paths)
    }
}

struct Extraction {
    path: KeyPath,
    /// Output member name, already quoted for JSON.
    key: Vec<u8>,
}

/// Pulls values out of JSON payloads without decoding the whole document.
pub struct JsonExtractor {
    extractions: Vec<Extraction>,
    strict: bool,
    passthrough_misses: bool,
    force_object: bool,
}

impl JsonExtractor {
    pub fn new(config: JsonExtractConfig) -> Result<Self, ConfigError> {
        let paths = config.validate()?;
        let extractions = paths
            .into_iter()
            .map(|path| {
                let key = serde_json::to_vec(&path.name()).map_err(|e| {
                    ConfigError::Invalid(format!("cannot encode key path {}: {}", path, e))
                })?;
                Ok(Extraction { path, key })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        debug!("JSON extractor configured with {} key paths", extractions.len());
        Ok(JsonExtractor {
            extractions,
            strict: config.strict_extraction,
            passthrough_misses: config.passthrough_misses,
            force_object: config.force_json_object,
        })
    }

    fn rebuild(&self, data: &[u8]) -> (Vec<u8>, usize) {
        let mut out = Vec::with_capacity(data.len());
        let mut found = 0;
        out.push(b'{');
        for extraction in &self.extractions {
            let Some(value) = lookup(data, &extraction.path) else {
                continue;
            };
            if found > 0 {
                out.push(b',');
            }
            out.extend_from_slice(&extraction.key);
            out.push(b':');
            value.write_json(&mut out);
            found += 1;
        }
        out.push(b'}');
        (out, found)
    }
}

fn lookup<'a>(data: &'a [u8], path: &KeyPath) -> Option<jsonpath::Value<'a>> {
    match jsonpath::get(data, path) {
        Ok(value) => Some(value),
        Err(ScanError::NotFound) => None,
        Err(e) => {
            trace!("Treating {} as missing: {}", path, e);
            None
        }
    }
}

#[async_trait::async_trait]
impl Processor for JsonExtractor {
    async fn process(&mut self, mut entry: Entry) -> Result<Vec<Entry>, ProcessError> {
        if let [single] = self.extractions.as_slice() {
            if !self.force_object {
                return Ok(match lookup(&entry.data, &single.path) {
                    Some(value) => {
                        entry.data = value.raw.to_vec();
                        vec![entry]
                    }
                    None if self.passthrough_misses => vec![entry],
                    None => Vec::new(),
                });
            }
        }

        let (object, found) = self.rebuild(&entry.data);
        if found == 0 {
            if self.passthrough_misses {
                return Ok(vec![entry]);
            }
            return Ok(Vec::new());
        }
        if self.strict && found < self.extractions.len() {
            trace!(
                "Dropping entry with {} of {} keys",
                found,
                self.extractions.len()
            );
            return Ok(Vec::new());
        }
        entry.data = object;
        Ok(vec![entry])
    }

    fn name(&self) -> &'static str {
        "jsonextract"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entry::EntryTag;

    fn extractor(extractions: &str, strict: bool, passthrough: bool, force: bool) -> JsonExtractor {
        JsonExtractor::new(JsonExtractConfig {
            extractions: vec![extractions.to_string()],
            strict_extraction: strict,
            passthrough_misses: passthrough,
            force_json_object: force,
        })
        .unwrap()
    }

    async fn run(stage: &mut JsonExtractor, data: &str) -> Vec<String> {
        stage
            .process(Entry::new(EntryTag(1), data))
            .await
            .unwrap()
            .into_iter()
            .map(|e| String::from_utf8(e.data).unwrap())
            .collect()
    }

    const INPUT: &str = r#"{"foo":99,"bar":"hello","foobar":{"baz":4.12}}"#;

    #[tokio::test]
    async fn test_strict_extraction() {
        let mut stage = extractor("foo bar foobar.baz", true, false, false);
        assert_eq!(
            run(&mut stage, INPUT).await,
            vec![r#"{"foo":99,"bar":"hello","baz":4.12}"#]
        );

        let mut stage = extractor("foo bar foobar.missing", true, false, false);
        assert!(run(&mut stage, INPUT).await.is_empty());
    }

    #[tokio::test]
    async fn test_partial_extraction_keeps_found_keys() {
        let mut stage = extractor("bar,nope,foo", false, false, false);
        assert_eq!(
            run(&mut stage, INPUT).await,
            vec![r#"{"bar":"hello","foo":99}"#]
        );
    }

    #[tokio::test]
    async fn test_single_extraction_replaces_payload() {
        let mut stage = extractor("foobar", false, false, false);
        assert_eq!(run(&mut stage, INPUT).await, vec![r#"{"baz":4.12}"#]);

        let mut stage = extractor("bar", false, false, false);
        assert_eq!(run(&mut stage, INPUT).await, vec!["hello"]);

        let mut stage = extractor("bar", false, false, true);
        assert_eq!(run(&mut stage, INPUT).await, vec![r#"{"bar":"hello"}"#]);
    }

    #[tokio::test]
    async fn test_misses() {
        let mut stage = extractor("a b", false, false, false);
        assert!(run(&mut stage, INPUT).await.is_empty());

        let mut stage = extractor("a b", false, true, false);
        assert_eq!(run(&mut stage, INPUT).await, vec![INPUT]);

        let mut stage = extractor("a", false, true, false);
        assert_eq!(run(&mut stage, "not json").await, vec!["not json"]);
    }

    #[tokio::test]
    async fn test_quoted_and_indexed_paths() {
        let mut stage = extractor(r#""a.b" list.[1]"#, false, false, false);
        assert_eq!(
            run(&mut stage, r#"{"a.b":true,"list":[0,"x"]}"#).await,
            vec![r#"{"a.b":true,"1":"x"}"#]
        );
    }

    #[test]
    fn test_config_validation() {
        let config = JsonExtractConfig {
            extractions: vec!["foo".to_string()],
            strict_extraction: true,
            passthrough_misses: true,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MutuallyExclusive(..))
        ));

        assert!(matches!(
            JsonExtractConfig::default().validate(),
            Err(ConfigError::MissingField("Extractions"))
        ));

        let config = JsonExtractConfig {
            extractions: vec!["a.name b.name".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Duplicate { value, .. }) if value == "name"
        ));

        let config = JsonExtractConfig {
            extractions: vec!["\"unterminated".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::KeyPath(_))));
    }
}
