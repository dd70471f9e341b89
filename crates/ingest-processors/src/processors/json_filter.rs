// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Passes or drops JSON entries depending on whether field values appear in lookup
//! files.
//!
//! Lookup values are never kept verbatim. Every line is stored as an HMAC-SHA256 of the
//! value under an instance key. The 32-byte key is drawn from the operating system RNG
//! at construction and never persisted, so digests are only comparable within one
//! filter instance.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::TryRngCore;
use sha2::Sha256;
use tracing::debug;

use crate::config::deserialize_string_list;
use crate::entry::Entry;
use crate::errors::{ConfigError, ProcessError};
use crate::jsonpath::{self, KeyPath};
use crate::processors::Processor;

const HASH_KEY_LEN: usize = 32;

type ValueHash = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchAction {
    #[default]
    Pass,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchLogic {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonFilterConfig {
    /// `pass` (default) or `drop`: what happens to entries that match.
    #[serde(rename = "Match_Action", default)]
    pub match_action: Option<String>,

    /// `and` (default) requires every field to match, `or` requires any.
    #[serde(rename = "Match_Logic", default)]
    pub match_logic: Option<String>,

    /// `<key path>,<file path>` pairs.
    #[serde(
        rename = "Field_Filter",
        default,
        deserialize_with = "deserialize_string_list"
    )]
    pub field_filters: Vec<String>,
}

/// A validated `Field_Filter` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    pub field: KeyPath,
    pub path: PathBuf,
}

impl JsonFilterConfig {
    pub fn action(&self) -> Result<MatchAction, ConfigError> {
        match self.match_action.as_deref().map(str::trim) {
            None | Some("") => Ok(MatchAction::default()),
            Some(s) if s.eq_ignore_ascii_case("pass") => Ok(MatchAction::Pass),
            Some(s) if s.eq_ignore_ascii_case("drop") => Ok(MatchAction::Drop),
            Some(s) => Err(ConfigError::Invalid(format!(
                "unknown Match_Action {:?}, expected pass or drop",
                s
            ))),
        }
    }

    pub fn logic(&self) -> Result<MatchLogic, ConfigError> {
        match self.match_logic.as_deref().map(str::trim) {
            None | Some("") => Ok(MatchLogic::default()),
            Some(s) if s.eq_ignore_ascii_case("and") => Ok(MatchLogic::And),
            Some(s) if s.eq_ignore_ascii_case("or") => Ok(MatchLogic::Or),
            Some(s) => Err(ConfigError::Invalid(format!(
                "unknown Match_Logic {:?}, expected and or or",
                s
            ))),
        }
    }

    pub fn filters(&self) -> Result<Vec<FieldFilter>, ConfigError> {
        if self.field_filters.is_empty() {
            return Err(ConfigError::MissingField("Field_Filter"));
        }
        let mut seen = HashSet::new();
        let mut filters = Vec::with_capacity(self.field_filters.len());
        for spec in &self.field_filters {
            let (field, path) = spec
                .split_once(',')
                .map(|(f, p)| (f.trim(), p.trim()))
                .filter(|(f, p)| !f.is_empty() && !p.is_empty())
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "malformed Field_Filter {:?}, expected <field>,<file>",
                        spec
                    ))
                })?;
            if !seen.insert(field.to_string()) {
                return Err(ConfigError::Duplicate {
                    kind: "filter field",
                    value: field.to_string(),
                });
            }
            filters.push(FieldFilter {
                field: KeyPath::parse(field)?,
                path: PathBuf::from(path),
            });
        }
        Ok(filters)
    }

    /// Checks everything except the lookup files themselves.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.action()?;
        self.logic()?;
        self.filters()?;
        Ok(())
    }
}

struct FieldSet {
    field: KeyPath,
    hashes: HashSet<ValueHash>,
}

pub struct JsonFilter {
    mac: Hmac<Sha256>,
    action: MatchAction,
    logic: MatchLogic,
    fields: Vec<FieldSet>,
}

impl JsonFilter {
    pub fn new(config: JsonFilterConfig) -> Result<Self, ConfigError> {
        let action = config.action()?;
        let logic = config.logic()?;
        let filters = config.filters()?;

        let mut key = [0u8; HASH_KEY_LEN];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| ConfigError::Invalid(format!("failed to draw filter key: {}", e)))?;
        let mac = Hmac::<Sha256>::new_from_slice(&key)
            .map_err(|e| ConfigError::Invalid(format!("invalid filter key: {}", e)))?;

        let mut filter = JsonFilter {
            mac,
            action,
            logic,
            fields: Vec::with_capacity(filters.len()),
        };
        for FieldFilter { field, path } in filters {
            let hashes = filter.load(&path)?;
            debug!(
                "Loaded {} filter values for {} from {}",
                hashes.len(),
                field,
                path.display()
            );
            filter.fields.push(FieldSet { field, hashes });
        }
        Ok(filter)
    }

    fn hash(&self, value: &[u8]) -> ValueHash {
        let mut mac = self.mac.clone();
        mac.update(value);
        mac.finalize().into_bytes().into()
    }

    fn load(&self, path: &Path) -> Result<HashSet<ValueHash>, ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_error)?);
        let mut hashes = HashSet::new();
        for line in reader.split(b'\n') {
            let line = line.map_err(io_error)?;
            let value = line.trim_ascii();
            if !value.is_empty() {
                hashes.insert(self.hash(value));
            }
        }
        Ok(hashes)
    }

    fn field_matches(&self, set: &FieldSet, data: &[u8]) -> bool {
        jsonpath::get(data, &set.field)
            .is_ok_and(|value| set.hashes.contains(&self.hash(value.raw)))
    }

    fn matches(&self, data: &[u8]) -> bool {
        match self.logic {
            MatchLogic::And => self.fields.iter().all(|set| self.field_matches(set, data)),
            MatchLogic::Or => self.fields.iter().any(|set| self.field_matches(set, data)),
        }
    }
}

#[async_trait::async_trait]
impl Processor for JsonFilter {
    async fn process(&mut self, entry: Entry) -> Result<Vec<Entry>, ProcessError> {
        let matched = self.matches(&entry.data);
        let keep = match self.action {
            MatchAction::Pass => matched,
            MatchAction::Drop => !matched,
        };
        Ok(if keep { vec![entry] } else { Vec::new() })
    }

    fn name(&self) -> &'static str {
        "jsonfilter"
    }
}
