// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use regex::bytes::Regex;
use serde::Deserialize;
use tracing::trace;

use crate::config::deserialize_bool_from_anything;
use crate::entry::Entry;
use crate::errors::{ConfigError, ProcessError};
use crate::processors::{compile_with_group, Processor};
use crate::timestamp::{TimeZone, TimestampExtractor};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegexTimestampConfig {
    #[serde(rename = "Regex", default)]
    pub regex: String,

    /// Capture group holding the timestamp text.
    #[serde(rename = "TS_Match_Name", default)]
    pub ts_match_name: String,

    /// strftime-style format tried instead of the built-in list.
    #[serde(rename = "Timestamp_Format_Override", default)]
    pub timestamp_format_override: Option<String>,

    /// `UTC`, `Local` or a fixed offset such as `+05:30`.
    #[serde(rename = "Timezone_Override", default)]
    pub timezone_override: Option<String>,

    #[serde(
        rename = "Assume_Local_Timezone",
        default,
        deserialize_with = "deserialize_bool_from_anything"
    )]
    pub assume_local_timezone: bool,
}

impl RegexTimestampConfig {
    pub fn validate(&self) -> Result<(Regex, usize, TimestampExtractor), ConfigError> {
        let timezone_override = self
            .timezone_override
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if timezone_override.is_some() && self.assume_local_timezone {
            return Err(ConfigError::MutuallyExclusive(
                "Timezone_Override",
                "Assume_Local_Timezone",
            ));
        }
        if self.ts_match_name.is_empty() {
            return Err(ConfigError::MissingField("TS_Match_Name"));
        }
        let (regex, group) = compile_with_group(&self.regex, &self.ts_match_name)?;

        let zone = match timezone_override {
            Some(name) => TimeZone::parse(name)?,
            None if self.assume_local_timezone => TimeZone::Local,
            None => TimeZone::Utc,
        };
        let format = self
            .timestamp_format_override
            .clone()
            .filter(|f| !f.trim().is_empty());
        let extractor = TimestampExtractor::new(format, zone)?;
        Ok((regex, group, extractor))
    }
}

/// Rewrites entry timestamps from a regex capture.
pub struct RegexTimestamp {
    regex: Regex,
    group: usize,
    extractor: TimestampExtractor,
}

impl RegexTimestamp {
    pub fn new(config: RegexTimestampConfig) -> Result<Self, ConfigError> {
        let (regex, group, extractor) = config.validate()?;
        Ok(RegexTimestamp {
            regex,
            group,
            extractor,
        })
    }
}

#[async_trait::async_trait]
impl Processor for RegexTimestamp {
    async fn process(&mut self, mut entry: Entry) -> Result<Vec<Entry>, ProcessError> {
        let capture = self
            .regex
            .captures(&entry.data)
            .and_then(|c| c.get(self.group))
            .map(|m| m.range());
        if let Some(range) = capture {
            match self.extractor.extract(&entry.data[range])? {
                Some(ts) => entry.ts = ts,
                None => trace!("No timestamp format matched, keeping original"),
            }
        }
        Ok(vec![entry])
    }

    fn name(&self) -> &'static str {
        "regextimestamp"
    }
}
