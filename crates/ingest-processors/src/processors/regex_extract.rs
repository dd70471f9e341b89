// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use regex::bytes::Regex;
use serde::Deserialize;

use crate::config::deserialize_bool_from_anything;
use crate::entry::Entry;
use crate::errors::{ConfigError, ProcessError};
use crate::processors::Processor;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegexExtractConfig {
    #[serde(rename = "Regex", default)]
    pub regex: String,

    /// Output payload. `$name` and `${name}` expand to capture groups.
    #[serde(rename = "Template", default)]
    pub template: String,

    #[serde(
        rename = "Passthrough_Misses",
        default,
        deserialize_with = "deserialize_bool_from_anything"
    )]
    pub passthrough_misses: bool,
}

impl RegexExtractConfig {
    pub fn validate(&self) -> Result<Regex, ConfigError> {
        if self.regex.is_empty() {
            return Err(ConfigError::MissingField("Regex"));
        }
        if self.template.is_empty() {
            return Err(ConfigError::MissingField("Template"));
        }
        let regex = Regex::new(&self.regex)?;
        for name in template_names(&self.template) {
            let known = match name.parse::<usize>() {
                Ok(index) => index < regex.captures_len(),
                Err(_) => regex.capture_names().any(|n| n == Some(name)),
            };
            if !known {
                return Err(ConfigError::MissingCaptureName(name.to_string()));
            }
        }
        Ok(regex)
    }
}

/// Capture names referenced by a template, following the same rules as
/// [`regex::bytes::Captures::expand`].
fn template_names(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(at) = rest.find('$') {
        rest = &rest[at + 1..];
        if let Some(braced) = rest.strip_prefix('{') {
            if let Some(end) = braced.find('}') {
                names.push(&braced[..end]);
                rest = &braced[end + 1..];
            }
            continue;
        }
        if rest.starts_with('$') {
            rest = &rest[1..];
            continue;
        }
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        if end > 0 {
            names.push(&rest[..end]);
        }
        rest = &rest[end..];
    }
    names
}

/// Rewrites payloads from a template filled with regex captures.
pub struct RegexExtractor {
    regex: Regex,
    template: Vec<u8>,
    passthrough_misses: bool,
}

impl RegexExtractor {
    pub fn new(config: RegexExtractConfig) -> Result<Self, ConfigError> {
        let regex = config.validate()?;
        Ok(RegexExtractor {
            regex,
            template: config.template.into_bytes(),
            passthrough_misses: config.passthrough_misses,
        })
    }
}

#[async_trait::async_trait]
impl Processor for RegexExtractor {
    async fn process(&mut self, mut entry: Entry) -> Result<Vec<Entry>, ProcessError> {
        let Some(captures) = self.regex.captures(&entry.data) else {
            if self.passthrough_misses {
                return Ok(vec![entry]);
            }
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(self.template.len() + entry.data.len());
        captures.expand(&self.template, &mut out);
        drop(captures);
        entry.data = out;
        Ok(vec![entry])
    }

    fn name(&self) -> &'static str {
        "regexextract"
    }
}
