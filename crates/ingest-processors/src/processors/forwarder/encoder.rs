// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire formats for forwarded entries.

use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::SecondsFormat;
use serde::Serialize;

use crate::entry::{Entry, Tagger};
use crate::errors::{ConfigError, ProcessError};

/// RFC 5424 limits APP-NAME to 48 characters.
const SYSLOG_APP_NAME_MAX: usize = 48;

/// Priority 13: facility user, severity notice.
const SYSLOG_HEADER: &[u8] = b"<13>1 ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Raw,
    Json,
    Syslog,
}

impl Format {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "raw" => Ok(Format::Raw),
            "json" => Ok(Format::Json),
            "syslog" | "rfc5424" => Ok(Format::Syslog),
            _ => Err(ConfigError::UnknownFormat(name.to_string())),
        }
    }

    fn needs_tagger(self) -> bool {
        !matches!(self, Format::Raw)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Raw => "raw",
            Format::Json => "json",
            Format::Syslog => "syslog",
        })
    }
}

/// Serializes one entry into `out`. The buffer is reused between entries and is not
/// cleared by the encoder.
pub trait Encoder: Send + Sync {
    fn encode(&mut self, entry: &Entry, out: &mut Vec<u8>) -> Result<(), ProcessError>;
}

pub fn new_encoder(
    format: Format,
    delimiter: Vec<u8>,
    tagger: Option<Arc<dyn Tagger>>,
) -> Result<Box<dyn Encoder>, ConfigError> {
    let tagger = match (format.needs_tagger(), tagger) {
        (false, _) => None,
        (true, Some(tagger)) => Some(tagger),
        (true, None) => {
            return Err(ConfigError::MissingTagger(match format {
                Format::Json => "json forwarding",
                _ => "syslog forwarding",
            }))
        }
    };
    Ok(match (format, tagger) {
        (Format::Json, Some(tagger)) => Box::new(JsonEncoder { tagger }),
        (Format::Syslog, Some(tagger)) => Box::new(SyslogEncoder { tagger }),
        _ => Box::new(RawEncoder { delimiter }),
    })
}

/// Payload followed by the delimiter.
pub struct RawEncoder {
    delimiter: Vec<u8>,
}

impl Encoder for RawEncoder {
    fn encode(&mut self, entry: &Entry, out: &mut Vec<u8>) -> Result<(), ProcessError> {
        out.extend_from_slice(&entry.data);
        out.extend_from_slice(&self.delimiter);
        Ok(())
    }
}

fn tag_name(tagger: &dyn Tagger, entry: &Entry) -> Result<String, ProcessError> {
    tagger
        .lookup_tag(entry.tag)
        .ok_or_else(|| ProcessError::Encode(format!("unknown tag {}", entry.tag)))
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    #[serde(rename = "TS")]
    ts: String,
    #[serde(rename = "Tag")]
    tag: &'a str,
    #[serde(rename = "SRC")]
    src: String,
    #[serde(rename = "Data")]
    data: String,
}

/// One JSON object per line, payload base64 encoded.
pub struct JsonEncoder {
    tagger: Arc<dyn Tagger>,
}

impl Encoder for JsonEncoder {
    fn encode(&mut self, entry: &Entry, out: &mut Vec<u8>) -> Result<(), ProcessError> {
        let tag = tag_name(self.tagger.as_ref(), entry)?;
        let record = JsonRecord {
            ts: entry.ts.to_rfc3339_opts(SecondsFormat::Nanos, true),
            tag: &tag,
            src: entry.src.map(|ip| ip.to_string()).unwrap_or_default(),
            data: STANDARD.encode(&entry.data),
        };
        serde_json::to_writer(&mut *out, &record)
            .map_err(|e| ProcessError::Encode(e.to_string()))?;
        out.push(b'\n');
        Ok(())
    }
}

/// RFC 5424 framing: `<13>1 TIMESTAMP HOST APP-NAME - - - MSG`.
pub struct SyslogEncoder {
    tagger: Arc<dyn Tagger>,
}

impl Encoder for SyslogEncoder {
    fn encode(&mut self, entry: &Entry, out: &mut Vec<u8>) -> Result<(), ProcessError> {
        let mut app_name = tag_name(self.tagger.as_ref(), entry)?;
        if app_name.len() > SYSLOG_APP_NAME_MAX {
            let mut end = SYSLOG_APP_NAME_MAX;
            while !app_name.is_char_boundary(end) {
                end -= 1;
            }
            app_name.truncate(end);
        }
        let host = entry
            .src
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "-".to_string());

        out.extend_from_slice(SYSLOG_HEADER);
        out.extend_from_slice(
            entry
                .ts
                .to_rfc3339_opts(SecondsFormat::Micros, true)
                .as_bytes(),
        );
        out.push(b' ');
        out.extend_from_slice(host.as_bytes());
        out.push(b' ');
        out.extend_from_slice(app_name.as_bytes());
        out.extend_from_slice(b" - - - ");
        out.extend_from_slice(&entry.data);
        out.push(b'\n');
        Ok(())
    }
}
