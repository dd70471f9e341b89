// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::Read;

use flate2::read::MultiGzDecoder;
use serde::Deserialize;
use tracing::trace;

use crate::config::deserialize_bool_from_anything;
use crate::entry::Entry;
use crate::errors::ProcessError;
use crate::processors::Processor;

/// First two bytes of every gzip stream (0x8B1F little-endian).
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GzipConfig {
    /// Let payloads that are not gzip compressed through untouched instead of failing.
    #[serde(
        rename = "Passthrough_Non_Gzip",
        default,
        deserialize_with = "deserialize_bool_from_anything"
    )]
    pub passthrough_non_gzip: bool,
}

/// Decompresses gzip payloads in place.
#[derive(Debug, Clone)]
pub struct GzipDecompressor {
    passthrough_non_gzip: bool,
}

impl GzipDecompressor {
    #[must_use]
    pub fn new(config: GzipConfig) -> Self {
        GzipDecompressor {
            passthrough_non_gzip: config.passthrough_non_gzip,
        }
    }

    fn decompress(data: &[u8]) -> Result<Vec<u8>, ProcessError> {
        // Concatenated members decode as one stream.
        let mut decoder = MultiGzDecoder::new(data);
        let mut out = Vec::with_capacity(data.len().saturating_mul(2));
        decoder
            .read_to_end(&mut out)
            .map_err(ProcessError::Decompress)?;
        Ok(out)
    }
}

fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

#[async_trait::async_trait]
impl Processor for GzipDecompressor {
    async fn process(&mut self, mut entry: Entry) -> Result<Vec<Entry>, ProcessError> {
        if !is_gzip(&entry.data) {
            if self.passthrough_non_gzip {
                return Ok(vec![entry]);
            }
            return Err(ProcessError::NotGzipped);
        }
        let decompressed = Self::decompress(&entry.data)?;
        trace!(
            "Decompressed {} bytes into {}",
            entry.data.len(),
            decompressed.len()
        );
        entry.data = decompressed;
        Ok(vec![entry])
    }

    fn name(&self) -> &'static str {
        "gzip"
    }
}
