// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;

use crate::entry::Entry;
use crate::errors::ProcessError;
use crate::processors::Processor;

/// `drop` takes no settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DropConfig {}

/// Discards everything. Placed last in a set, only side-effecting stages before it
/// (such as a forwarder) see the entries.
#[derive(Debug, Clone, Default)]
pub struct DropAll;

#[async_trait::async_trait]
impl Processor for DropAll {
    async fn process(&mut self, _entry: Entry) -> Result<Vec<Entry>, ProcessError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "drop"
    }
}
