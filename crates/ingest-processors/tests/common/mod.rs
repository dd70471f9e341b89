// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared sinks, taggers and payload builders for integration tests

pub mod helpers;
pub mod mocks;
