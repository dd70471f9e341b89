// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Payload builders

use flate2::{write::GzEncoder, Compression};
use std::io::Write;

/// Compresses `data` `rounds` times over
#[allow(dead_code)]
pub fn gzip_rounds(data: &[u8], rounds: usize) -> Vec<u8> {
    let mut out = data.to_vec();
    for _ in 0..rounds {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&out).unwrap();
        out = encoder.finish().unwrap();
    }
    out
}

/// `len` bytes of noise from a seeded generator
#[allow(dead_code)]
pub fn random_payload(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut out = vec![0u8; len];
    rng.fill(&mut out);
    out
}
