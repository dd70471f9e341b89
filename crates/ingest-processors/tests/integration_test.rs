// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::helpers::{gzip_rounds, random_payload};
use common::mocks::{MemoryTagger, RecordingSink};
use ingest_processors::{
    ConfigError, Entry, EntryTag, ProcessError, ProcessorBlock, ProcessorConfigs, Tagger,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::timeout;

fn sink() -> Arc<RecordingSink> {
    Arc::new(RecordingSink::default())
}

#[tokio::test]
async fn gzip_chain_unwraps_every_layer() {
    const ROUNDS: usize = 128;
    let payload = random_payload(32 * 1024, 0x5eed);
    let compressed = gzip_rounds(&payload, ROUNDS);

    let configs = ProcessorConfigs::from_json(r#"{ "unzip": { "Type": "gzip" } }"#).unwrap();
    let names = vec!["unzip"; ROUNDS];
    let sink = sink();
    let set = configs.processor_set(&names, sink.clone(), None).unwrap();
    assert_eq!(set.len(), ROUNDS);

    set.process(Entry::new(EntryTag(3), compressed)).await.unwrap();
    assert_eq!(sink.payloads(), vec![payload]);

    // one layer too few for the chain
    let short = gzip_rounds(b"still wrapped", ROUNDS - 1);
    let result = set.process(Entry::new(EntryTag(3), short)).await;
    assert!(matches!(result, Err(ProcessError::NotGzipped)));
    assert_eq!(sink.len(), 1);

    set.close().await.unwrap();
}

#[tokio::test]
async fn strict_extraction_through_a_set() {
    let configs = ProcessorConfigs::from_json(
        r#"{
            "fields": {
                "Type": "jsonextract",
                "Extractions": "foo bar foobar.baz",
                "Strict_Extraction": "true"
            }
        }"#,
    )
    .unwrap();
    configs.validate().unwrap();

    let sink = sink();
    let set = configs.processor_set(&["fields"], sink.clone(), None).unwrap();
    set.process(Entry::new(
        EntryTag(0),
        r#"{"foo":99,"bar":"hello","foobar":{"baz":4.12}}"#,
    ))
    .await
    .unwrap();
    set.process(Entry::new(EntryTag(0), r#"{"foo":99,"bar":"hello"}"#))
        .await
        .unwrap();

    assert_eq!(
        sink.payloads(),
        vec![br#"{"foo":99,"bar":"hello","baz":4.12}"#.to_vec()]
    );
}

#[tokio::test]
async fn array_split_then_extract_keeps_order() {
    let mut configs = ProcessorConfigs::new();
    configs.insert(
        "split",
        ProcessorBlock::new("JSONArraySplit").with("Extraction", "events"),
    );
    configs.insert(
        "name",
        ProcessorBlock::new("jsonextract")
            .with("Extractions", "name")
            .with("Passthrough_Misses", true),
    );
    configs.validate().unwrap();

    let sink = sink();
    let set = configs
        .processor_set(&["split", "name"], sink.clone(), None)
        .unwrap();
    let src = "10.1.2.3".parse().unwrap();
    set.process(
        Entry::new(
            EntryTag(5),
            r#"{"events":[{"name":"a"},{"name":"b"},"plain",{"other":1}]}"#,
        )
        .with_src(src),
    )
    .await
    .unwrap();

    let entries = sink.entries();
    let payloads: Vec<_> = entries
        .iter()
        .map(|e| String::from_utf8(e.data.clone()).unwrap())
        .collect();
    assert_eq!(payloads, vec!["a", "b", "plain", r#"{"other":1}"#]);
    assert!(entries.iter().all(|e| e.tag == EntryTag(5) && e.src == Some(src)));
}

#[tokio::test]
async fn router_retags_and_drops_misses() {
    let configs = ProcessorConfigs::from_json(
        r#"{
            "route": {
                "Type": "regexrouter",
                "Regex": "app=(?P<app>\\S+)",
                "Route_Extraction": "app",
                "Route": ["web:webtag", "noise:"],
                "Drop_Misses": true
            }
        }"#,
    )
    .unwrap();
    let tagger = Arc::new(MemoryTagger::default());
    let shared: Arc<dyn Tagger> = tagger.clone();
    let sink = sink();
    let set = configs
        .processor_set(&["route"], sink.clone(), Some(shared))
        .unwrap();

    for line in ["app=web hit", "app=noise hit", "app=other hit", "no app"] {
        set.process(Entry::new(EntryTag(0), line)).await.unwrap();
    }

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].data, b"app=web hit");
    assert_eq!(entries[0].tag, tagger.tag("webtag"));
}

#[tokio::test]
async fn router_needs_a_tagger() {
    let mut configs = ProcessorConfigs::new();
    configs.insert(
        "route",
        ProcessorBlock::new("regexrouter")
            .with("Regex", "(?P<x>.)")
            .with("Route_Extraction", "x")
            .with("Route", "a:b"),
    );
    let err = configs
        .processor_set(&["route"], sink(), None)
        .err()
        .unwrap();
    assert!(matches!(err.root(), ConfigError::MissingTagger(_)));
    assert!(err.to_string().starts_with("preprocessor \"route\""));
}

#[tokio::test]
async fn empty_set_writes_straight_through() {
    let configs = ProcessorConfigs::new();
    let sink = sink();
    let names: [&str; 0] = [];
    let set = configs.processor_set(&names, sink.clone(), None).unwrap();
    assert!(set.is_empty());

    let entry = Entry::new(EntryTag(9), vec![0xffu8, 0x00, 0xfe]);
    set.process(entry.clone()).await.unwrap();
    assert_eq!(sink.entries(), vec![entry]);
}

#[tokio::test]
async fn sets_built_from_the_same_blocks_are_independent() {
    let configs = ProcessorConfigs::from_json(
        r#"{
            "extract": { "Type": "regexextract", "Regex": "id=(?P<id>\\d+)", "Template": "${id}" }
        }"#,
    )
    .unwrap();
    let first_sink = sink();
    let second_sink = sink();
    let first = configs
        .processor_set(&["extract"], first_sink.clone(), None)
        .unwrap();
    let second = configs
        .processor_set(&["extract"], second_sink.clone(), None)
        .unwrap();

    first.close().await.unwrap();
    assert!(matches!(
        first.process(Entry::new(EntryTag(0), "id=1")).await,
        Err(ProcessError::NotReady)
    ));
    second
        .process(Entry::new(EntryTag(0), "id=42 rest"))
        .await
        .unwrap();
    assert_eq!(second_sink.payloads(), vec![b"42".to_vec()]);
    assert!(first_sink.payloads().is_empty());
}

#[tokio::test]
async fn unknown_block_names_are_rejected() {
    let configs = ProcessorConfigs::from_json(r#"{ "a": { "Type": "drop" } }"#).unwrap();
    assert!(matches!(
        configs.processor_set(&["a", "b"], sink(), None),
        Err(ConfigError::UnknownPreprocessor(name)) if name == "b"
    ));

    let configs = ProcessorConfigs::from_json(r#"{ "a": { "Type": "teleport" } }"#).unwrap();
    let err = configs.validate().unwrap_err();
    assert!(matches!(err.root(), ConfigError::UnknownProcessor(kind) if kind == "teleport"));
}

#[tokio::test]
async fn forwarder_copies_then_drop_discards() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = listener.local_addr().unwrap().to_string();

    let mut configs = ProcessorConfigs::new();
    configs.insert(
        "fwd",
        ProcessorBlock::new("forwarder")
            .with("Target", target.as_str())
            .with("Format", "json"),
    );
    configs.insert("discard", ProcessorBlock::new("drop"));
    configs.validate().unwrap();

    let tagger = Arc::new(MemoryTagger::default());
    let tag = tagger.tag("web");
    let shared: Arc<dyn Tagger> = tagger.clone();
    let sink = sink();
    let set = configs
        .processor_set(&["fwd", "discard"], sink.clone(), Some(shared))
        .unwrap();

    set.process(Entry::new(tag, "GET /index.html")).await.unwrap();

    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    let mut lines = BufReader::new(stream).lines();
    let line = timeout(Duration::from_secs(5), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let record: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(record["Tag"], "web");
    assert_eq!(record["Data"], "R0VUIC9pbmRleC5odG1s");
    assert_eq!(tagger.lookup_tag(tag).as_deref(), Some("web"));

    set.close().await.unwrap();
    assert!(sink.payloads().is_empty());
}

#[tokio::test]
async fn non_blocking_forwarder_never_stalls_the_set() {
    // reserve a port, then free it so nothing is listening
    let target = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };

    let configs = ProcessorConfigs::from_json(&format!(
        r#"{{
            "fwd": {{ "Type": "forwarder", "Target": "{}", "Buffer": 2, "Non_Blocking": "true" }}
        }}"#,
        target
    ))
    .unwrap();
    let sink = sink();
    let set = configs.processor_set(&["fwd"], sink.clone(), None).unwrap();

    timeout(Duration::from_secs(2), async {
        for i in 0..32 {
            set.process(Entry::new(EntryTag(0), format!("line {}", i)))
                .await
                .unwrap();
        }
    })
    .await
    .unwrap();
    assert_eq!(sink.len(), 32);

    timeout(Duration::from_secs(10), set.close())
        .await
        .unwrap()
        .unwrap();
}
