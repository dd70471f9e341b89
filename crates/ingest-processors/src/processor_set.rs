// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runs entries through an ordered list of stages and hands the survivors to a sink.
//!
//! A stage may turn one entry into many. Each output continues through the remaining
//! stages before its next sibling starts, so the sink sees the leaves of the fan-out
//! tree in depth-first, left-to-right order. The first stage error aborts the entry;
//! leaves that already reached the sink stay delivered.
//!
//! Submissions are serialized: the set holds one lock for the whole walk of an entry,
//! so stages never run concurrently and one entry's fan-out is never interleaved with
//! another's. Separate sets run fully in parallel.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::entry::{Entry, EntryWriter};
use crate::errors::{CloseError, ProcessError};
use crate::processors::Processor;

pub struct ProcessorSet {
    sink: Arc<dyn EntryWriter>,
    /// `None` once the set is closed.
    stages: Mutex<Option<Vec<Box<dyn Processor>>>>,
    abort_tokens: Vec<CancellationToken>,
    stage_count: usize,
}

impl ProcessorSet {
    pub fn new(sink: Arc<dyn EntryWriter>) -> Self {
        ProcessorSet {
            sink,
            stages: Mutex::new(Some(Vec::new())),
            abort_tokens: Vec::new(),
            stage_count: 0,
        }
    }

    /// Appends a stage. Stages run in the order they are added.
    pub fn add_processor(&mut self, stage: Box<dyn Processor>) {
        let Some(stages) = self.stages.get_mut() else {
            warn!("Ignoring {} stage added to a closed set", stage.name());
            return;
        };
        if let Some(token) = stage.abort_token() {
            self.abort_tokens.push(token);
        }
        stages.push(stage);
        self.stage_count += 1;
    }

    /// Number of stages added, including after the set is closed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stage_count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn process(&self, entry: Entry) -> Result<(), ProcessError> {
        self.run(entry, None).await
    }

    /// Like [`ProcessorSet::process`], but the final sink writes give up once `cancel`
    /// fires. Stages themselves are not interrupted.
    pub async fn process_context(
        &self,
        entry: Entry,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessError> {
        self.run(entry, Some(cancel)).await
    }

    async fn run(
        &self,
        entry: Entry,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), ProcessError> {
        if entry.data.is_empty() {
            return Err(ProcessError::InvalidEntry);
        }
        let mut guard = self.stages.lock().await;
        let Some(stages) = guard.as_mut() else {
            return Err(ProcessError::NotReady);
        };

        let mut pending = vec![(entry, 0usize)];
        while let Some((entry, index)) = pending.pop() {
            let Some(stage) = stages.get_mut(index) else {
                self.deliver(entry, cancel).await?;
                continue;
            };
            let outputs = stage.process(entry).await?;
            // Reversed so the first output is walked first.
            pending.extend(outputs.into_iter().rev().map(|e| (e, index + 1)));
        }
        Ok(())
    }

    async fn deliver(
        &self,
        entry: Entry,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), ProcessError> {
        let result = match cancel {
            Some(cancel) => self.sink.write_entry_context(cancel, entry).await,
            None => self.sink.write_entry(entry).await,
        };
        result.map_err(ProcessError::Sink)
    }

    /// Closes every stage in order, continuing past failures. The sink is left alone.
    /// Later calls to `process` fail with [`ProcessError::NotReady`].
    pub async fn close(&self) -> Result<(), CloseError> {
        for token in &self.abort_tokens {
            token.cancel();
        }
        let Some(stages) = self.stages.lock().await.take() else {
            return Ok(());
        };

        let mut errors = CloseError::default();
        for (index, mut stage) in stages.into_iter().enumerate() {
            if let Err(e) = stage.close().await {
                error!("Failed to close stage {} ({}): {}", index, stage.name(), e);
                errors.push(index, stage.name(), e);
            }
        }
        debug!("Processor set closed");
        errors.into_result()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entry::EntryTag;
    use crate::errors::SinkError;
    use std::sync::Mutex as StdMutex;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingSink {
        entries: StdMutex<Vec<Entry>>,
        with_context: StdMutex<usize>,
    }

    impl RecordingSink {
        fn payloads(&self) -> Vec<String> {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .map(|e| String::from_utf8(e.data.clone()).unwrap())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl EntryWriter for RecordingSink {
        async fn write_entry(&self, entry: Entry) -> Result<(), SinkError> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }

        async fn write_entry_context(
            &self,
            cancel: &CancellationToken,
            entry: Entry,
        ) -> Result<(), SinkError> {
            if cancel.is_cancelled() {
                return Err("cancelled".into());
            }
            *self.with_context.lock().unwrap() += 1;
            self.write_entry(entry).await
        }
    }

    /// Splits every entry into `<payload>.a` and `<payload>.b`.
    struct Split;

    #[async_trait::async_trait]
    impl Processor for Split {
        async fn process(&mut self, entry: Entry) -> Result<Vec<Entry>, ProcessError> {
            let mut a = entry.data.clone();
            a.extend_from_slice(b".a");
            let mut b = entry.data.clone();
            b.extend_from_slice(b".b");
            Ok(vec![entry.derive(a), entry.derive(b)])
        }

        fn name(&self) -> &'static str {
            "split"
        }
    }

    struct Identity;

    #[async_trait::async_trait]
    impl Processor for Identity {
        async fn process(&mut self, entry: Entry) -> Result<Vec<Entry>, ProcessError> {
            Ok(vec![entry])
        }

        fn name(&self) -> &'static str {
            "identity"
        }
    }

    /// Fails on payloads ending in `fail_suffix`, and on close if `fail_close`.
    struct Picky {
        fail_suffix: &'static [u8],
        fail_close: bool,
    }

    #[async_trait::async_trait]
    impl Processor for Picky {
        async fn process(&mut self, entry: Entry) -> Result<Vec<Entry>, ProcessError> {
            if entry.data.ends_with(self.fail_suffix) {
                return Err(ProcessError::NotGzipped);
            }
            Ok(vec![entry])
        }

        async fn close(&mut self) -> Result<(), ProcessError> {
            if self.fail_close {
                return Err(ProcessError::Worker("refused".to_string()));
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "picky"
        }
    }

    fn build(sink: &Arc<RecordingSink>, stages: Vec<Box<dyn Processor>>) -> ProcessorSet {
        let mut set = ProcessorSet::new(sink.clone());
        for stage in stages {
            set.add_processor(stage);
        }
        set
    }

    #[tokio::test]
    async fn test_no_stages_writes_to_sink() {
        let sink = Arc::new(RecordingSink::default());
        let set = build(&sink, Vec::new());
        assert!(set.is_empty());

        let entry = Entry::new(EntryTag(4), "untouched");
        set.process(entry.clone()).await.unwrap();
        assert_eq!(*sink.entries.lock().unwrap(), vec![entry]);
    }

    #[tokio::test]
    async fn test_fan_out_order() {
        let sink = Arc::new(RecordingSink::default());
        let set = build(&sink, vec![Box::new(Split), Box::new(Identity)]);
        set.process(Entry::new(EntryTag(0), "x")).await.unwrap();
        assert_eq!(sink.payloads(), vec!["x.a", "x.b"]);

        let sink = Arc::new(RecordingSink::default());
        let set = build(&sink, vec![Box::new(Split), Box::new(Split)]);
        set.process(Entry::new(EntryTag(0), "x")).await.unwrap();
        assert_eq!(sink.payloads(), vec!["x.a.a", "x.a.b", "x.b.a", "x.b.b"]);
    }

    #[tokio::test]
    async fn test_error_aborts_remaining_branches() {
        let sink = Arc::new(RecordingSink::default());
        let set = build(
            &sink,
            vec![
                Box::new(Split),
                Box::new(Split),
                Box::new(Picky {
                    fail_suffix: b"b.a",
                    fail_close: false,
                }),
            ],
        );
        let result = set.process(Entry::new(EntryTag(0), "x")).await;
        assert!(matches!(result, Err(ProcessError::NotGzipped)));
        // leaves before the failing branch stay delivered
        assert_eq!(sink.payloads(), vec!["x.a.a", "x.a.b"]);
    }

    #[tokio::test]
    async fn test_drop_is_not_an_error() {
        let sink = Arc::new(RecordingSink::default());
        let set = build(
            &sink,
            vec![Box::new(crate::processors::drop::DropAll), Box::new(Identity)],
        );
        set.process(Entry::new(EntryTag(0), "gone")).await.unwrap();
        assert!(sink.payloads().is_empty());
    }

    #[tokio::test]
    async fn test_process_context_uses_context_writes() {
        let sink = Arc::new(RecordingSink::default());
        let set = build(&sink, vec![Box::new(Identity)]);
        let cancel = CancellationToken::new();

        set.process_context(Entry::new(EntryTag(0), "a"), &cancel)
            .await
            .unwrap();
        assert_eq!(*sink.with_context.lock().unwrap(), 1);

        cancel.cancel();
        let result = set
            .process_context(Entry::new(EntryTag(0), "b"), &cancel)
            .await;
        assert!(matches!(result, Err(ProcessError::Sink(_))));
        assert_eq!(sink.payloads(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_invalid_entry_and_not_ready() {
        let sink = Arc::new(RecordingSink::default());
        let set = build(&sink, vec![Box::new(Identity)]);
        assert!(matches!(
            set.process(Entry::new(EntryTag(0), "")).await,
            Err(ProcessError::InvalidEntry)
        ));

        set.close().await.unwrap();
        assert!(matches!(
            set.process(Entry::new(EntryTag(0), "late")).await,
            Err(ProcessError::NotReady)
        ));
        // closing again is a no-op
        set.close().await.unwrap();
        assert!(sink.payloads().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_close_collects_every_failure() {
        let sink = Arc::new(RecordingSink::default());
        let set = build(
            &sink,
            vec![
                Box::new(Picky {
                    fail_suffix: b"never",
                    fail_close: true,
                }),
                Box::new(Identity),
                Box::new(Picky {
                    fail_suffix: b"never",
                    fail_close: true,
                }),
            ],
        );
        let err = set.close().await.unwrap_err();
        let indexes: Vec<_> = err.failures.iter().map(|f| (f.index, f.stage)).collect();
        assert_eq!(indexes, vec![(0, "picky"), (2, "picky")]);
        assert!(logs_contain("Failed to close stage 2 (picky)"));
    }

    #[tokio::test]
    async fn test_concurrent_submissions_are_serialized() {
        let sink = Arc::new(RecordingSink::default());
        let set = Arc::new(build(&sink, vec![Box::new(Split), Box::new(Identity)]));

        let mut tasks = Vec::new();
        for i in 0..16 {
            let set = set.clone();
            tasks.push(tokio::spawn(async move {
                set.process(Entry::new(EntryTag(0), format!("{}", i)))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 32);
        for pair in payloads.chunks(2) {
            let stem = pair[0].strip_suffix(".a").unwrap();
            assert_eq!(pair[1], format!("{}.b", stem));
        }
    }
}
