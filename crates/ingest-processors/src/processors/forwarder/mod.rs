// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Copies entries to a remote endpoint.
//!
//! The forwarder is a pass-through stage: every entry continues down the pipeline
//! unchanged, and a copy of each accepted entry is queued for a background worker
//! that owns the network side.
//!
//! The worker cycles through [`ForwarderState`]:
//!
//! - `Connecting`: dialing the target, retrying every second until it succeeds or the
//!   forwarder is torn down
//! - `Draining`: pulling entries off the queue and writing them. A failed write
//!   discards the connection, goes back to `Connecting`, and retries the same entry on
//!   the new connection
//! - `Closing`: [`Forwarder::close`] was called. Entries still queued are written if
//!   the target is reachable within the close timeout
//! - `Closed`: the worker has exited
//!
//! Shutdown happens in two phases. Close first signals abort and closes the queue,
//! then waits for the worker to finish draining. If it is still busy after the close
//! timeout, the shared cancellation token is fired and the live connection is torn
//! down, which unblocks any pending dial, sleep or write.

pub mod connection;
pub mod encoder;

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use regex::bytes::Regex;
use serde::Deserialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::config::{
    deserialize_bool_from_anything, deserialize_optional_duration_from_seconds,
    deserialize_optional_usize_from_anything, deserialize_string_list,
};
use crate::entry::{check_tag_name, Entry, EntryTag, Tagger};
use crate::errors::{ConfigError, ProcessError};
use crate::processors::Processor;

use connection::{Connection, Dialer, Protocol, Target};
use encoder::{new_encoder, Encoder, Format};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_BUFFER: usize = 128;
const REDIAL_INTERVAL: Duration = Duration::from_secs(1);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwarderConfig {
    /// `host:port`, or a socket path for the unix protocol.
    #[serde(rename = "Target", default)]
    pub target: String,

    /// `tcp` (default), `udp`, `tls` or `unix`.
    #[serde(rename = "Protocol", default)]
    pub protocol: Option<String>,

    /// `raw` (default), `json` or `syslog`.
    #[serde(rename = "Format", default)]
    pub format: Option<String>,

    /// Terminator for raw entries. Understands `\n`, `\r`, `\t`, `\0` and `\\`.
    #[serde(rename = "Delimiter", default)]
    pub delimiter: Option<String>,

    /// Dial timeout in seconds.
    #[serde(
        rename = "Timeout",
        default,
        deserialize_with = "deserialize_optional_duration_from_seconds"
    )]
    pub timeout: Option<Duration>,

    /// Queue depth between the pipeline and the worker.
    #[serde(
        rename = "Buffer",
        default,
        deserialize_with = "deserialize_optional_usize_from_anything"
    )]
    pub buffer: Option<usize>,

    /// Shed entries when the queue is full instead of blocking the pipeline.
    #[serde(
        rename = "Non_Blocking",
        default,
        deserialize_with = "deserialize_bool_from_anything"
    )]
    pub non_blocking: bool,

    #[serde(
        rename = "Insecure_Skip_TLS_Verify",
        default,
        deserialize_with = "deserialize_bool_from_anything"
    )]
    pub insecure_skip_tls_verify: bool,

    /// Only forward entries carrying one of these tags.
    #[serde(rename = "Tag", default, deserialize_with = "deserialize_string_list")]
    pub tags: Vec<String>,

    /// Only forward entries whose payload matches one of these expressions.
    #[serde(rename = "Regex", default, deserialize_with = "deserialize_string_list")]
    pub regexes: Vec<String>,
}

/// Settings that passed validation.
#[derive(Debug, Clone)]
pub struct ForwarderSettings {
    pub protocol: Protocol,
    pub target: Target,
    pub format: Format,
    pub delimiter: Vec<u8>,
    pub timeout: Duration,
    pub buffer: usize,
    pub non_blocking: bool,
    pub insecure_skip_tls_verify: bool,
    pub tags: Vec<String>,
    pub regexes: Vec<Regex>,
}

impl ForwarderConfig {
    pub fn validate(&self) -> Result<ForwarderSettings, ConfigError> {
        let protocol = Protocol::parse(self.protocol.as_deref().unwrap_or_default())?;
        let format = Format::parse(self.format.as_deref().unwrap_or_default())?;
        let target = Target::resolve(protocol, &self.target)?;
        let delimiter = match self.delimiter.as_deref() {
            None => b"\n".to_vec(),
            Some(d) => unescape_delimiter(d)?,
        };
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(ConfigError::Invalid("Timeout must be positive".to_string()));
        }
        let buffer = match self.buffer {
            None | Some(0) => DEFAULT_BUFFER,
            Some(n) => n,
        };
        for tag in &self.tags {
            check_tag_name(tag)?;
        }
        let regexes = self
            .regexes
            .iter()
            .map(|r| Regex::new(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ForwarderSettings {
            protocol,
            target,
            format,
            delimiter,
            timeout,
            buffer,
            non_blocking: self.non_blocking,
            insecure_skip_tls_verify: self.insecure_skip_tls_verify,
            tags: self.tags.clone(),
            regexes,
        })
    }
}

fn unescape_delimiter(raw: &str) -> Result<Vec<u8>, ConfigError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('r') => out.push(b'\r'),
            Some('t') => out.push(b'\t'),
            Some('0') => out.push(0),
            Some('\\') => out.push(b'\\'),
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unsupported escape \\{} in Delimiter",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderState {
    Connecting,
    Draining,
    Closing,
    Closed,
}

impl fmt::Display for ForwarderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ForwarderState::Connecting => "connecting",
            ForwarderState::Draining => "draining",
            ForwarderState::Closing => "closing",
            ForwarderState::Closed => "closed",
        })
    }
}

/// Decides which entries get forwarded. An empty filter accepts everything.
struct EntryFilter {
    tags: HashSet<EntryTag>,
    regexes: Vec<Regex>,
}

impl EntryFilter {
    fn accepts(&self, entry: &Entry) -> bool {
        if !self.tags.is_empty() && !self.tags.contains(&entry.tag) {
            return false;
        }
        self.regexes.is_empty() || self.regexes.iter().any(|r| r.is_match(&entry.data))
    }
}

type SharedConnection = Arc<Mutex<Option<Connection>>>;

pub struct Forwarder {
    sender: Option<mpsc::Sender<Entry>>,
    non_blocking: bool,
    filter: EntryFilter,
    /// Fired first on close; releases callers blocked on a full queue.
    abort: CancellationToken,
    /// Fired when the graceful close times out; interrupts the worker.
    ctx: CancellationToken,
    conn: SharedConnection,
    state: Arc<watch::Sender<ForwarderState>>,
    dropped: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
    close_timeout: Duration,
    target: String,
}

impl Forwarder {
    /// Builds the forwarder and starts its worker on the current tokio runtime.
    pub fn new(
        config: ForwarderConfig,
        tagger: Option<Arc<dyn Tagger>>,
    ) -> Result<Self, ConfigError> {
        let settings = config.validate()?;
        Self::with_settings(settings, tagger)
    }

    pub fn with_settings(
        settings: ForwarderSettings,
        tagger: Option<Arc<dyn Tagger>>,
    ) -> Result<Self, ConfigError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;

        let tags = if settings.tags.is_empty() {
            HashSet::new()
        } else {
            let tagger = tagger
                .as_deref()
                .ok_or(ConfigError::MissingTagger("forwarder tag filtering"))?;
            settings
                .tags
                .iter()
                .map(|name| tagger.negotiate_tag(name))
                .collect::<Result<HashSet<_>, _>>()?
        };
        let filter = EntryFilter {
            tags,
            regexes: settings.regexes,
        };
        let encoder = new_encoder(settings.format, settings.delimiter, tagger)?;
        let target = settings.target.to_string();
        let dialer = Dialer::new(
            settings.protocol,
            settings.target,
            settings.timeout,
            settings.insecure_skip_tls_verify,
        )?;

        let (sender, receiver) = mpsc::channel(settings.buffer);
        let ctx = CancellationToken::new();
        let conn: SharedConnection = Arc::new(Mutex::new(None));
        let (state, _) = watch::channel(ForwarderState::Connecting);
        let state = Arc::new(state);
        let dropped = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            receiver,
            dialer,
            encoder,
            conn: conn.clone(),
            ctx: ctx.clone(),
            state: state.clone(),
            dropped: dropped.clone(),
        };
        debug!(
            "Starting {} forwarder to {} ({} format, buffer {})",
            settings.protocol, target, settings.format, settings.buffer
        );
        let worker = runtime.spawn(worker.run());

        Ok(Forwarder {
            sender: Some(sender),
            non_blocking: settings.non_blocking,
            filter,
            abort: CancellationToken::new(),
            ctx,
            conn,
            state,
            dropped,
            worker: Some(worker),
            close_timeout: CLOSE_TIMEOUT,
            target,
        })
    }

    #[must_use]
    pub fn state(&self) -> ForwarderState {
        *self.state.borrow()
    }

    /// Watches state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ForwarderState> {
        self.state.subscribe()
    }

    /// Entries that were accepted by the filters but never reached the queue, or were
    /// left unwritten at shutdown.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn set_close_timeout(&mut self, timeout: Duration) {
        self.close_timeout = timeout;
    }

    async fn enqueue(&self, entry: Entry) {
        let Some(sender) = &self.sender else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if self.non_blocking {
            if let Err(e) = sender.try_send(entry) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Forwarder to {} shed an entry: {}", self.target, e);
            }
            return;
        }
        let accepted = tokio::select! {
            result = sender.send(entry) => result.is_ok(),
            () = self.abort.cancelled() => false,
        };
        if !accepted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait::async_trait]
impl Processor for Forwarder {
    async fn process(&mut self, entry: Entry) -> Result<Vec<Entry>, ProcessError> {
        if self.filter.accepts(&entry) {
            self.enqueue(entry.clone()).await;
        }
        Ok(vec![entry])
    }

    async fn close(&mut self) -> Result<(), ProcessError> {
        let Some(mut worker) = self.worker.take() else {
            return Ok(());
        };
        self.state.send_replace(ForwarderState::Closing);
        self.abort.cancel();
        self.sender = None;

        let joined = match tokio::time::timeout(self.close_timeout, &mut worker).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    "Forwarder to {} did not drain within {:?}, forcing shutdown",
                    self.target, self.close_timeout
                );
                self.ctx.cancel();
                drop(self.conn.lock().await.take());
                worker.await
            }
        };
        self.ctx.cancel();
        self.state.send_replace(ForwarderState::Closed);
        debug!(
            "Forwarder to {} closed, {} entries dropped",
            self.target,
            self.dropped()
        );
        joined.map_err(|e| ProcessError::Worker(e.to_string()))
    }

    fn abort_token(&self) -> Option<CancellationToken> {
        Some(self.abort.clone())
    }

    fn name(&self) -> &'static str {
        "forwarder"
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.abort.cancel();
        self.ctx.cancel();
    }
}

struct Worker {
    receiver: mpsc::Receiver<Entry>,
    dialer: Dialer,
    encoder: Box<dyn Encoder>,
    conn: SharedConnection,
    ctx: CancellationToken,
    state: Arc<watch::Sender<ForwarderState>>,
    dropped: Arc<AtomicU64>,
}

impl Worker {
    async fn run(mut self) {
        if !self.connect().await {
            self.abandon_queue();
            return;
        }
        let mut buf = Vec::new();
        loop {
            let entry = tokio::select! {
                entry = self.receiver.recv() => entry,
                () = self.ctx.cancelled() => None,
            };
            let Some(entry) = entry else {
                break;
            };
            buf.clear();
            if let Err(e) = self.encoder.encode(&entry, &mut buf) {
                warn!("Dropping entry that failed to encode: {}", e);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if !self.write_with_retry(&buf).await {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
        self.abandon_queue();
        let conn = self.conn.lock().await.take();
        if let Some(mut conn) = conn {
            tokio::select! {
                result = conn.shutdown() => {
                    if let Err(e) = result {
                        trace!("Error shutting down connection: {}", e);
                    }
                }
                () = self.ctx.cancelled() => {}
            }
        }
    }

    /// Writes `buf`, reconnecting as often as needed. Returns false once cancelled.
    async fn write_with_retry(&mut self, buf: &[u8]) -> bool {
        loop {
            match self.write(buf).await {
                Ok(()) => return true,
                Err(_) if self.ctx.is_cancelled() => return false,
                Err(e) => {
                    warn!("Write to {} failed, reconnecting: {}", self.dialer.target(), e);
                    self.conn.lock().await.take();
                    if !self.connect().await {
                        return false;
                    }
                }
            }
        }
    }

    async fn write(&self, buf: &[u8]) -> std::io::Result<()> {
        let mut guard = self.conn.lock().await;
        let Some(conn) = guard.as_mut() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection was closed",
            ));
        };
        tokio::select! {
            result = conn.write_all(buf) => result,
            () = self.ctx.cancelled() => Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "forwarder cancelled",
            )),
        }
    }

    /// Dials until connected. Returns false if cancelled first.
    async fn connect(&mut self) -> bool {
        self.set_state(ForwarderState::Connecting);
        loop {
            let dialed = tokio::select! {
                result = self.dialer.dial() => result,
                () = self.ctx.cancelled() => return false,
            };
            match dialed {
                Ok(conn) => {
                    *self.conn.lock().await = Some(conn);
                    debug!("Forwarder connected to {}", self.dialer.target());
                    self.set_state(ForwarderState::Draining);
                    return true;
                }
                Err(e) => {
                    error!(
                        "Failed to connect to {}, retrying in {:?}: {}",
                        self.dialer.target(),
                        REDIAL_INTERVAL,
                        e
                    );
                    tokio::select! {
                        () = tokio::time::sleep(REDIAL_INTERVAL) => {}
                        () = self.ctx.cancelled() => return false,
                    }
                }
            }
        }
    }

    /// Transitions unless shutdown already owns the state.
    fn set_state(&self, next: ForwarderState) {
        self.state.send_if_modified(|state| {
            if matches!(*state, ForwarderState::Closing | ForwarderState::Closed) || *state == next
            {
                return false;
            }
            trace!("Forwarder state {} -> {}", state, next);
            *state = next;
            true
        });
    }

    /// Counts whatever is still queued as dropped.
    fn abandon_queue(&mut self) {
        self.receiver.close();
        let mut abandoned = 0;
        while self.receiver.try_recv().is_ok() {
            abandoned += 1;
        }
        if abandoned > 0 {
            warn!("Forwarder abandoned {} queued entries", abandoned);
            self.dropped.fetch_add(abandoned, Ordering::Relaxed);
        }
    }
}
