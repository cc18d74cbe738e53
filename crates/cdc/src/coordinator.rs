//! CDC coordinator
//!
//! A per-namespace-group aggregator. Shards register over persistent
//! bidirectional channels and stream sequence-ordered event batches; the
//! coordinator buffers them per namespace, flushes on size and time
//! thresholds through the durable writer, and acknowledges each
//! contributing shard with its new high watermark.
//!
//! One worker thread owns all coordinator state and processes one message
//! to completion before the next, so handlers never race; shards,
//! connection forwarders, and the flush ticker only exchange messages
//! with it.

use crate::channel::{duplex, ChannelEnd};
use crate::event::SequencedEvent;
use crate::index_build::IndexBuilder;
use crate::wire::WireMessage;
use crate::writer::{DurableWriter, ErrorEvent, FlushOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use trellis_core::{CdcConfig, Error, Result, RetryConfig};
use trellis_store::BlobStore;

/// Persisted registration record for one shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardRegistration {
    /// Registered shard
    pub shard_id: String,
    /// Namespace the shard produces into
    pub namespace: String,
    /// Durable high watermark
    #[serde(with = "trellis_core::wire_u64")]
    pub last_sequence: u64,
    /// Wall-clock registration time (ms since epoch)
    #[serde(with = "trellis_core::wire_u64")]
    pub registered_at: u64,
}

/// Blob key of a shard's persisted registration record.
fn registration_key(shard_id: &str) -> String {
    format!("meta/shards/{}.json", shard_id)
}

/// Snapshot of coordinator statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Events buffered across namespaces, awaiting flush
    pub events_buffered: u64,
    /// Events durably flushed since startup
    pub events_flushed: u64,
    /// Successful flushes since startup
    pub flush_count: u64,
    /// Blob bytes written since startup
    pub bytes_written: u64,
    /// Currently registered shards
    pub registered_shards: u64,
    /// Startup wall-clock time (ms since epoch)
    pub startup_timestamp: u64,
    /// Milliseconds since startup
    pub uptime_ms: u64,
}

#[derive(Default)]
struct StatsInner {
    events_buffered: AtomicU64,
    events_flushed: AtomicU64,
    flush_count: AtomicU64,
    bytes_written: AtomicU64,
    registered_shards: AtomicU64,
}

enum Inbound {
    Connected {
        conn_id: u64,
        reply: Sender<String>,
    },
    Frame {
        conn_id: u64,
        raw: String,
    },
    Disconnected {
        conn_id: u64,
    },
    Tick,
    Flush {
        namespace: String,
        reply: Sender<Result<Option<FlushOutcome>>>,
    },
    Shutdown,
}

struct ShardState {
    registration: ShardRegistration,
    /// Highest sequence received (pending or durable); dedup boundary
    highest_received: u64,
    conn_id: Option<u64>,
}

#[derive(Default)]
struct NamespaceState {
    /// (shard_id, event) pairs awaiting durable flush, arrival order
    pending: Vec<(String, SequencedEvent)>,
    builder: IndexBuilder,
    generation: u64,
}

/// The coordinator handle; work happens on its worker thread.
pub struct Coordinator {
    inbox: Sender<Inbound>,
    writer: Arc<DurableWriter>,
    stats: Arc<StatsInner>,
    startup_timestamp: u64,
    started: Instant,
    next_conn_id: AtomicU64,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
    ticker: parking_lot::Mutex<Option<JoinHandle<()>>>,
    ticker_stop: parking_lot::Mutex<Option<Sender<()>>>,
}

impl Coordinator {
    /// Start a coordinator over `store`.
    pub fn new(store: Arc<dyn BlobStore>, config: CdcConfig, retry: RetryConfig) -> Self {
        let writer = Arc::new(DurableWriter::new(Arc::clone(&store), retry));
        let stats = Arc::new(StatsInner::default());
        let (inbox_tx, inbox_rx) = channel();

        let worker = {
            let writer = Arc::clone(&writer);
            let stats = Arc::clone(&stats);
            let config = config.clone();
            std::thread::Builder::new()
                .name("trellis-coordinator".to_string())
                .spawn(move || {
                    let mut state = WorkerState {
                        store,
                        writer,
                        stats,
                        config,
                        shards: HashMap::new(),
                        namespaces: HashMap::new(),
                        conns: HashMap::new(),
                    };
                    state.run(inbox_rx);
                })
                .expect("failed to spawn coordinator worker")
        };

        let (ticker_stop_tx, ticker_stop_rx) = channel::<()>();
        let ticker = {
            let inbox = inbox_tx.clone();
            let interval = Duration::from_millis(config.flush_interval_ms.max(1));
            std::thread::Builder::new()
                .name("trellis-coordinator-tick".to_string())
                .spawn(move || loop {
                    // recv_timeout doubles as an interruptible sleep: the
                    // stop sender dropping wakes the ticker immediately.
                    match ticker_stop_rx.recv_timeout(interval) {
                        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                            if inbox.send(Inbound::Tick).is_err() {
                                return;
                            }
                        }
                        _ => return,
                    }
                })
                .expect("failed to spawn coordinator ticker")
        };

        info!(target: "trellis::coordinator", "coordinator started");
        Coordinator {
            inbox: inbox_tx,
            writer,
            stats,
            startup_timestamp: trellis_core::now_ms(),
            started: Instant::now(),
            next_conn_id: AtomicU64::new(1),
            worker: parking_lot::Mutex::new(Some(worker)),
            ticker: parking_lot::Mutex::new(Some(ticker)),
            ticker_stop: parking_lot::Mutex::new(Some(ticker_stop_tx)),
        }
    }

    /// Open a channel for a shard; returns the shard's endpoint.
    ///
    /// A forwarder thread pumps the shard's frames into the worker inbox
    /// and reports the disconnect when the shard drops its endpoint.
    pub fn connect(&self) -> ChannelEnd {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (shard_end, coord_end) = duplex();
        let (reply_tx, frame_rx) = coord_end.into_parts();

        let _ = self.inbox.send(Inbound::Connected {
            conn_id,
            reply: reply_tx,
        });

        let inbox = self.inbox.clone();
        std::thread::Builder::new()
            .name(format!("trellis-cdc-conn-{}", conn_id))
            .spawn(move || {
                forward_frames(conn_id, frame_rx, inbox);
            })
            .expect("failed to spawn connection forwarder");

        shard_end
    }

    /// Explicitly flush one namespace; returns the outcome (None when the
    /// namespace had nothing pending).
    ///
    /// Unlike interval flushes, the caller receives the final error.
    pub fn flush_namespace(&self, namespace: &str) -> Result<Option<FlushOutcome>> {
        let (reply_tx, reply_rx) = channel();
        self.inbox
            .send(Inbound::Flush {
                namespace: namespace.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| Error::transient("coordinator is shut down"))?;
        reply_rx
            .recv()
            .map_err(|_| Error::transient("coordinator is shut down"))?
    }

    /// Current statistics.
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            events_buffered: self.stats.events_buffered.load(Ordering::Relaxed),
            events_flushed: self.stats.events_flushed.load(Ordering::Relaxed),
            flush_count: self.stats.flush_count.load(Ordering::Relaxed),
            bytes_written: self.stats.bytes_written.load(Ordering::Relaxed),
            registered_shards: self.stats.registered_shards.load(Ordering::Relaxed),
            startup_timestamp: self.startup_timestamp,
            uptime_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    /// Error events emitted by the durable writer.
    pub fn error_events(&self) -> Vec<ErrorEvent> {
        self.writer.error_events()
    }

    /// Register a writer error callback.
    pub fn on_error(&self, callback: impl Fn(&ErrorEvent) + Send + Sync + 'static) {
        self.writer.on_error(callback);
    }

    /// Flush everything and stop the worker.
    pub fn shutdown(&self) {
        // Dropping the stop sender wakes the ticker out of its sleep.
        drop(self.ticker_stop.lock().take());
        let _ = self.inbox.send(Inbound::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.ticker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn forward_frames(conn_id: u64, frame_rx: Receiver<String>, inbox: Sender<Inbound>) {
    loop {
        match frame_rx.recv() {
            Ok(raw) => {
                if inbox.send(Inbound::Frame { conn_id, raw }).is_err() {
                    return;
                }
            }
            Err(_) => {
                let _ = inbox.send(Inbound::Disconnected { conn_id });
                return;
            }
        }
    }
}

struct WorkerState {
    store: Arc<dyn BlobStore>,
    writer: Arc<DurableWriter>,
    stats: Arc<StatsInner>,
    config: CdcConfig,
    shards: HashMap<String, ShardState>,
    namespaces: HashMap<String, NamespaceState>,
    conns: HashMap<u64, Sender<String>>,
}

impl WorkerState {
    fn run(&mut self, inbox: Receiver<Inbound>) {
        while let Ok(message) = inbox.recv() {
            match message {
                Inbound::Connected { conn_id, reply } => {
                    self.conns.insert(conn_id, reply);
                }
                Inbound::Frame { conn_id, raw } => match WireMessage::decode(&raw) {
                    Ok(msg) => self.handle_frame(conn_id, msg),
                    Err(e) => self.reply_error(conn_id, format!("unparseable frame: {}", e)),
                },
                Inbound::Disconnected { conn_id } => self.handle_disconnect(conn_id),
                Inbound::Tick => self.flush_all("tick"),
                Inbound::Flush { namespace, reply } => {
                    let _ = reply.send(self.flush_namespace(&namespace));
                }
                Inbound::Shutdown => {
                    self.flush_all("shutdown");
                    return;
                }
            }
        }
    }

    fn reply(&self, conn_id: u64, msg: &WireMessage) {
        if let Some(tx) = self.conns.get(&conn_id) {
            if let Ok(raw) = msg.encode() {
                let _ = tx.send(raw);
            }
        }
    }

    fn reply_error(&self, conn_id: u64, message: String) {
        self.reply(conn_id, &WireMessage::Error { message });
    }

    fn handle_frame(&mut self, conn_id: u64, msg: WireMessage) {
        match msg {
            WireMessage::Register {
                shard_id,
                namespace,
                last_sequence,
            } => self.handle_register(conn_id, shard_id, namespace, last_sequence),
            WireMessage::Cdc {
                shard_id,
                events,
                sequence,
            } => self.handle_cdc(conn_id, shard_id, events, sequence),
            WireMessage::Deregister { shard_id } => {
                self.shards.remove(&shard_id);
                self.stats
                    .registered_shards
                    .store(self.shards.len() as u64, Ordering::Relaxed);
                info!(target: "trellis::coordinator", shard_id = %shard_id, "shard deregistered");
            }
            WireMessage::Error { message } => {
                warn!(target: "trellis::coordinator", message = %message, "shard error frame");
            }
            other => {
                warn!(
                    target: "trellis::coordinator",
                    frame = ?other,
                    "unexpected frame on coordinator channel"
                );
            }
        }
    }

    fn handle_register(
        &mut self,
        conn_id: u64,
        shard_id: String,
        namespace: String,
        last_sequence: u64,
    ) {
        if let Some(existing) = self.shards.get(&shard_id) {
            if last_sequence > existing.registration.last_sequence {
                // Operator policy: a watermark above our persisted value
                // suggests state we never saw; accept it and log.
                warn!(
                    target: "trellis::coordinator",
                    shard_id = %shard_id,
                    declared = last_sequence,
                    persisted = existing.registration.last_sequence,
                    "register with watermark above persisted value"
                );
            }
        }

        let registration = ShardRegistration {
            shard_id: shard_id.clone(),
            namespace: namespace.clone(),
            last_sequence,
            registered_at: trellis_core::now_ms(),
        };
        self.shards.insert(
            shard_id.clone(),
            ShardState {
                registration,
                highest_received: last_sequence,
                conn_id: Some(conn_id),
            },
        );
        self.namespaces.entry(namespace).or_default();
        self.stats
            .registered_shards
            .store(self.shards.len() as u64, Ordering::Relaxed);

        debug!(
            target: "trellis::coordinator",
            shard_id = %shard_id,
            last_sequence,
            "shard registered"
        );
        self.reply(
            conn_id,
            &WireMessage::Registered {
                shard_id,
                last_sequence,
            },
        );
    }

    fn handle_cdc(
        &mut self,
        conn_id: u64,
        shard_id: String,
        events: Vec<SequencedEvent>,
        sequence: u64,
    ) {
        let shard = match self.shards.get_mut(&shard_id) {
            Some(shard) => shard,
            None => {
                let message = Error::NotRegistered(shard_id).to_string();
                self.reply_error(conn_id, message);
                return;
            }
        };

        // Empty batches are valid keepalives: no buffer change, no
        // sequence change.
        if events.is_empty() {
            return;
        }

        if sequence <= shard.highest_received {
            let message = Error::OutOfOrder {
                last: shard.highest_received,
                got: sequence,
            }
            .to_string();
            self.reply_error(conn_id, message);
            return;
        }
        if events.last().map(|e| e.sequence) != Some(sequence) {
            self.reply_error(
                conn_id,
                format!("batch sequence {} does not match last event", sequence),
            );
            return;
        }
        let expected = shard.highest_received + events.len() as u64;
        if sequence > expected {
            // Sequence gap: the shard's buffer overflowed and dropped the
            // prefix. Accept what arrived; the loss is observable here.
            warn!(
                target: "trellis::coordinator",
                shard_id = %shard_id,
                expected,
                got = sequence,
                "sequence gap detected (events lost at shard)"
            );
        }

        shard.highest_received = sequence;
        let namespace = shard.registration.namespace.clone();
        let count = events.len();
        let ns = self.namespaces.entry(namespace.clone()).or_default();
        for event in events {
            ns.pending.push((shard_id.clone(), event));
        }
        self.stats
            .events_buffered
            .fetch_add(count as u64, Ordering::Relaxed);

        debug!(
            target: "trellis::coordinator",
            shard_id = %shard_id,
            namespace = %namespace,
            events = count,
            sequence,
            "batch buffered"
        );

        if self.namespaces[&namespace].pending.len() >= self.config.flush_threshold {
            if let Err(e) = self.flush_namespace(&namespace) {
                warn!(
                    target: "trellis::coordinator",
                    namespace = %namespace,
                    error = %e,
                    "size-triggered flush failed, buffer preserved"
                );
            }
        }
    }

    fn handle_disconnect(&mut self, conn_id: u64) {
        // Channel closed: flush everything, then deregister the shards
        // that were on this connection.
        self.flush_all("disconnect");
        let gone: Vec<String> = self
            .shards
            .iter()
            .filter(|(_, s)| s.conn_id == Some(conn_id))
            .map(|(id, _)| id.clone())
            .collect();
        for shard_id in gone {
            self.shards.remove(&shard_id);
            info!(
                target: "trellis::coordinator",
                shard_id = %shard_id,
                "shard deregistered on disconnect"
            );
        }
        self.conns.remove(&conn_id);
        self.stats
            .registered_shards
            .store(self.shards.len() as u64, Ordering::Relaxed);
    }

    fn flush_all(&mut self, reason: &str) {
        let namespaces: Vec<String> = self
            .namespaces
            .iter()
            .filter(|(_, ns)| !ns.pending.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        for namespace in namespaces {
            if let Err(e) = self.flush_namespace(&namespace) {
                warn!(
                    target: "trellis::coordinator",
                    namespace = %namespace,
                    reason,
                    error = %e,
                    "flush failed, buffer preserved"
                );
            }
        }
    }

    /// Flush one namespace through the durable writer.
    ///
    /// State advances only after the write succeeds: the builder, the
    /// generation counter, shard watermarks, and the pending buffer are
    /// all untouched on any failure path.
    fn flush_namespace(&mut self, namespace: &str) -> Result<Option<FlushOutcome>> {
        let ns = match self.namespaces.get_mut(namespace) {
            Some(ns) if !ns.pending.is_empty() => ns,
            _ => return Ok(None),
        };

        let events: Vec<SequencedEvent> = ns.pending.iter().map(|(_, e)| e.clone()).collect();
        let mut builder = ns.builder.clone();
        for event in &events {
            builder.apply(event);
        }
        let index = builder.build(namespace);
        let generation = ns.generation + 1;

        let outcome = self
            .writer
            .write_batch(namespace, generation, &events, &index)?;

        // Durable: commit coordinator state.
        let pending = std::mem::take(&mut ns.pending);
        ns.builder = builder;
        ns.generation = generation;

        let mut per_shard: HashMap<String, (u64, usize)> = HashMap::new();
        for (shard_id, event) in &pending {
            let entry = per_shard.entry(shard_id.clone()).or_insert((0, 0));
            entry.0 = entry.0.max(event.sequence);
            entry.1 += 1;
        }

        for (shard_id, (watermark, events_acked)) in per_shard {
            let (registration, conn_id) = match self.shards.get_mut(&shard_id) {
                Some(shard) => {
                    shard.registration.last_sequence =
                        shard.registration.last_sequence.max(watermark);
                    shard.registration.registered_at = trellis_core::now_ms();
                    (shard.registration.clone(), shard.conn_id)
                }
                None => continue,
            };
            self.persist_registration(&registration);
            if let Some(conn_id) = conn_id {
                let ack = WireMessage::Ack {
                    shard_id,
                    sequence: watermark,
                    events_acked,
                };
                self.reply(conn_id, &ack);
            }
        }

        let flushed = pending.len() as u64;
        self.stats.events_flushed.fetch_add(flushed, Ordering::Relaxed);
        self.stats.flush_count.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_written
            .fetch_add(outcome.bytes_written, Ordering::Relaxed);
        let _ = self.stats.events_buffered.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |v| Some(v.saturating_sub(flushed)),
        );

        info!(
            target: "trellis::coordinator",
            namespace,
            generation,
            events = flushed,
            bytes = outcome.bytes_written,
            "namespace flushed"
        );
        Ok(Some(outcome))
    }

    fn persist_registration(&self, registration: &ShardRegistration) {
        let key = registration_key(&registration.shard_id);
        match serde_json::to_vec(registration) {
            Ok(bytes) => {
                if let Err(e) = self.store.put(&key, &bytes) {
                    warn!(
                        target: "trellis::coordinator",
                        shard_id = %registration.shard_id,
                        error = %e,
                        "failed to persist registration record"
                    );
                }
            }
            Err(e) => warn!(
                target: "trellis::coordinator",
                error = %e,
                "failed to serialize registration record"
            ),
        }
    }
}
