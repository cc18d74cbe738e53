//! Durable writer
//!
//! Persists one namespace's flush batch to blob storage: an event-log
//! blob plus the namespace's combined index file for the new generation.
//! Transient failures retry with exponential backoff and jitter;
//! permanent failures abort immediately. Either way the caller's buffer
//! is untouched — at-least-once delivery means no failure path may drop
//! unacknowledged events.

use crate::batch_log;
use crate::event::SequencedEvent;
use parking_lot::{Condvar, Mutex};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};
use trellis_codec::container::EncodeOptions;
use trellis_codec::{CombinedIndex, Compression};
use trellis_core::{Error, Result, RetryConfig};
use trellis_store::BlobStore;

/// Blob key of a generation's event log.
pub fn log_key(namespace: &str, generation: u64) -> String {
    format!("cdc/{}/{:08}.log", namespace, generation)
}

/// Blob key of a generation's combined index.
pub fn index_key(namespace: &str, generation: u64) -> String {
    format!("idx/{}/{:08}.tix", namespace, generation)
}

/// Result of one durable flush.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushOutcome {
    /// Generation the flush published
    pub generation: u64,
    /// Key of the event-log blob
    pub log_key: String,
    /// Key of the combined index blob
    pub index_key: String,
    /// Events made durable
    pub events_written: usize,
    /// Total blob bytes written
    pub bytes_written: u64,
}

/// Structured error event emitted when a flush gives up.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    /// Final failure message
    pub error: String,
    /// Namespace whose flush failed
    pub namespace: String,
    /// Events that remain unflushed
    pub event_count: usize,
    /// Put attempts made before giving up
    pub attempts: u32,
    /// Wall time spent across attempts
    pub duration_ms: u64,
}

type ErrorCallback = Box<dyn Fn(&ErrorEvent) + Send + Sync>;

/// Result shape shared with coalesced waiters.
type SlotResult = std::result::Result<FlushOutcome, (String, String)>;

struct FlushSlot {
    done: Mutex<Option<SlotResult>>,
    cond: Condvar,
}

/// Writes flush batches durably, with retry and flush coalescing.
pub struct DurableWriter {
    store: Arc<dyn BlobStore>,
    retry: RetryConfig,
    index_options: EncodeOptions,
    in_flight: Mutex<HashMap<String, Arc<FlushSlot>>>,
    error_events: Mutex<Vec<ErrorEvent>>,
    error_callback: Mutex<Option<ErrorCallback>>,
}

impl DurableWriter {
    /// A writer over `store` with the given retry policy.
    pub fn new(store: Arc<dyn BlobStore>, retry: RetryConfig) -> Self {
        DurableWriter {
            store,
            retry,
            index_options: EncodeOptions {
                compression: Compression::Gzip,
                include_vectors: false,
                created_at: 0,
            },
            in_flight: Mutex::new(HashMap::new()),
            error_events: Mutex::new(Vec::new()),
            error_callback: Mutex::new(None),
        }
    }

    /// Override the combined-index encode options.
    pub fn with_index_options(mut self, options: EncodeOptions) -> Self {
        self.index_options = options;
        self
    }

    /// Register a callback invoked on every emitted error event.
    ///
    /// Interval-driven flushes have no caller to hand the final error to;
    /// this is how they surface failures.
    pub fn on_error(&self, callback: impl Fn(&ErrorEvent) + Send + Sync + 'static) {
        *self.error_callback.lock() = Some(Box::new(callback));
    }

    /// Error events emitted so far, oldest first.
    pub fn error_events(&self) -> Vec<ErrorEvent> {
        self.error_events.lock().clone()
    }

    /// Durably write one namespace flush.
    ///
    /// A call for a namespace whose flush is already in flight does not
    /// start a parallel write: it waits for the in-flight flush and
    /// returns its result.
    pub fn write_batch(
        &self,
        namespace: &str,
        generation: u64,
        events: &[SequencedEvent],
        index: &CombinedIndex,
    ) -> Result<FlushOutcome> {
        // Coalesce with any in-flight flush for this namespace.
        let slot = {
            let mut in_flight = self.in_flight.lock();
            if let Some(existing) = in_flight.get(namespace) {
                let existing = Arc::clone(existing);
                drop(in_flight);
                return wait_for_slot(&existing);
            }
            let slot = Arc::new(FlushSlot {
                done: Mutex::new(None),
                cond: Condvar::new(),
            });
            in_flight.insert(namespace.to_string(), Arc::clone(&slot));
            slot
        };

        let result = self.write_batch_inner(namespace, generation, events, index);

        {
            let mut done = slot.done.lock();
            *done = Some(match &result {
                Ok(outcome) => Ok(outcome.clone()),
                Err(e) => Err((e.code().to_string(), e.to_string())),
            });
            slot.cond.notify_all();
        }
        self.in_flight.lock().remove(namespace);
        result
    }

    fn write_batch_inner(
        &self,
        namespace: &str,
        generation: u64,
        events: &[SequencedEvent],
        index: &CombinedIndex,
    ) -> Result<FlushOutcome> {
        let started = Instant::now();
        let log_blob = batch_log::encode_batch(namespace, events)?;
        let mut index_options = self.index_options.clone();
        index_options.created_at = trellis_core::now_ms();
        let index_blob = index.encode(&index_options)?;

        let log_key = log_key(namespace, generation);
        let index_key = index_key(namespace, generation);

        let mut attempts = 0u32;
        let puts: [(&str, &[u8]); 2] = [(&log_key, &log_blob), (&index_key, &index_blob)];
        for (key, blob) in puts {
            if let Err(e) = self.put_with_retry(key, blob, &mut attempts) {
                let event = ErrorEvent {
                    error: e.to_string(),
                    namespace: namespace.to_string(),
                    event_count: events.len(),
                    attempts,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                error!(
                    target: "trellis::writer",
                    namespace,
                    attempts,
                    error = %e,
                    "flush failed, buffer preserved"
                );
                self.emit(event);
                return Err(e);
            }
        }

        debug!(
            target: "trellis::writer",
            namespace,
            generation,
            events = events.len(),
            bytes = log_blob.len() + index_blob.len(),
            "flush written"
        );
        Ok(FlushOutcome {
            generation,
            log_key,
            index_key,
            events_written: events.len(),
            bytes_written: (log_blob.len() + index_blob.len()) as u64,
        })
    }

    fn put_with_retry(&self, key: &str, blob: &[u8], attempts: &mut u32) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            *attempts += 1;
            match self.store.put(key, blob) {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.retry.max_retries => return Err(e),
                Err(e) => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        target: "trellis::writer",
                        key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient put failure, backing off"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry.delay_ms(attempt);
        let jitter = self.retry.jitter_factor;
        let scaled = if jitter > 0.0 {
            let factor = 1.0 + rand::thread_rng().gen_range(0.0..jitter);
            (base as f64 * factor) as u64
        } else {
            base
        };
        Duration::from_millis(scaled)
    }

    fn emit(&self, event: ErrorEvent) {
        if let Some(callback) = self.error_callback.lock().as_ref() {
            callback(&event);
        }
        self.error_events.lock().push(event);
    }
}

fn wait_for_slot(slot: &FlushSlot) -> Result<FlushOutcome> {
    let mut done = slot.done.lock();
    while done.is_none() {
        slot.cond.wait(&mut done);
    }
    match done.as_ref().unwrap() {
        Ok(outcome) => Ok(outcome.clone()),
        Err((code, message)) => Err(error_from_code(code, message)),
    }
}

/// Rebuild an error of the right kind for coalesced waiters.
fn error_from_code(code: &str, message: &str) -> Error {
    match code {
        "transient" | "io" => Error::transient(message),
        "corrupt" => Error::corrupt(message),
        "bad_format" => Error::bad_format(message),
        "bad_input" => Error::bad_input(message),
        "not_found" => Error::NotFound(message.to_string()),
        _ => Error::permanent(message),
    }
}
