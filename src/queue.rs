//! Coalescing batch queue.
//!
//! Events are keyed by their identity fingerprint. The first add for a
//! fingerprint installs the event; later adds within the coalescing window
//! append their metric to the existing entry instead of producing a new
//! event. A 1 Hz flush pass removes and returns every entry that has gone a
//! full window without activity.

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{
    pb::{Metric, SensorEvent},
    stream::StreamManager,
};

/// How long the shutdown drain may spend delivering the last batch.
const DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Copies the in-progress counter into the published one and zeroes it.
fn update_and_reset(latest: &AtomicI64, this_sec: &AtomicI64) {
    latest.store(this_sec.swap(0, Ordering::AcqRel), Ordering::Release);
}

struct EntryInner {
    event: SensorEvent,
    /// Set by the flush pass, under this mutex, just before the entry is
    /// removed from the map. An add that observes it retries and installs a
    /// fresh entry, so no metric can land in a removed entry.
    flushed: bool,
}

/// One accumulating event, keyed in the queue by its fingerprint.
pub struct QueueEntry {
    created_at: i64,
    updated_at: AtomicI64,
    inner: Mutex<EntryInner>,
}

impl QueueEntry {
    fn new(event: SensorEvent, now: i64) -> Self {
        Self {
            created_at: now,
            updated_at: AtomicI64::new(now),
            inner: Mutex::new(EntryInner { event, flushed: false }),
        }
    }

    /// Wall-clock second at which the entry was installed.
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Wall-clock second of the most recent coalesced occurrence.
    pub fn updated_at(&self) -> i64 {
        self.updated_at.load(Ordering::Acquire)
    }
}

/// Concurrency-safe map from fingerprint to accumulating event, plus the
/// per-second throughput counters sampled by the flush loop.
pub struct EventBatchQueue {
    delta: i64,
    entries: DashMap<String, Arc<QueueEntry>>,
    events_this_sec: AtomicI64,
    latest_events_per_sec: AtomicI64,
    batches_this_sec: AtomicI64,
    latest_batches_per_sec: AtomicI64,
    total_sent_events: AtomicI64,
    total_processed_events: AtomicI64,
}

impl EventBatchQueue {
    /// Creates a queue with the given coalescing window in seconds.
    pub fn new(delta_secs: i64) -> Self {
        Self {
            delta: delta_secs,
            entries: DashMap::new(),
            events_this_sec: AtomicI64::new(0),
            latest_events_per_sec: AtomicI64::new(0),
            batches_this_sec: AtomicI64::new(0),
            latest_batches_per_sec: AtomicI64::new(0),
            total_sent_events: AtomicI64::new(0),
            total_processed_events: AtomicI64::new(0),
        }
    }

    /// Adds one occurrence to the queue.
    ///
    /// If an entry with the event's fingerprint exists, `metric` is appended
    /// to it; otherwise `event` (whose metrics array already holds `metric`)
    /// is installed as a fresh entry. Safe to call from many producers.
    pub fn add(&self, event: SensorEvent, metric: Metric) {
        let now = chrono::Utc::now().timestamp();
        let fingerprint = event.event_hash_sha256.clone();
        let mut pending = Some((event, metric));

        while let Some((event, metric)) = pending.take() {
            let entry = match self.entries.entry(fingerprint.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(QueueEntry::new(event, now)));
                    break;
                }
                Entry::Occupied(slot) => Arc::clone(slot.get()),
            };
            // The shard guard is dropped here; the entry mutex is never
            // taken while a map lock is held, and vice versa.

            let mut inner = entry.inner.lock();
            if inner.flushed {
                // Lost the race against a flush pass; the slot is gone or
                // about to be. Install a fresh entry instead.
                pending = Some((event, metric));
                continue;
            }
            inner.event.metrics.push(metric);
            inner.event.event_metrics_count = inner.event.metrics.len() as i64;
            entry.updated_at.store(now, Ordering::Release);
        }

        self.events_this_sec.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically removes and returns every entry whose last update is
    /// older than the coalescing window at time `now` (seconds).
    pub fn flush(&self, now: i64) -> Vec<SensorEvent> {
        let candidates: Vec<(String, Arc<QueueEntry>)> = self
            .entries
            .iter()
            .filter(|kv| kv.value().updated_at() + self.delta < now)
            .map(|kv| (kv.key().clone(), Arc::clone(kv.value())))
            .collect();

        candidates
            .into_iter()
            .filter_map(|(fingerprint, entry)| self.take_entry(&fingerprint, &entry, Some(now)))
            .collect()
    }

    /// Removes and returns every entry regardless of age. Used once at
    /// shutdown for the final flush.
    pub fn drain(&self) -> Vec<SensorEvent> {
        let all: Vec<(String, Arc<QueueEntry>)> = self
            .entries
            .iter()
            .map(|kv| (kv.key().clone(), Arc::clone(kv.value())))
            .collect();

        all.into_iter()
            .filter_map(|(fingerprint, entry)| self.take_entry(&fingerprint, &entry, None))
            .collect()
    }

    /// Marks the entry flushed and removes it from the map, returning a
    /// snapshot of its event. With `stale_before`, the staleness check is
    /// repeated under the entry lock first: a late add may have refreshed
    /// `updated_at` since the candidate scan.
    fn take_entry(
        &self,
        fingerprint: &str,
        entry: &Arc<QueueEntry>,
        stale_before: Option<i64>,
    ) -> Option<SensorEvent> {
        let snapshot = {
            let mut inner = entry.inner.lock();
            if let Some(now) = stale_before {
                if entry.updated_at() + self.delta >= now {
                    return None;
                }
            }
            inner.flushed = true;
            inner.event.clone()
        };
        self.entries.remove_if(fingerprint, |_, current| Arc::ptr_eq(current, entry));

        self.batches_this_sec.fetch_add(1, Ordering::Relaxed);
        self.total_sent_events.fetch_add(snapshot.event_metrics_count, Ordering::Relaxed);
        self.total_processed_events.fetch_add(snapshot.event_metrics_count, Ordering::Relaxed);

        Some(snapshot)
    }

    /// Number of live entries.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Sum of metrics-array lengths across live entries.
    pub fn event_size(&self) -> i64 {
        self.entries.iter().map(|kv| kv.value().inner.lock().event.event_metrics_count).sum()
    }

    /// Events added during the last completed second.
    pub fn events_processed_per_second(&self) -> i64 {
        self.latest_events_per_sec.load(Ordering::Acquire)
    }

    /// Batches flushed during the last completed second.
    pub fn batches_sent_per_second(&self) -> i64 {
        self.latest_batches_per_sec.load(Ordering::Acquire)
    }

    /// Metrics flushed since the last call; resets the counter.
    pub fn take_total_sent_events(&self) -> i64 {
        self.total_sent_events.swap(0, Ordering::AcqRel)
    }

    /// Metrics processed since the last call; resets the counter.
    pub fn take_total_processed_events(&self) -> i64 {
        self.total_processed_events.swap(0, Ordering::AcqRel)
    }

    /// Runs the 1 Hz flush loop until cancelled.
    ///
    /// Each tick publishes the per-second counters, flushes stale entries
    /// and hands the batch to a sender task gated by a semaphore of
    /// `max_inflight` permits, so a slow aggregator cannot stall the
    /// flusher. On cancellation the queue is drained once and the last
    /// batch delivered best-effort within a bounded time.
    pub async fn run_flusher(
        self: Arc<Self>,
        token: CancellationToken,
        stream: Arc<StreamManager>,
        max_inflight: usize,
    ) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        let semaphore = Arc::new(Semaphore::new(max_inflight));
        let mut senders: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    tracing::info!("Flush loop cancellation signal received, draining queue...");
                    break;
                }

                _ = ticker.tick() => {
                    update_and_reset(&self.latest_events_per_sec, &self.events_this_sec);
                    update_and_reset(&self.latest_batches_per_sec, &self.batches_this_sec);

                    let batch = self.flush(chrono::Utc::now().timestamp());
                    if !batch.is_empty() {
                        let stream = Arc::clone(&stream);
                        let semaphore = Arc::clone(&semaphore);
                        let token = token.clone();
                        senders.spawn(async move {
                            let _permit = tokio::select! {
                                biased;
                                _ = token.cancelled() => return,
                                permit = semaphore.acquire_owned() => match permit {
                                    Ok(permit) => permit,
                                    Err(_) => return,
                                },
                            };
                            let delivered = stream.send_batch(&token, batch).await;
                            tracing::debug!(delivered, "Batch dispatched to aggregator.");
                        });
                    }

                    // Reap finished senders so the set does not grow.
                    while senders.try_join_next().is_some() {}
                }
            }
        }

        // Final flush: everything still queued goes out in one batch, one
        // attempt per event, bounded in time.
        let remaining = self.drain();
        if !remaining.is_empty() {
            let events = remaining.len();
            let drain_token = CancellationToken::new();
            match tokio::time::timeout(DRAIN_TIMEOUT, stream.send_batch(&drain_token, remaining))
                .await
            {
                Ok(delivered) => {
                    tracing::info!(events, delivered, "Final batch dispatched on shutdown.")
                }
                Err(_) => tracing::warn!(events, "Final batch dispatch timed out on shutdown."),
            }
        }

        while senders.join_next().await.is_some() {}
        tracing::info!("Flush loop stopped.");
    }
}
