//! Three-level priority send queue with starvation control (spec §4.8).
//!
//! Each level is a `VecDeque` behind its own `Mutex`, the same shape the
//! teacher uses for its packet queues (`queue::PacketQueue` is a
//! `VecDeque`-backed structure guarded for single-threaded access there;
//! here it is made safe for concurrent producers/consumers). A `Notify`
//! per queue wakes a blocking `dequeue` without polling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};

use crate::config::Priority;
use crate::session::Session;

const HIGH_CAPACITY: usize = 512;
const MEDIUM_CAPACITY: usize = 256;
const LOW_CAPACITY: usize = 128;

/// Low-priority traffic waiting longer than this behind Medium is drained
/// ahead of it (spec §4.8, starvation guard).
const STARVATION_BOUND: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Level {
    High,
    Medium,
    Low,
}

/// Record placed in the send queue (spec §3, PriorityPacket).
pub struct PriorityPacket {
    pub payload: Vec<u8>,
    pub level: Level,
    pub enqueued_at: Instant,
    pub session: Arc<Session>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    QueueFull,
}

impl std::fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for EnqueueError {}

/// Classify a payload by size under the configured `Priority` mode (spec
/// §4.8).
pub fn classify(priority: Priority, payload_size: usize) -> Level {
    match priority {
        Priority::Gaming => {
            if payload_size <= 256 {
                Level::High
            } else if payload_size <= 1024 {
                Level::Medium
            } else {
                Level::Low
            }
        }
        Priority::Streaming => {
            if payload_size <= 1024 {
                Level::High
            } else {
                Level::Medium
            }
        }
        Priority::None => Level::Medium,
    }
}

#[derive(Default)]
struct Counters {
    enqueued_high: AtomicU64,
    enqueued_medium: AtomicU64,
    enqueued_low: AtomicU64,
    drops: AtomicU64,
    displacements: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub depth_high: usize,
    pub depth_medium: usize,
    pub depth_low: usize,
    pub enqueued_high: u64,
    pub enqueued_medium: u64,
    pub enqueued_low: u64,
    pub drops: u64,
    pub displacements: u64,
}

struct Queue {
    items: Mutex<VecDeque<PriorityPacket>>,
    capacity: usize,
    notify: Notify,
}

impl Queue {
    fn new(capacity: usize) -> Self {
        Queue {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }
}

/// Three bounded queues plus the priority/starvation dequeue policy (spec
/// §4.8).
pub struct Scheduler {
    priority: Priority,
    high: Queue,
    medium: Queue,
    low: Queue,
    counters: Counters,
}

impl Scheduler {
    pub fn new(priority: Priority) -> Arc<Scheduler> {
        Arc::new(Scheduler {
            priority,
            high: Queue::new(HIGH_CAPACITY),
            medium: Queue::new(MEDIUM_CAPACITY),
            low: Queue::new(LOW_CAPACITY),
            counters: Counters::default(),
        })
    }

    pub async fn stats(&self) -> StatsSnapshot {
        let depth_high = self.high.items.lock().await.len();
        let depth_medium = self.medium.items.lock().await.len();
        let depth_low = self.low.items.lock().await.len();
        StatsSnapshot {
            depth_high,
            depth_medium,
            depth_low,
            enqueued_high: self.counters.enqueued_high.load(Ordering::Relaxed),
            enqueued_medium: self.counters.enqueued_medium.load(Ordering::Relaxed),
            enqueued_low: self.counters.enqueued_low.load(Ordering::Relaxed),
            drops: self.counters.drops.load(Ordering::Relaxed),
            displacements: self.counters.displacements.load(Ordering::Relaxed),
        }
    }

    /// Classify by payload size and enqueue.
    pub async fn enqueue(
        &self,
        payload: Vec<u8>,
        session: Arc<Session>,
    ) -> Result<(), EnqueueError> {
        let level = classify(self.priority, payload.len());
        self.enqueue_at(payload, session, level).await
    }

    /// Enqueue at an explicitly forced level, bypassing the size classifier.
    pub async fn enqueue_at(
        &self,
        payload: Vec<u8>,
        session: Arc<Session>,
        level: Level,
    ) -> Result<(), EnqueueError> {
        let packet = PriorityPacket {
            payload,
            level,
            enqueued_at: Instant::now(),
            session,
        };

        match level {
            Level::High => {
                self.counters.enqueued_high.fetch_add(1, Ordering::Relaxed);
                self.push_high(packet).await
            }
            Level::Medium => {
                self.counters.enqueued_medium.fetch_add(1, Ordering::Relaxed);
                self.push_plain(&self.medium, packet).await
            }
            Level::Low => {
                self.counters.enqueued_low.fetch_add(1, Ordering::Relaxed);
                self.push_plain(&self.low, packet).await
            }
        }
    }

    async fn push_plain(&self, queue: &Queue, packet: PriorityPacket) -> Result<(), EnqueueError> {
        let mut items = queue.items.lock().await;
        if items.len() >= queue.capacity {
            self.counters.drops.fetch_add(1, Ordering::Relaxed);
            return Err(EnqueueError::QueueFull);
        }
        items.push_back(packet);
        drop(items);
        queue.notify.notify_one();
        Ok(())
    }

    /// High admission may evict one entry from Low (preferred) or Medium to
    /// make room, recording the eviction as a drop rather than a reorder
    /// (spec §4.8, §9 Design Notes).
    async fn push_high(&self, packet: PriorityPacket) -> Result<(), EnqueueError> {
        let mut items = self.high.items.lock().await;
        if items.len() >= self.high.capacity {
            drop(items);
            if !self.evict_one(&self.low).await && !self.evict_one(&self.medium).await {
                self.counters.drops.fetch_add(1, Ordering::Relaxed);
                return Err(EnqueueError::QueueFull);
            }
            items = self.high.items.lock().await;
        }
        items.push_back(packet);
        drop(items);
        self.high.notify.notify_one();
        Ok(())
    }

    async fn evict_one(&self, queue: &Queue) -> bool {
        let mut items = queue.items.lock().await;
        if items.pop_front().is_some() {
            self.counters.displacements.fetch_add(1, Ordering::Relaxed);
            self.counters.drops.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Non-blocking dequeue: High first; Low ahead of Medium if Low's head
    /// has waited past `STARVATION_BOUND`; else Medium; else Low. Returns
    /// `None` if all three are empty.
    pub async fn try_dequeue(&self) -> Option<PriorityPacket> {
        if let Some(p) = self.pop_front(&self.high).await {
            return Some(p);
        }

        let low_waiting = {
            let items = self.low.items.lock().await;
            items.front().map(|p| p.enqueued_at.elapsed() > STARVATION_BOUND)
        };

        if low_waiting == Some(true) {
            if let Some(p) = self.pop_front(&self.low).await {
                return Some(p);
            }
        }

        if let Some(p) = self.pop_front(&self.medium).await {
            return Some(p);
        }

        self.pop_front(&self.low).await
    }

    async fn pop_front(&self, queue: &Queue) -> Option<PriorityPacket> {
        queue.items.lock().await.pop_front()
    }

    /// Blocks until any of the three queues has an entry, then applies the
    /// same priority/starvation policy as `try_dequeue`.
    pub async fn dequeue(&self) -> PriorityPacket {
        loop {
            if let Some(p) = self.try_dequeue().await {
                return p;
            }
            tokio::select! {
                _ = self.high.notify.notified() => {}
                _ = self.medium.notify.notified() => {}
                _ = self.low.notify.notified() => {}
            }
        }
    }
}

/// Advisory bandwidth telemetry: a sliding window of byte counts sampled
/// once a second, 20 samples deep (spec §4.8). Grounded in the teacher's
/// `cc::UsedWindow` (`VecDeque<Instant>`, pop entries older than the
/// window, return the remaining count) generalized from packet counts to
/// byte counts.
pub struct BandwidthEstimator {
    samples: Mutex<VecDeque<(Instant, u64)>>,
    window: Duration,
    max_samples: usize,
}

impl BandwidthEstimator {
    pub fn new() -> Self {
        BandwidthEstimator {
            samples: Mutex::new(VecDeque::new()),
            window: Duration::from_secs(20),
            max_samples: 20,
        }
    }

    pub async fn record(&self, bytes: u64) {
        let now = Instant::now();
        let mut samples = self.samples.lock().await;
        samples.push_back((now, bytes));
        while samples.len() > self.max_samples {
            samples.pop_front();
        }
        while let Some((t, _)) = samples.front() {
            if now.duration_since(*t) > self.window {
                samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bytes/sec estimate over the retained window.
    pub async fn estimate(&self) -> f64 {
        let samples = self.samples.lock().await;
        if samples.len() < 2 {
            return samples.iter().map(|(_, b)| *b as f64).sum();
        }
        let span = samples.back().unwrap().0.duration_since(samples.front().unwrap().0);
        let total: u64 = samples.iter().map(|(_, b)| *b).sum();
        if span.as_secs_f64() <= 0.0 {
            total as f64
        } else {
            total as f64 / span.as_secs_f64()
        }
    }

    /// True when the current estimate exceeds `threshold` of `max_bw`.
    /// Advisory telemetry only, not a control input (spec §4.8).
    pub async fn is_congested(&self, threshold: f64, max_bw: f64) -> bool {
        if max_bw <= 0.0 {
            return false;
        }
        self.estimate().await / max_bw > threshold
    }
}

impl Default for BandwidthEstimator {
    fn default() -> Self {
        Self::new()
    }
}
