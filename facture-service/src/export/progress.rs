//! Per-job export progress with any number of live subscribers.
//!
//! The registry is an explicit object owned by the export coordinator, so
//! independent coordinators (and tests) never share state.

use dashmap::DashMap;
use futures::stream::{self, Stream};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Running,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub done: usize,
    pub total: usize,
    pub failed: usize,
    pub status: ExportStatus,
}

impl ProgressSnapshot {
    fn pending() -> Self {
        Self {
            done: 0,
            total: 0,
            failed: 0,
            status: ExportStatus::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status != ExportStatus::Running
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Progress(ProgressSnapshot),
    Heartbeat,
}

struct ProgressEntry {
    snapshot: ProgressSnapshot,
    sender: broadcast::Sender<ProgressSnapshot>,
    /// Bumped whenever the entry changes owner, so stale disposal timers
    /// leave a newer job alone.
    generation: u64,
    claimed: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressTimings {
    /// How long a finished job stays observable.
    pub grace: Duration,
    /// How long a subscription may wait for a job that never starts.
    pub pending_ttl: Duration,
    pub heartbeat: Duration,
}

impl Default for ProgressTimings {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            pending_ttl: Duration::from_secs(600),
            heartbeat: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct ProgressRegistry {
    entries: Arc<DashMap<String, ProgressEntry>>,
    generations: Arc<AtomicU64>,
    timings: ProgressTimings,
}

impl ProgressRegistry {
    pub fn new(timings: ProgressTimings) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            generations: Arc::new(AtomicU64::new(0)),
            timings,
        }
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn publish(entry: &mut ProgressEntry) {
        // No receivers is fine.
        let _ = entry.sender.send(entry.snapshot);
    }

    /// Open (or take over) the entry for a job about to process `total` items.
    pub fn start(&self, id: &str, total: usize) {
        let generation = self.next_generation();
        let mut entry = self
            .entries
            .entry(id.to_string())
            .or_insert_with(|| ProgressEntry {
                snapshot: ProgressSnapshot::pending(),
                sender: broadcast::channel(CHANNEL_CAPACITY).0,
                generation,
                claimed: true,
            });
        entry.generation = generation;
        entry.claimed = true;
        entry.snapshot = ProgressSnapshot {
            done: 0,
            total,
            failed: 0,
            status: ExportStatus::Running,
        };
        Self::publish(&mut entry);
    }

    /// One item processed, successfully or not.
    pub fn advance(&self, id: &str, failed: bool) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            entry.snapshot.done += 1;
            if failed {
                entry.snapshot.failed += 1;
            }
            Self::publish(&mut entry);
        }
    }

    /// Publish the terminal status and schedule disposal after the grace
    /// period.
    pub fn finish(&self, id: &str, status: ExportStatus) {
        let generation = match self.entries.get_mut(id) {
            Some(mut entry) => {
                entry.snapshot.status = status;
                Self::publish(&mut entry);
                entry.generation
            }
            None => return,
        };
        self.dispose_after(id.to_string(), generation, self.timings.grace, false);
    }

    pub fn snapshot(&self, id: &str) -> Option<ProgressSnapshot> {
        self.entries.get(id).map(|entry| entry.snapshot)
    }

    fn dispose_after(&self, id: String, generation: u64, delay: Duration, only_unclaimed: bool) {
        let entries = self.entries.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let removed = entries
                .remove_if(&id, |_, entry| {
                    entry.generation == generation && !(only_unclaimed && entry.claimed)
                })
                .is_some();
            if removed {
                tracing::debug!(progress_id = %id, "Progress entry disposed");
            }
        });
    }

    /// Stream of the current snapshot, then every change, with heartbeats in
    /// between. Ends after a terminal snapshot or when the entry is disposed.
    /// Dropping the stream only detaches this observer.
    pub fn subscribe(&self, id: &str) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let mut created = None;
        let (current, receiver) = {
            let entry = self.entries.entry(id.to_string()).or_insert_with(|| {
                let generation = self.next_generation();
                created = Some(generation);
                ProgressEntry {
                    snapshot: ProgressSnapshot::pending(),
                    sender: broadcast::channel(CHANNEL_CAPACITY).0,
                    generation,
                    claimed: false,
                }
            });
            (entry.snapshot, entry.sender.subscribe())
        };

        if let Some(generation) = created {
            self.dispose_after(id.to_string(), generation, self.timings.pending_ttl, true);
        }

        let period = self.timings.heartbeat;
        let heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        stream::unfold(
            Subscription {
                pending: Some(current),
                receiver,
                heartbeat,
                closed: false,
            },
            |mut sub| async move {
                if sub.closed {
                    return None;
                }
                if let Some(snapshot) = sub.pending.take() {
                    sub.closed = snapshot.is_terminal();
                    return Some((ProgressEvent::Progress(snapshot), sub));
                }
                loop {
                    tokio::select! {
                        received = sub.receiver.recv() => match received {
                            Ok(snapshot) => {
                                sub.closed = snapshot.is_terminal();
                                return Some((ProgressEvent::Progress(snapshot), sub));
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                tracing::debug!(skipped, "Progress subscriber lagged");
                            }
                            Err(RecvError::Closed) => return None,
                        },
                        _ = sub.heartbeat.tick() => {
                            return Some((ProgressEvent::Heartbeat, sub));
                        }
                    }
                }
            },
        )
    }
}

struct Subscription {
    pending: Option<ProgressSnapshot>,
    receiver: broadcast::Receiver<ProgressSnapshot>,
    heartbeat: tokio::time::Interval,
    closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn registry() -> ProgressRegistry {
        ProgressRegistry::new(ProgressTimings {
            grace: Duration::from_millis(50),
            pending_ttl: Duration::from_millis(50),
            heartbeat: Duration::from_secs(30),
        })
    }

    #[tokio::test]
    async fn test_subscriber_sees_current_then_updates_until_terminal() {
        let registry = registry();
        registry.start("job-1", 2);
        registry.advance("job-1", false);

        let events = registry.subscribe("job-1");
        registry.advance("job-1", true);
        registry.finish("job-1", ExportStatus::Done);

        let events: Vec<ProgressEvent> = events.collect().await;
        let snapshots: Vec<ProgressSnapshot> = events
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Progress(s) => Some(s),
                ProgressEvent::Heartbeat => None,
            })
            .collect();

        assert_eq!(snapshots.first().map(|s| s.done), Some(1));
        let last = snapshots.last().copied().unwrap();
        assert_eq!(
            last,
            ProgressSnapshot {
                done: 2,
                total: 2,
                failed: 1,
                status: ExportStatus::Done
            }
        );
    }

    #[tokio::test]
    async fn test_early_subscriber_is_picked_up_by_job() {
        let registry = registry();
        let mut events = Box::pin(registry.subscribe("job-2"));
        assert_eq!(
            events.next().await,
            Some(ProgressEvent::Progress(ProgressSnapshot::pending()))
        );

        registry.start("job-2", 5);
        match events.next().await {
            Some(ProgressEvent::Progress(s)) => assert_eq!(s.total, 5),
            other => panic!("unexpected event: {:?}", other),
        }

        // A claimed entry outlives the pending ttl.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(registry.snapshot("job-2").is_some());
    }

    #[tokio::test]
    async fn test_entries_are_disposed() {
        let registry = registry();
        registry.start("job-3", 1);
        registry.finish("job-3", ExportStatus::Error);
        let _ = registry.subscribe("abandoned");

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(registry.snapshot("job-3").is_none());
        assert!(registry.snapshot("abandoned").is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_between_updates() {
        let registry = ProgressRegistry::new(ProgressTimings {
            heartbeat: Duration::from_millis(20),
            ..ProgressTimings::default()
        });
        registry.start("job-4", 1);
        let mut events = Box::pin(registry.subscribe("job-4"));
        assert!(matches!(events.next().await, Some(ProgressEvent::Progress(_))));
        assert_eq!(events.next().await, Some(ProgressEvent::Heartbeat));
    }
}
