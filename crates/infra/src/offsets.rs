//! Per-partition offset tracking for out-of-order completion.
//!
//! Workers finish records in any order, but a partitioned log acknowledges positions,
//! not individual records. Committing a later offset while an earlier one is still in
//! flight would lose the earlier record on restart, so only the gap-free prefix of
//! completed offsets is ever committed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, warn};

use eventbus_events::{ReadStream, TopicPartition};

#[derive(Debug, Clone, Copy)]
struct Marker {
    completed: bool,
    enqueued_at: Instant,
}

#[derive(Debug, Default)]
struct PartitionCursor {
    /// In-flight records ordered by offset.
    markers: BTreeMap<u64, Marker>,
    /// Next offset to read after a restart (last committed + 1).
    committed: Option<u64>,
}

impl PartitionCursor {
    /// `last completed offset + 1` of the contiguous completed prefix, if it advances.
    fn committable(&self) -> Option<u64> {
        let mut last = None;
        for (offset, marker) in &self.markers {
            if !marker.completed {
                break;
            }
            last = Some(*offset);
        }
        let next = last? + 1;
        self.committed.is_none_or(|c| next > c).then_some(next)
    }
}

/// Outcome of one commit tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub committed: Vec<(TopicPartition, u64)>,
    pub failed: Vec<(TopicPartition, u64)>,
}

/// Tracks in-flight record markers per partition and commits the completed prefix.
#[derive(Debug, Default)]
pub struct OffsetCommitTracker {
    partitions: Mutex<HashMap<TopicPartition, PartitionCursor>>,
}

impl OffsetCommitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TopicPartition, PartitionCursor>> {
        self.partitions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a pulled record before dispatch.
    ///
    /// Returns `false` (and tracks nothing) for an offset already tracked or already
    /// below the committed position.
    pub fn track(&self, partition: &TopicPartition, offset: u64) -> bool {
        let mut partitions = self.lock();
        let cursor = partitions.entry(partition.clone()).or_default();
        if cursor.committed.is_some_and(|c| offset < c) || cursor.markers.contains_key(&offset) {
            debug!(topic = %partition.topic, partition = partition.partition, offset, "offset already tracked");
            return false;
        }
        cursor.markers.insert(
            offset,
            Marker {
                completed: false,
                enqueued_at: Instant::now(),
            },
        );
        true
    }

    /// Mark a record finished (handled, failed or skipped).
    pub fn complete(&self, partition: &TopicPartition, offset: u64) -> bool {
        let mut partitions = self.lock();
        let Some(marker) = partitions
            .get_mut(partition)
            .and_then(|c| c.markers.get_mut(&offset))
        else {
            warn!(topic = %partition.topic, partition = partition.partition, offset, "completed offset was not tracked");
            return false;
        };
        marker.completed = true;
        true
    }

    /// Drop the marker of a record that was tracked but never dispatched.
    ///
    /// Completed markers are kept. Returns `false` when nothing was removed.
    pub fn untrack(&self, partition: &TopicPartition, offset: u64) -> bool {
        let mut partitions = self.lock();
        let Some(cursor) = partitions.get_mut(partition) else {
            return false;
        };
        if cursor.markers.get(&offset).is_some_and(|m| !m.completed) {
            cursor.markers.remove(&offset);
            debug!(topic = %partition.topic, partition = partition.partition, offset, "offset untracked");
            return true;
        }
        false
    }

    /// Commit positions that would advance, as `(partition, last completed + 1)`.
    pub fn committable(&self) -> Vec<(TopicPartition, u64)> {
        let partitions = self.lock();
        let mut out: Vec<_> = partitions
            .iter()
            .filter_map(|(tp, cursor)| cursor.committable().map(|next| (tp.clone(), next)))
            .collect();
        out.sort();
        out
    }

    /// Commit every advancing prefix through `stream`.
    ///
    /// The transport is called outside the lock. On success markers below the committed
    /// position are dropped; on failure they are kept for the next tick.
    pub fn commit_tick(&self, stream: &dyn ReadStream) -> CommitReport {
        let mut report = CommitReport::default();

        for (tp, next) in self.committable() {
            match stream.commit(&tp, next) {
                Ok(()) => {
                    let mut partitions = self.lock();
                    if let Some(cursor) = partitions.get_mut(&tp) {
                        cursor.markers = cursor.markers.split_off(&next);
                        cursor.committed = Some(cursor.committed.map_or(next, |c| c.max(next)));
                    }
                    debug!(topic = %tp.topic, partition = tp.partition, offset = next, "offset committed");
                    report.committed.push((tp, next));
                }
                Err(err) => {
                    error!(topic = %tp.topic, partition = tp.partition, offset = next, error = %err, "offset commit failed");
                    report.failed.push((tp, next));
                }
            }
        }
        report
    }

    /// Drop all state of a partition that is no longer assigned to this consumer.
    pub fn revoke(&self, partition: &TopicPartition) -> usize {
        let removed = self.lock().remove(partition);
        removed.map_or(0, |c| c.markers.len())
    }

    /// Markers not yet removed by a commit (completed or not).
    pub fn in_flight(&self, partition: &TopicPartition) -> usize {
        self.lock().get(partition).map_or(0, |c| c.markers.len())
    }

    /// Next offset to read after a restart, once anything was committed.
    pub fn committed(&self, partition: &TopicPartition) -> Option<u64> {
        self.lock().get(partition).and_then(|c| c.committed)
    }

    /// Age of the oldest uncompleted record across partitions.
    pub fn oldest_pending_age(&self) -> Option<std::time::Duration> {
        self.lock()
            .values()
            .flat_map(|c| c.markers.values())
            .filter(|m| !m.completed)
            .map(|m| m.enqueued_at.elapsed())
            .max()
    }
}
