//! Change event normalization: deduplication, trailing-debounce batching and
//! per-path collapse.
//!
//! The normalizer is a plain state machine. Callers feed it events together
//! with the current instant and ask it for a batch once its flush deadline has
//! passed; the async driving lives in the engine.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::event::{ChangeBatch, ChangeEvent, ChangeKind};

/// Timing knobs for the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizerSettings {
    /// Same-key events inside this window are duplicates.
    pub dedup_window: Duration,
    /// Dedup entries older than this are purged.
    pub dedup_retention: Duration,
    /// Flush delay after a `created`/`deleted` event.
    pub structural_delay: Duration,
    /// Flush delay after a `modified` event.
    pub modify_delay: Duration,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_millis(1000),
            dedup_retention: Duration::from_millis(5000),
            structural_delay: Duration::from_millis(50),
            modify_delay: Duration::from_millis(200),
        }
    }
}

impl From<&EngineConfig> for NormalizerSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            dedup_window: Duration::from_millis(config.dedup_window_ms()),
            dedup_retention: Duration::from_millis(config.dedup_retention_ms()),
            structural_delay: Duration::from_millis(config.structural_flush_ms()),
            modify_delay: Duration::from_millis(config.modify_flush_ms()),
        }
    }
}

/// Outcome of feeding one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Buffered; the flush timer was re-armed.
    Accepted,
    /// Dropped as a repeat of a recently seen notification.
    Duplicate,
}

type DedupKey = (ChangeKind, PathBuf, bool);

/// The armed flush. Replaced, never extended, on every accepted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FlushTimer {
    deadline: Instant,
}

pub struct ChangeNormalizer {
    settings: NormalizerSettings,
    seen: HashMap<DedupKey, Instant>,
    buffer: Vec<ChangeEvent>,
    timer: Option<FlushTimer>,
    last_purge: Option<Instant>,
    sequence: u64,
}

impl ChangeNormalizer {
    pub fn new(settings: NormalizerSettings) -> Self {
        Self {
            settings,
            seen: HashMap::new(),
            buffer: Vec::new(),
            timer: None,
            last_purge: None,
            sequence: 0,
        }
    }

    /// Feed one raw event observed at `now`.
    ///
    /// A duplicate is not forwarded to the buffer, but when its first
    /// occurrence is still pending, the pending entry takes the newer
    /// timestamp so the batch reports the latest notification time.
    pub fn push(&mut self, event: ChangeEvent, now: Instant) -> Admission {
        self.maybe_purge(now);

        let key: DedupKey = (event.event_type, event.path.clone(), event.is_directory);
        if let Some(&seen_at) = self.seen.get(&key) {
            if now.saturating_duration_since(seen_at) < self.settings.dedup_window {
                self.refresh_pending(&key, &event);
                tracing::trace!(path = %event.path.display(), kind = %event.event_type, "duplicate event dropped");
                return Admission::Duplicate;
            }
        }
        self.seen.insert(key, now);

        let delay = if event.event_type.is_structural() {
            self.settings.structural_delay
        } else {
            self.settings.modify_delay
        };
        self.buffer.push(event);
        self.timer = Some(FlushTimer {
            deadline: now + delay,
        });
        Admission::Accepted
    }

    /// When the armed flush is due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.map(|t| t.deadline)
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Emit a batch if the flush timer has fired by `now`.
    pub fn poll(&mut self, now: Instant) -> Option<ChangeBatch> {
        match self.timer {
            Some(timer) if timer.deadline <= now => self.flush(),
            _ => None,
        }
    }

    /// Emit whatever is buffered right away, disarming the timer.
    pub fn flush(&mut self) -> Option<ChangeBatch> {
        self.timer = None;
        if self.buffer.is_empty() {
            return None;
        }
        let events = collapse(std::mem::take(&mut self.buffer));
        self.sequence += 1;
        tracing::debug!(sequence = self.sequence, count = events.len(), "emitting change batch");
        Some(ChangeBatch {
            sequence: self.sequence,
            events,
        })
    }

    /// Drop pending events and the armed timer. Used when the watched root
    /// changes; nothing buffered for the old root is ever delivered.
    pub fn cancel(&mut self) {
        if !self.buffer.is_empty() {
            tracing::debug!(discarded = self.buffer.len(), "discarding pending events");
        }
        self.buffer.clear();
        self.seen.clear();
        self.timer = None;
    }

    /// Number of live dedup entries.
    pub fn tracked_keys(&self) -> usize {
        self.seen.len()
    }

    /// Forget dedup entries older than the retention period.
    pub fn purge_stale(&mut self, now: Instant) {
        let retention = self.settings.dedup_retention;
        self.seen
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) < retention);
        self.last_purge = Some(now);
    }

    fn maybe_purge(&mut self, now: Instant) {
        let due = match self.last_purge {
            Some(at) => now.saturating_duration_since(at) >= self.settings.dedup_retention,
            None => {
                self.last_purge = Some(now);
                false
            }
        };
        if due {
            self.purge_stale(now);
        }
    }

    fn refresh_pending(&mut self, key: &DedupKey, event: &ChangeEvent) {
        if let Some(pending) = self.buffer.iter_mut().rev().find(|e| {
            e.event_type == key.0 && e.path == key.1 && e.is_directory == key.2
        }) {
            pending.timestamp = pending.timestamp.max(event.timestamp);
            if event.old_path.is_some() {
                pending.old_path = event.old_path.clone();
            }
        }
    }
}

/// Keep only the latest event per `(path, is_directory)`, preserving the
/// buffer position of each survivor.
fn collapse(buffer: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
    let mut seen: HashSet<(PathBuf, bool)> = HashSet::new();
    let mut kept: Vec<ChangeEvent> = Vec::with_capacity(buffer.len());
    for event in buffer.into_iter().rev() {
        if seen.insert((event.path.clone(), event.is_directory)) {
            kept.push(event);
        }
    }
    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn normalizer() -> ChangeNormalizer {
        ChangeNormalizer::new(NormalizerSettings::default())
    }

    #[test]
    fn repeated_modify_emits_one_event_with_latest_timestamp() {
        let mut n = normalizer();
        let t0 = Instant::now();
        assert_eq!(
            n.push(ChangeEvent::new(ChangeKind::Modified, "/proj/README.md", 100), t0),
            Admission::Accepted
        );
        assert_eq!(
            n.push(ChangeEvent::new(ChangeKind::Modified, "/proj/README.md", 300), t0 + ms(200)),
            Admission::Duplicate
        );
        let batch = n.flush().expect("batch");
        assert_eq!(batch.events.len(), 1);
        assert_eq!(batch.events[0].timestamp, 300);
    }

    #[test]
    fn only_first_of_duplicate_pair_is_forwarded() {
        let mut n = normalizer();
        let t0 = Instant::now();
        let event = ChangeEvent::new(ChangeKind::Created, "/p/a", 1).directory();
        assert_eq!(n.push(event.clone(), t0), Admission::Accepted);
        assert_eq!(n.push(event.clone(), t0 + ms(999)), Admission::Duplicate);
        assert_eq!(n.pending_len(), 1);
    }

    #[test]
    fn same_path_different_kind_is_not_duplicate() {
        let mut n = normalizer();
        let t0 = Instant::now();
        n.push(ChangeEvent::new(ChangeKind::Created, "/p/a", 1), t0);
        assert_eq!(
            n.push(ChangeEvent::new(ChangeKind::Modified, "/p/a", 2), t0),
            Admission::Accepted
        );
        assert_eq!(
            n.push(ChangeEvent::new(ChangeKind::Created, "/p/a", 3).directory(), t0),
            Admission::Accepted
        );
    }

    #[test]
    fn event_outside_window_is_accepted_again() {
        let mut n = normalizer();
        let t0 = Instant::now();
        let event = ChangeEvent::new(ChangeKind::Modified, "/p/a", 1);
        n.push(event.clone(), t0);
        n.flush();
        assert_eq!(n.push(event, t0 + ms(1000)), Admission::Accepted);
    }

    #[test]
    fn structural_events_flush_fast() {
        let mut n = normalizer();
        let t0 = Instant::now();
        n.push(ChangeEvent::new(ChangeKind::Created, "/p/new.rs", 1), t0);
        assert_eq!(n.deadline(), Some(t0 + ms(50)));
        assert!(n.poll(t0 + ms(49)).is_none());
        assert!(n.poll(t0 + ms(50)).is_some());
        assert!(n.deadline().is_none());
    }

    #[test]
    fn modify_events_use_longer_window() {
        let mut n = normalizer();
        let t0 = Instant::now();
        n.push(ChangeEvent::new(ChangeKind::Modified, "/p/a.rs", 1), t0);
        assert_eq!(n.deadline(), Some(t0 + ms(200)));
        assert!(n.poll(t0 + ms(100)).is_none());
    }

    #[test]
    fn each_event_rearms_the_timer() {
        let mut n = normalizer();
        let t0 = Instant::now();
        n.push(ChangeEvent::new(ChangeKind::Modified, "/p/a.rs", 1), t0);
        n.push(ChangeEvent::new(ChangeKind::Created, "/p/b.rs", 2), t0 + ms(150));
        // Trailing debounce keyed to the last event, not the first.
        assert_eq!(n.deadline(), Some(t0 + ms(200)));
        assert!(n.poll(t0 + ms(199)).is_none());
        n.push(ChangeEvent::new(ChangeKind::Modified, "/p/c.rs", 3), t0 + ms(190));
        assert_eq!(n.deadline(), Some(t0 + ms(390)));
        let batch = n.poll(t0 + ms(390)).expect("batch");
        assert_eq!(batch.events.len(), 3);
    }

    #[test]
    fn create_then_delete_collapses_to_delete() {
        let mut n = normalizer();
        let t0 = Instant::now();
        n.push(ChangeEvent::new(ChangeKind::Created, "/p/tmp", 1), t0);
        n.push(ChangeEvent::new(ChangeKind::Modified, "/p/other", 2), t0);
        n.push(ChangeEvent::new(ChangeKind::Deleted, "/p/tmp", 3), t0 + ms(10));
        let batch = n.flush().expect("batch");
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.events[0].path, PathBuf::from("/p/other"));
        assert_eq!(batch.events[1].event_type, ChangeKind::Deleted);
    }

    #[test]
    fn batches_are_sequenced() {
        let mut n = normalizer();
        let t0 = Instant::now();
        n.push(ChangeEvent::new(ChangeKind::Created, "/p/a", 1), t0);
        let first = n.flush().unwrap();
        n.push(ChangeEvent::new(ChangeKind::Created, "/p/b", 2), t0);
        let second = n.flush().unwrap();
        assert!(second.sequence > first.sequence);
        assert!(n.flush().is_none());
    }

    #[test]
    fn cancel_discards_pending() {
        let mut n = normalizer();
        let t0 = Instant::now();
        n.push(ChangeEvent::new(ChangeKind::Created, "/old/a", 1), t0);
        n.cancel();
        assert!(n.deadline().is_none());
        assert!(n.poll(t0 + ms(1000)).is_none());
        assert_eq!(n.tracked_keys(), 0);
    }

    #[test]
    fn stale_dedup_entries_are_purged() {
        let mut n = normalizer();
        let t0 = Instant::now();
        n.push(ChangeEvent::new(ChangeKind::Modified, "/p/a", 1), t0);
        n.push(ChangeEvent::new(ChangeKind::Modified, "/p/b", 1), t0 + ms(4000));
        assert_eq!(n.tracked_keys(), 2);
        n.push(ChangeEvent::new(ChangeKind::Modified, "/p/c", 1), t0 + ms(6000));
        // "/p/a" aged out; "/p/b" is still inside retention.
        assert_eq!(n.tracked_keys(), 2);
    }
}
