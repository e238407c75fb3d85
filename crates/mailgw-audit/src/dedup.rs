// dedup.rs — Cross-cycle deduplication and retention windowing.
//
// The appliance's "since last query" filter overlaps between cycles, so
// the same entry arrives again and again. The table remembers every
// fingerprint already emitted during this process's lifetime and lets a
// record through exactly once. Records older than the retention window
// are never emitted — even on first sight — and their table slots are
// reclaimed, which bounds memory to roughly one day of distinct entries.
//
// Dedup memory is process-local only; a restart rebuilds it from scratch
// and the window suppresses the resulting replay of old entries.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::record::Record;

/// How long a fingerprint stays eligible for emission and retention.
const RETENTION_WINDOW_HOURS: i64 = 24;

/// Fingerprint → record map of everything already emitted this lifetime.
#[derive(Debug, Default)]
pub struct DedupTable {
    seen: HashMap<String, Record>,
}

impl DedupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one cycle's fetched records, returning the ones to emit.
    ///
    /// The pass starts by sweeping out table entries whose event time has
    /// fallen behind the window cutoff. Then, per record, in arrival
    /// order:
    /// - fingerprinting failure or a degenerate digest suppresses the
    ///   record; nothing without a reliable identity is ever emitted;
    /// - an event time before `now - 24h` evicts the fingerprint from the
    ///   table (if present) and suppresses the record, even if it was
    ///   never seen before;
    /// - an unseen fingerprint inside the window is recorded and emitted;
    /// - a known fingerprint inside the window is suppressed.
    ///
    /// The final table state does not depend on arrival order, only the
    /// emission order does.
    pub fn classify(&mut self, records: Vec<Record>, now: DateTime<Utc>) -> Vec<Record> {
        let cutoff = now - Duration::hours(RETENTION_WINDOW_HOURS);

        // Reclaim slots whose entries aged past the window, whether or not
        // the appliance ever resends them.
        let before = self.seen.len();
        self.seen.retain(|_, record| record.event_time() >= cutoff);
        if self.seen.len() < before {
            debug!(evicted = before - self.seen.len(), "pruned aged-out fingerprints");
        }

        let mut fresh = Vec::new();

        for mut record in records {
            if let Err(e) = record.compute_fingerprint() {
                warn!(id = record.id, error = %e, "suppressing record without identity");
                continue;
            }

            if record.event_time() < cutoff {
                debug!(
                    id = record.id,
                    event_time = %record.event_time(),
                    %cutoff,
                    "record outside retention window"
                );
                self.seen.remove(&record.fingerprint);
                continue;
            }

            if !self.seen.contains_key(&record.fingerprint) {
                self.seen.insert(record.fingerprint.clone(), record.clone());
                fresh.push(record);
            }
        }

        fresh
    }

    /// Number of fingerprints currently retained.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
