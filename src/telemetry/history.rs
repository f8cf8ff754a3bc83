//! # Telemetry History
//!
//! A fixed-capacity FIFO of decoded records, and the handle used to share it
//! between the serial task (the only writer) and any number of readers.
//!
//! Readers always get an owned copy, so a later append can never change a
//! snapshot that was already handed out.

use super::record::TelemetryRecord;
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

/// Default number of records kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// bounded, insertion-ordered record buffer
#[derive(Clone, Debug)]
pub struct TelemetryHistory {
    records: VecDeque<TelemetryRecord>,
    capacity: usize,
}

impl TelemetryHistory {
    /// history holding at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        TelemetryHistory {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// add a record, evicting the oldest one when full
    pub fn append(&mut self, record: TelemetryRecord) {
        if self.capacity == 0 {
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<TelemetryRecord> {
        self.records.iter().cloned().collect()
    }

    /// most recently appended record
    pub fn latest(&self) -> Option<TelemetryRecord> {
        self.records.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for TelemetryHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Cloneable cross-task handle to a [`TelemetryHistory`].
///
/// The write lock is held only for one O(1) append; readers hold the read
/// lock only while copying out.
#[derive(Clone, Debug, Default)]
pub struct SharedHistory {
    inner: Arc<RwLock<TelemetryHistory>>,
}

impl SharedHistory {
    pub fn new(capacity: usize) -> Self {
        SharedHistory {
            inner: Arc::new(RwLock::new(TelemetryHistory::new(capacity))),
        }
    }

    pub fn append(&self, record: TelemetryRecord) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .append(record);
    }

    pub fn snapshot(&self) -> Vec<TelemetryRecord> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    pub fn latest(&self) -> Option<TelemetryRecord> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TelemetryStatus;
    use chrono::Local;
    use serde_json::json;

    fn sample(n: i64) -> TelemetryRecord {
        TelemetryRecord {
            angle: json!(n),
            temperature: json!(n * 10),
            status: TelemetryStatus::Safe,
            captured_at: Local::now(),
            raw_line: format!("#{n}"),
        }
    }

    #[test]
    fn test_history_keeps_last_n_in_order() {
        for capacity in [1usize, 3, 50] {
            for appended in 0..=(capacity * 2 + 1) {
                let mut history = TelemetryHistory::new(capacity);
                for n in 0..appended {
                    history.append(sample(n as i64));
                }
                let snapshot = history.snapshot();
                assert_eq!(snapshot.len(), appended.min(capacity));

                let first = appended.saturating_sub(capacity);
                let expected: Vec<String> = (first..appended).map(|n| format!("#{n}")).collect();
                let got: Vec<String> = snapshot.into_iter().map(|r| r.raw_line).collect();
                assert_eq!(got, expected);
            }
        }
    }

    #[test]
    fn test_history_latest() {
        let mut history = TelemetryHistory::new(2);
        assert!(history.latest().is_none());
        history.append(sample(1));
        history.append(sample(2));
        history.append(sample(3));
        assert_eq!(history.latest().unwrap().raw_line, "#3");
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_history_zero_capacity() {
        let mut history = TelemetryHistory::new(0);
        history.append(sample(1));
        assert!(history.is_empty());
        assert!(history.latest().is_none());
    }

    #[test]
    fn test_snapshot_is_independent() {
        let shared = SharedHistory::new(3);
        shared.append(sample(1));
        let before = shared.snapshot();
        shared.append(sample(2));
        shared.append(sample(3));
        shared.append(sample(4));
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].raw_line, "#1");
        assert_eq!(shared.len(), 3);
    }

    #[test]
    fn test_shared_history_across_threads() {
        let shared = SharedHistory::new(10);
        let writer = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for n in 0..1000 {
                    shared.append(sample(n));
                }
            })
        };
        for _ in 0..200 {
            let snapshot = shared.snapshot();
            assert!(snapshot.len() <= 10);
            let angles: Vec<i64> = snapshot.iter().filter_map(|r| r.angle()).collect();
            assert!(angles.windows(2).all(|w| w[1] == w[0] + 1));
        }
        writer.join().unwrap();
        assert_eq!(shared.latest().unwrap().angle(), Some(999));
    }
}
