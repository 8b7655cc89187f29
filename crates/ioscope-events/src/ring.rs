//! Bounded in-memory ring sink.
//!
//! The per-context trace buffer stand-in: fixed capacity, internally
//! locked, drops records when full instead of blocking.

use crate::record::{Record, RecordBody, RecordHeader, RecordKind};
use crate::sink::{Reservation, SinkError, TraceSink};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::trace;

/// Ring sink configuration.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Maximum number of buffered records.
    pub capacity: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self { capacity: 4096 }
    }
}

/// Commit/drop counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    /// Records successfully committed.
    pub committed: u64,
    /// Records dropped because the ring was full.
    pub dropped: u64,
}

/// Fixed-capacity record buffer implementing `TraceSink`.
pub struct RingSink {
    records: Mutex<VecDeque<Record>>,
    capacity: usize,
    next_sid: AtomicU64,
    committed: AtomicU64,
    dropped: AtomicU64,
}

impl RingSink {
    /// Creates a sink with the given configuration.
    pub fn new(config: RingConfig) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(config.capacity.min(4096))),
            capacity: config.capacity.max(1),
            next_sid: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Creates a sink holding at most `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(RingConfig { capacity })
    }

    /// Snapshot of all buffered records.
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().expect("lock poisoned").iter().copied().collect()
    }

    /// Removes and returns all buffered records.
    pub fn drain(&self) -> Vec<Record> {
        self.records
            .lock()
            .expect("lock poisoned")
            .drain(..)
            .collect()
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.records.lock().expect("lock poisoned").len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commit/drop counters.
    pub fn stats(&self) -> SinkStats {
        SinkStats {
            committed: self.committed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for RingSink {
    fn default() -> Self {
        Self::new(RingConfig::default())
    }
}

impl TraceSink for RingSink {
    fn reserve(&self, kind: RecordKind, timestamp_ns: u64) -> Result<Reservation, SinkError> {
        let records = self.records.lock().expect("lock poisoned");
        if records.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("ring full, dropping {:?} record", kind);
            return Err(SinkError::Full);
        }
        drop(records);

        let sid = self.next_sid.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Reservation {
            sid,
            kind,
            timestamp_ns,
        })
    }

    fn commit(&self, reservation: Reservation, body: RecordBody) -> Result<(), SinkError> {
        if body.kind() != reservation.kind {
            return Err(SinkError::KindMismatch {
                reserved: reservation.kind,
                committed: body.kind(),
            });
        }

        let mut records = self.records.lock().expect("lock poisoned");
        if records.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(SinkError::Full);
        }
        records.push_back(Record {
            header: RecordHeader {
                sid: reservation.sid,
                timestamp_ns: reservation.timestamp_ns,
                kind: reservation.kind,
            },
            body,
        });
        self.committed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Ctime, FileEvent, FileRef, FsEventKind};
    use crate::sink::emit;

    fn event(id: u64) -> RecordBody {
        RecordBody::FileEvent(FileEvent {
            device_id: 1,
            file: FileRef {
                id,
                ctime: Ctime::new(10, 0),
            },
            kind: FsEventKind::Create,
        })
    }

    #[test]
    fn emit_stores_record_with_header() {
        let sink = RingSink::with_capacity(8);
        let sid = emit(&sink, 123, event(1)).unwrap();
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].header.sid, sid);
        assert_eq!(records[0].header.timestamp_ns, 123);
    }

    #[test]
    fn sids_are_strictly_increasing() {
        let sink = RingSink::with_capacity(8);
        let a = emit(&sink, 0, event(1)).unwrap();
        let b = emit(&sink, 0, event(2)).unwrap();
        assert!(b > a);
    }

    #[test]
    fn reserve_fails_full_at_capacity() {
        let sink = RingSink::with_capacity(2);
        emit(&sink, 0, event(1)).unwrap();
        emit(&sink, 0, event(2)).unwrap();
        assert_eq!(emit(&sink, 0, event(3)), Err(SinkError::Full));
        assert_eq!(sink.stats().dropped, 1);
        assert_eq!(sink.stats().committed, 2);
    }

    #[test]
    fn commit_rejects_kind_mismatch() {
        let sink = RingSink::with_capacity(2);
        let reservation = sink.reserve(RecordKind::FileName, 0).unwrap();
        let err = sink.commit(reservation, event(1)).unwrap_err();
        assert!(matches!(err, SinkError::KindMismatch { .. }));
    }

    #[test]
    fn drain_empties_the_ring() {
        let sink = RingSink::with_capacity(4);
        emit(&sink, 0, event(1)).unwrap();
        emit(&sink, 0, event(2)).unwrap();
        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn default_config_capacity() {
        let config = RingConfig::default();
        assert_eq!(config.capacity, 4096);
    }
}
