//! The trace-sink interface.
//!
//! Sinks are written in two phases, matching the underlying trace buffer
//! discipline: `reserve` claims a slot and assigns the sequence id,
//! `commit` publishes the body. A full sink fails the reservation; the
//! caller drops the record and moves on — nothing on the I/O hot path may
//! block on tracing.

use crate::record::{RecordBody, RecordKind};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Sink failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    /// No buffer space; the record is dropped.
    #[error("trace buffer full")]
    Full,

    /// A body of a different kind than reserved was committed.
    #[error("record kind mismatch: reserved {reserved:?}, committed {committed:?}")]
    KindMismatch {
        /// Kind passed to `reserve`.
        reserved: RecordKind,
        /// Kind of the committed body.
        committed: RecordKind,
    },
}

/// A claimed slot. Single-use: consumed by `commit`.
#[derive(Debug)]
pub struct Reservation {
    pub(crate) sid: u64,
    pub(crate) kind: RecordKind,
    pub(crate) timestamp_ns: u64,
}

impl Reservation {
    /// Sequence id assigned to this slot.
    pub fn sid(&self) -> u64 {
        self.sid
    }
}

/// Destination for trace records.
pub trait TraceSink: Send + Sync {
    /// Claims a slot for a record of `kind`. Fails with `SinkError::Full`
    /// when no space is available; never blocks.
    fn reserve(&self, kind: RecordKind, timestamp_ns: u64) -> Result<Reservation, SinkError>;

    /// Publishes a previously reserved record.
    fn commit(&self, reservation: Reservation, body: RecordBody) -> Result<(), SinkError>;
}

/// Reserves and commits `body` in one step, returning the assigned sid.
pub fn emit(sink: &dyn TraceSink, timestamp_ns: u64, body: RecordBody) -> Result<u64, SinkError> {
    let reservation = sink.reserve(body.kind(), timestamp_ns)?;
    let sid = reservation.sid();
    sink.commit(reservation, body)?;
    Ok(sid)
}

/// Wall-clock nanoseconds since the epoch, for record timestamps.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ns_is_nonzero_and_monotonic_enough() {
        let a = now_ns();
        let b = now_ns();
        assert!(a > 0);
        assert!(b >= a);
    }
}
