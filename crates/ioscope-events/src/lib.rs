#![warn(missing_docs)]

//! IoScope trace records and the trace-sink interface.

pub mod record;
pub mod ring;
pub mod sink;

pub use record::{
    Ctime, FileEvent, FileName, FileNameEvent, FileRef, FsEventKind, Record, RecordBody,
    RecordHeader, RecordKind, FILE_NAME_MAX,
};
pub use ring::{RingConfig, RingSink, SinkStats};
pub use sink::{emit, now_ns, Reservation, SinkError, TraceSink};
