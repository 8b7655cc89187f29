//! Trace record shapes emitted by the identity core.
//!
//! Two record kinds exist: `FileEvent` (file lifecycle: create, delete,
//! move) and `FileNameEvent` (one link of an ancestor naming chain). Both
//! carry the `(id, ctime)` pair so consumers can detect inode-number reuse.

use serde::{Deserialize, Serialize};

/// Creation-time stamp of a filesystem object.
///
/// Used as a generation stamp to detect object-id reuse, not as a
/// last-modified indicator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ctime {
    /// Seconds component.
    pub secs: i64,
    /// Nanoseconds component.
    pub nanos: u32,
}

impl Ctime {
    /// The "no object" stamp, used for terminal parents.
    pub const ZERO: Ctime = Ctime { secs: 0, nanos: 0 };

    /// Creates a stamp from its components.
    pub fn new(secs: i64, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    /// Whether this is the zero stamp.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

/// Maximum stored leaf-name length, including the trailing NUL.
pub const FILE_NAME_MAX: usize = 64;

/// Fixed-size leaf name with guaranteed NUL termination.
///
/// Names longer than `FILE_NAME_MAX - 1` bytes are truncated; the final
/// byte is always NUL.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FileName {
    bytes: [u8; FILE_NAME_MAX],
}

// Serialized as the name bytes (up to the NUL); the fixed buffer is an
// in-memory layout concern, not a wire one.
impl Serialize for FileName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.as_bytes())
    }
}

impl<'de> Deserialize<'de> for FileName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        Ok(FileName::truncate_from(&bytes))
    }
}

impl FileName {
    /// Copies `name` into a fixed buffer, truncating if needed.
    pub fn truncate_from(name: &[u8]) -> Self {
        let mut bytes = [0u8; FILE_NAME_MAX];
        let to_copy = name.len().min(FILE_NAME_MAX - 1);
        bytes[..to_copy].copy_from_slice(&name[..to_copy]);
        Self { bytes }
    }

    /// The name bytes up to (excluding) the first NUL.
    pub fn as_bytes(&self) -> &[u8] {
        let len = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FILE_NAME_MAX - 1);
        &self.bytes[..len]
    }

    /// Lossy UTF-8 view of the stored name.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }

    /// Whether the stored name is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes[0] == 0
    }
}

impl std::fmt::Debug for FileName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileName({:?})", self.to_string_lossy())
    }
}

/// File-lifecycle event classes recorded by the monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FsEventKind {
    /// Object moved out of a watched directory.
    MoveFrom,
    /// Object moved into a watched directory.
    MoveTo,
    /// Object created in a watched directory.
    Create,
    /// Object deleted (delete-self; no parent context available).
    Delete,
}

/// An object id together with its generation stamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Object (inode) id on its device.
    pub id: u64,
    /// Creation-time generation stamp.
    pub ctime: Ctime,
}

impl FileRef {
    /// Terminal reference used when a parent is absent.
    pub const NONE: FileRef = FileRef {
        id: 0,
        ctime: Ctime::ZERO,
    };
}

/// A file-lifecycle record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    /// Device the object lives on.
    pub device_id: u64,
    /// The object the event applies to.
    pub file: FileRef,
    /// Event class.
    pub kind: FsEventKind,
}

/// One link of an ancestor naming chain: object, its parent, its leaf name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNameEvent {
    /// Device the object lives on.
    pub device_id: u64,
    /// The named object.
    pub file: FileRef,
    /// Parent directory, or `FileRef::NONE` at a terminal.
    pub parent: FileRef,
    /// Leaf name, truncated and NUL-terminated.
    pub name: FileName,
}

/// Discriminant for record bodies; sinks reserve space by kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    /// A `FileEvent` body.
    FileEvent,
    /// A `FileNameEvent` body.
    FileName,
}

/// The payload of a committed record.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum RecordBody {
    /// File-lifecycle event.
    FileEvent(FileEvent),
    /// Naming-chain link.
    FileName(FileNameEvent),
}

impl RecordBody {
    /// The kind tag matching this body.
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordBody::FileEvent(_) => RecordKind::FileEvent,
            RecordBody::FileName(_) => RecordKind::FileName,
        }
    }
}

/// Header common to all records; `sid` is assigned by the sink at reserve
/// time and is strictly increasing per sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    /// Sink-assigned sequence id.
    pub sid: u64,
    /// Wall-clock timestamp in nanoseconds.
    pub timestamp_ns: u64,
    /// Body discriminant.
    pub kind: RecordKind,
}

/// A committed trace record.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record header.
    pub header: RecordHeader,
    /// Record payload.
    pub body: RecordBody,
}
