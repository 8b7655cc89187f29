use ioscope_events::{Ctime, FileRef};

/// Device identifier (block device the object lives on).
pub type DeviceId = u64;
/// Object (inode) identifier, unique per device.
pub type ObjectId = u64;

/// Identity of a filesystem object: `(device, object)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Device the object lives on.
    pub device: DeviceId,
    /// Object id on that device.
    pub object: ObjectId,
}

impl ObjectKey {
    /// Creates a key from its components.
    pub fn new(device: DeviceId, object: ObjectId) -> Self {
        Self { device, object }
    }
}

/// An object identity together with its generation stamp. Two stamps with
/// equal keys but different ctimes name different incarnations of a
/// reused object id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectStamp {
    /// Object identity.
    pub key: ObjectKey,
    /// Creation-time generation stamp.
    pub ctime: Ctime,
}

impl ObjectStamp {
    /// Creates a stamp.
    pub fn new(key: ObjectKey, ctime: Ctime) -> Self {
        Self { key, ctime }
    }

    /// The record-level reference for this stamp.
    pub fn file_ref(&self) -> FileRef {
        FileRef {
            id: self.key.object,
            ctime: self.ctime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_with_different_ctimes_differ() {
        let key = ObjectKey::new(1, 2);
        let a = ObjectStamp::new(key, Ctime::new(10, 0));
        let b = ObjectStamp::new(key, Ctime::new(10, 1));
        assert_ne!(a, b);
        assert_eq!(a.key, b.key);
    }

    #[test]
    fn file_ref_carries_object_id_and_ctime() {
        let stamp = ObjectStamp::new(ObjectKey::new(3, 9), Ctime::new(5, 6));
        let fref = stamp.file_ref();
        assert_eq!(fref.id, 9);
        assert_eq!(fref.ctime, Ctime::new(5, 6));
    }
}
