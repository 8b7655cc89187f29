//! Metadata-provider interface.
//!
//! The resolver asks this collaborator for an object's current leaf name,
//! parent, and generation stamp. A `None` answer means the object is
//! already unlinked; the walk in progress is aborted.

use crate::types::{ObjectKey, ObjectStamp};
use ioscope_events::Ctime;
use std::collections::HashMap;
use std::sync::RwLock;

/// Resolved metadata for one object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// The object's identity and generation stamp.
    pub stamp: ObjectStamp,
    /// Leaf name (file or directory name).
    pub name: String,
    /// Whether the object itself is a directory.
    pub is_dir: bool,
    /// Parent directory stamp, or `None` at a terminal (mount root, or a
    /// parent that can no longer be stamped).
    pub parent: Option<ObjectStamp>,
    /// Whether the parent is a directory; meaningful only when `parent`
    /// is present.
    pub parent_is_dir: bool,
}

/// Source of object metadata.
pub trait MetadataProvider: Send + Sync {
    /// Resolves the current name/parent/stamp of `key`, or `None` if the
    /// object is already unlinked.
    fn resolve(&self, key: ObjectKey) -> Option<ObjectMeta>;
}

#[derive(Clone)]
struct MetaNode {
    name: String,
    is_dir: bool,
    ctime: Ctime,
    parent: Option<ObjectKey>,
}

/// In-memory metadata tree, used for unit testing and development.
#[derive(Default)]
pub struct MemoryMetadata {
    objects: RwLock<HashMap<ObjectKey, MetaNode>>,
}

impl MemoryMetadata {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an object.
    pub fn insert(
        &self,
        key: ObjectKey,
        name: &str,
        is_dir: bool,
        ctime: Ctime,
        parent: Option<ObjectKey>,
    ) {
        self.objects.write().expect("lock poisoned").insert(
            key,
            MetaNode {
                name: name.to_string(),
                is_dir,
                ctime,
                parent,
            },
        );
    }

    /// Unlinks an object; later resolves return `None`.
    pub fn remove(&self, key: ObjectKey) -> bool {
        self.objects
            .write()
            .expect("lock poisoned")
            .remove(&key)
            .is_some()
    }

    /// Rewrites an object's ctime, modeling id reuse.
    pub fn set_ctime(&self, key: ObjectKey, ctime: Ctime) -> bool {
        match self.objects.write().expect("lock poisoned").get_mut(&key) {
            Some(node) => {
                node.ctime = ctime;
                true
            }
            None => false,
        }
    }
}

impl MetadataProvider for MemoryMetadata {
    fn resolve(&self, key: ObjectKey) -> Option<ObjectMeta> {
        let objects = self.objects.read().expect("lock poisoned");
        let node = objects.get(&key)?.clone();
        // A parent that has itself vanished degrades to a terminal.
        let parent = node
            .parent
            .and_then(|p| objects.get(&p).map(|n| (ObjectStamp::new(p, n.ctime), n.is_dir)));
        let (parent, parent_is_dir) = match parent {
            Some((stamp, is_dir)) => (Some(stamp), is_dir),
            None => (None, false),
        };
        Some(ObjectMeta {
            stamp: ObjectStamp::new(key, node.ctime),
            name: node.name,
            is_dir: node.is_dir,
            parent,
            parent_is_dir,
        })
    }
}
