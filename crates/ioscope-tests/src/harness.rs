//! Shared test scaffolding.

use ioscope_events::{Ctime, RingSink};
use ioscope_inode::backend::InProcessBackend;
use ioscope_inode::{CompatSignature, MemoryMetadata, MonitorRegistry, ObjectKey, ObjectStamp};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Initializes test logging from `RUST_LOG`; safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A registry wired to an in-process backend and a bounded ring sink.
pub struct TestRig {
    /// The backend events are injected through.
    pub backend: Arc<InProcessBackend>,
    /// The sink records land in.
    pub sink: Arc<RingSink>,
    /// The registry handed to tracer instances.
    pub registry: MonitorRegistry,
    /// The metadata tree walks resolve against.
    pub meta: MemoryMetadata,
}

impl TestRig {
    /// Builds a rig with a matching compatibility signature.
    pub fn new() -> Self {
        Self::with_compat(CompatSignature::current())
    }

    /// Builds a rig with the given signature (mismatches latch the
    /// monitor Absent).
    pub fn with_compat(compat: CompatSignature) -> Self {
        let backend = Arc::new(InProcessBackend::new());
        let sink = Arc::new(RingSink::with_capacity(256));
        let registry = MonitorRegistry::new(backend.clone(), sink.clone(), compat);
        Self {
            backend,
            sink,
            registry,
            meta: MemoryMetadata::new(),
        }
    }

    /// Inserts a filesystem object into the metadata tree and returns
    /// its stamp.
    pub fn add_object(
        &self,
        id: u64,
        name: &str,
        is_dir: bool,
        secs: i64,
        parent: Option<ObjectKey>,
    ) -> ObjectStamp {
        let key = ObjectKey::new(1, id);
        self.meta.insert(key, name, is_dir, Ctime::new(secs, 0), parent);
        ObjectStamp::new(key, Ctime::new(secs, 0))
    }
}

impl Default for TestRig {
    fn default() -> Self {
        Self::new()
    }
}
