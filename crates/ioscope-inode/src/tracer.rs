//! Tracer instance lifecycle and per-context sharding.
//!
//! One instance exists per execution context and owns its identity cache
//! exclusively, so the cache needs no locking. The caller must uphold
//! the binding: an instance is only ever driven from its own context.

use crate::cache::{CacheStats, IdentityCache, DEFAULT_CACHE_ENTRIES};
use crate::error::Result;
use crate::meta::MetadataProvider;
use crate::monitor::FsMonitor;
use crate::registry::MonitorRegistry;
use crate::resolver::{self, WalkOutcome};
use crate::types::ObjectStamp;
use ioscope_events::TraceSink;
use std::sync::Arc;
use tracing::debug;

/// Execution-context identifier an instance is bound to.
pub type ContextId = u32;

/// Per-instance configuration.
#[derive(Debug, Clone)]
pub struct TracerConfig {
    /// Identity-cache arena size.
    pub cache_entries: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            cache_entries: DEFAULT_CACHE_ENTRIES,
        }
    }
}

/// One tracer shard: an identity cache plus a reference to the shared
/// monitor (absent when monitor setup failed).
pub struct TracerInstance {
    context: ContextId,
    // Field order matters for teardown: the monitor reference is
    // released before the cache arena is freed.
    monitor: Option<Arc<FsMonitor>>,
    sink: Arc<dyn TraceSink>,
    cache: IdentityCache,
}

impl TracerInstance {
    /// Creates an instance bound to `context`. Monitor acquisition
    /// failure is non-fatal (operation continues cache-only); only arena
    /// allocation failure is an error.
    pub fn create(
        context: ContextId,
        config: &TracerConfig,
        registry: &MonitorRegistry,
    ) -> Result<Self> {
        let cache = IdentityCache::with_capacity(config.cache_entries)?;
        let monitor = registry.acquire();
        debug!(
            "tracer instance created, context {}, monitor {}",
            context,
            if monitor.is_some() { "present" } else { "absent" }
        );
        Ok(Self {
            context,
            monitor,
            sink: registry.sink().clone(),
            cache,
        })
    }

    /// The context this instance is bound to.
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Whether the shared monitor is held.
    pub fn has_monitor(&self) -> bool {
        self.monitor.is_some()
    }

    /// The shared monitor, if held.
    pub fn monitor(&self) -> Option<&Arc<FsMonitor>> {
        self.monitor.as_ref()
    }

    /// Identity-cache counter snapshot.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of identities currently cached.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Records the naming chain for a just-traced object: walks the
    /// ancestor chain, emitting one record per uncached ancestor, and
    /// stops at the first cache hit or at the mount root.
    pub fn trace_io(&mut self, provider: &dyn MetadataProvider, object: ObjectStamp) -> WalkOutcome {
        resolver::walk(
            &mut self.cache,
            self.monitor.as_deref(),
            self.sink.as_ref(),
            provider,
            object,
        )
    }
}

/// One tracer instance per execution context.
pub struct TracerSet {
    instances: Vec<TracerInstance>,
}

impl TracerSet {
    /// Creates `contexts` instances sharing one registry. The first
    /// instance created demands the monitor; the rest share it.
    pub fn create(contexts: u32, config: &TracerConfig, registry: &MonitorRegistry) -> Result<Self> {
        let mut instances = Vec::with_capacity(contexts as usize);
        for context in 0..contexts {
            instances.push(TracerInstance::create(context, config, registry)?);
        }
        Ok(Self { instances })
    }

    /// The instance bound to `context`. Must only be used from that
    /// context.
    pub fn get_mut(&mut self, context: ContextId) -> Option<&mut TracerInstance> {
        self.instances.get_mut(context as usize)
    }

    /// Number of shards.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the set holds no shards.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
