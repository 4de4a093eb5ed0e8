//! Resource cache: resource id -> descriptor + live handle + liveness.
//!
//! The cache holds exactly one entry per resource id for the lifetime of
//! the graph. It grants shared-by-reference access to GPU handles; the
//! backing GPU memory is owned by the backend, the cache only indexes into
//! it. The graph mutates the cache single-threaded (see the concurrency
//! notes on [`RenderGraph`](super::RenderGraph)).

use std::collections::HashMap;

use crate::render_graph::resource::{RenderGraphResource, ResourceHandle, ResourceId, ResourceInfo};

/// Mapping from resource id to cache entry.
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: HashMap<ResourceId, RenderGraphResource>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a resource, keeping any existing entry for the same id.
    ///
    /// The first registration wins; re-registering during a recompile is a
    /// no-op so handles survive. Two nodes producing the same non-external
    /// name is almost always a wiring mistake and is logged.
    pub fn register(&mut self, id: ResourceId, info: ResourceInfo) {
        match self.entries.entry(id) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(RenderGraphResource::new(id, info));
            }
            std::collections::hash_map::Entry::Occupied(slot) => {
                if !slot.get().is_external() && slot.get().info != info {
                    log::warn!(
                        "resource {id:?} registered twice with different descriptors; first wins"
                    );
                }
            }
        }
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Look up a resource.
    ///
    /// # Panics
    ///
    /// Panics on an unknown id; that is a logic bug, not a runtime
    /// condition. Use [`try_get`](Self::try_get) where absence is valid.
    pub fn get(&self, id: ResourceId) -> &RenderGraphResource {
        self.try_get(id).expect("unknown resource id")
    }

    pub fn try_get(&self, id: ResourceId) -> Option<&RenderGraphResource> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: ResourceId) -> &mut RenderGraphResource {
        self.entries.get_mut(&id).expect("unknown resource id")
    }

    pub fn try_get_mut(&mut self, id: ResourceId) -> Option<&mut RenderGraphResource> {
        self.entries.get_mut(&id)
    }

    /// Patch the live handle of a resource (host-injected externals, or
    /// freshly allocated attachments).
    pub fn set_handle(&mut self, id: ResourceId, handle: Option<ResourceHandle>) {
        self.get_mut(id).handle = handle;
    }

    /// Increment the compile-time consumer count.
    pub fn add_ref(&mut self, id: ResourceId) {
        self.get_mut(id).ref_count += 1;
    }

    /// Decrement the compile-time consumer count, returning the new count.
    ///
    /// # Panics
    ///
    /// Panics on underflow: a resource must be released exactly once per
    /// recorded consumer.
    pub fn release(&mut self, id: ResourceId) -> u32 {
        let entry = self.get_mut(id);
        assert!(entry.ref_count > 0, "resource {id:?} released too often");
        entry.ref_count -= 1;
        entry.ref_count
    }

    /// Zero every consumer count before a fresh liveness pass.
    pub fn reset_ref_counts(&mut self) {
        for entry in self.entries.values_mut() {
            entry.ref_count = 0;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RenderGraphResource> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
