//! Render graph orchestration: compile-time resource allocation/aliasing
//! and per-frame execution.
//!
//! # Compile (`init`)
//!
//! 1. Pin links are promoted to DAG edges and the topological order is
//!    computed (acyclicity is re-validated here, not trusted).
//! 2. Every output pin declares the resource it produces; descriptors land
//!    in the [`ResourceCache`].
//! 3. A reference-counting pass counts, per resource, the number of
//!    connected downstream input pins.
//! 4. An allocation pass walks the topological order: output attachments
//!    are backed by GPU storage, preferring an *alias* of a dead resource
//!    of identical extent and format over a fresh allocation. Interleaved
//!    with it, input pins release their upstream resources; a resource
//!    whose count hits zero joins the free list and becomes alias bait for
//!    everything allocated after it. This is safe exactly because release
//!    happens in topological order: a freed resource's last consumer runs
//!    strictly before the aliasing resource's producer.
//! 5. A second pass invokes every node's compile hook, now that all
//!    handles are resolved.
//!
//! # Frame phases
//!
//! `begin_frame` patches the host-injected swapchain/depth handles into
//! the cache, then drives node hooks in topological order; `render`
//! records `pre_render -> render -> post_render` for every enabled node
//! into one primary command buffer; `end_frame` runs the end hooks and
//! unconditionally transitions the swapchain image to the presentable
//! layout as the frame's last command.
//!
//! The graph and cache are singletons shared across all frames in flight;
//! only the external handle slots change per frame. Any resource read by
//! two in-flight frames must be multi-buffered by its owner, never by the
//! graph.

use std::collections::HashMap;

use serde_json::Value;

use crate::api::FrameContext;
use crate::backend::{
    BufferDescriptor, CommandBufferHandle, Extent2d, GpuBackend, TextureDescriptor, TextureFormat,
    TextureHandle, TextureUsage,
};
use crate::dag::NodeId;
use crate::error::{GraphicsError, GraphicsResult};
use crate::node_graph::{GraphNode, NodeGraph, NodeTypeRegistry, PinId};
use crate::render_graph::cache::ResourceCache;
use crate::render_graph::node::{
    CompileContext, GraphFrameContext, GraphRenderContext, RenderGraphNode, ResizeContext,
    ResourceResolver, PIN_BUFFER,
};
use crate::render_graph::resource::{
    BufferResourceInfo, ResourceHandle, ResourceId, ResourceInfo, ResourceKind,
    TextureResourceInfo, RESOURCE_DEPTH, RESOURCE_SWAPCHAIN, RESOURCE_VIEW_CONSTANTS,
};

/// DAG-scheduled frame renderer. See the module docs for the lifecycle.
pub struct RenderGraph {
    graph: NodeGraph<dyn RenderGraphNode>,
    cache: ResourceCache,
    order: Vec<NodeId>,
    /// Output pin -> resource produced by it; rebuilt on every compile.
    pin_resources: HashMap<PinId, ResourceId>,
    final_texture: Option<ResourceId>,
    compiled: bool,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            graph: NodeGraph::new(),
            cache: ResourceCache::new(),
            order: Vec::new(),
            pin_resources: HashMap::new(),
            final_texture: None,
            compiled: false,
        }
    }

    /// Load a graph from its persisted JSON form.
    pub fn from_json(
        value: &Value,
        registry: &NodeTypeRegistry<dyn RenderGraphNode>,
    ) -> GraphicsResult<Self> {
        let graph = NodeGraph::from_json(value, registry)?;
        Ok(Self {
            graph,
            cache: ResourceCache::new(),
            order: Vec::new(),
            pin_resources: HashMap::new(),
            final_texture: None,
            compiled: false,
        })
    }

    /// Serialize the graph to its persisted JSON form.
    pub fn to_json(&self) -> Value {
        self.graph.to_json()
    }

    pub fn add_node(&mut self, node: Box<dyn RenderGraphNode>) -> NodeId {
        self.compiled = false;
        self.graph.add_node(node)
    }

    /// Connect an output pin to an input pin; see
    /// [`NodeGraph::connect`].
    pub fn connect(&mut self, from: PinId, to: PinId) -> bool {
        self.compiled = false;
        self.graph.connect(from, to)
    }

    pub fn node(&self, id: NodeId) -> &dyn RenderGraphNode {
        self.graph.node(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut dyn RenderGraphNode {
        self.graph.node_mut(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Patch the handle of a host-injected resource (e.g. the per-frame
    /// view-constants buffer).
    pub fn set_external_handle(&mut self, id: ResourceId, handle: ResourceHandle) {
        if let Some(entry) = self.cache.try_get_mut(id) {
            debug_assert!(entry.is_external(), "patching a graph-owned resource");
            entry.handle = Some(handle);
        } else {
            log::warn!("external resource {id:?} is not registered; handle dropped");
        }
    }

    /// The engine's displayable result: the resource behind the final
    /// output pin of the last pass in topological order.
    pub fn final_texture_id(&self) -> Option<ResourceId> {
        self.final_texture
    }

    /// The compiled execution order.
    pub fn execution_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Compile the graph: dependency resolution, liveness analysis, and
    /// GPU resource allocation with aliasing.
    pub fn init(
        &mut self,
        backend: &dyn GpuBackend,
        swapchain_extent: Extent2d,
        swapchain_format: TextureFormat,
    ) -> GraphicsResult<()> {
        self.graph.compile()?;
        let order = self.graph.topological_order();
        if order.is_empty() && self.graph.node_count() > 0 {
            return Err(GraphicsError::CyclicGraph);
        }
        self.order = order;

        // Reserved host-injected resources always exist, so per-frame
        // patching and nodes wiring to them never miss.
        self.cache.register(
            RESOURCE_SWAPCHAIN,
            ResourceInfo::Texture(TextureResourceInfo::reference(swapchain_format)),
        );
        self.cache.register(
            RESOURCE_DEPTH,
            ResourceInfo::Texture(TextureResourceInfo::reference(TextureFormat::Depth32Float)),
        );
        self.cache.register(
            RESOURCE_VIEW_CONSTANTS,
            ResourceInfo::Buffer(BufferResourceInfo {
                size: std::mem::size_of::<crate::api::ViewConstants>() as u64,
                usage: crate::backend::BufferUsage::UNIFORM,
                external: true,
            }),
        );

        // Every output pin declares what it produces.
        self.pin_resources.clear();
        for &id in &self.order {
            let node = self.graph.node(id);
            for pin in node.output_pins() {
                if let Some(binding) = node.output_binding(pin.local_id()) {
                    self.pin_resources.insert(pin.id(), binding.id);
                    self.cache.register(binding.id, binding.info);
                }
            }
        }

        // Reference-counting pass: number of downstream consumers per
        // produced resource.
        self.cache.reset_ref_counts();
        for &id in &self.order {
            let node = self.graph.node(id);
            for pin in node.input_pins() {
                let Some(linked) = pin.linked_pin() else {
                    continue;
                };
                match self.pin_resources.get(&linked) {
                    Some(&resource) => self.cache.add_ref(resource),
                    None => log::warn!(
                        "input pin {:?} consumes pin {:?} which produces no resource",
                        pin.id(),
                        linked
                    ),
                }
            }
        }

        // Allocation pass, interleaved with release. Outputs are backed
        // before the node's inputs are released so a pass can never alias
        // its own output onto a resource it still reads.
        let mut free_list: Vec<ResourceId> = Vec::new();
        for &id in &self.order {
            let node = self.graph.node(id);
            for pin in node.output_pins() {
                let Some(&resource) = self.pin_resources.get(&pin.id()) else {
                    continue;
                };
                if pin.pin_type() == PIN_BUFFER {
                    // Buffers are allocated plainly; they are not pooled
                    // or aliased.
                    allocate_buffer(backend, &mut self.cache, resource);
                } else {
                    create_attachment(
                        backend,
                        &mut self.cache,
                        &mut free_list,
                        resource,
                        swapchain_extent,
                    );
                }
            }

            for pin in node.input_pins() {
                let Some(linked) = pin.linked_pin() else {
                    continue;
                };
                let Some(&resource) = self.pin_resources.get(&linked) else {
                    continue;
                };
                if self.cache.release(resource) == 0 {
                    let entry = self.cache.get(resource);
                    let aliasable = !entry.is_external()
                        && matches!(
                            entry.info.as_texture().map(|t| t.kind),
                            Some(ResourceKind::Attachment) | Some(ResourceKind::Texture)
                        );
                    if aliasable {
                        free_list.push(resource);
                    }
                }
            }
        }

        // The displayable result is the final output pin of the last pass.
        self.final_texture = None;
        if let Some(&last) = self.order.last() {
            let node = self.graph.node(last);
            self.final_texture = node
                .output_pins()
                .last()
                .and_then(|pin| self.pin_resources.get(&pin.id()).copied());
            if self.final_texture.is_none() {
                log::warn!(
                    "final pass '{}' produces no texture; nothing to display",
                    node.type_name()
                );
            }
        }

        // Node compile hooks, with every handle resolved. A failing node
        // is degraded, not fatal.
        let cache = &self.cache;
        let pin_resources = &self.pin_resources;
        let graph = &mut self.graph;
        for &id in &self.order {
            let node = graph.node_mut(id);
            let mut ctx = CompileContext {
                backend,
                resources: ResourceResolver::new(pin_resources, cache),
                swapchain_extent,
                swapchain_format,
            };
            if let Err(error) = node.compile(&mut ctx) {
                log::warn!("compiling pass '{}' failed: {error}", node.type_name());
            }
        }

        self.compiled = true;
        log::debug!(
            "render graph compiled: {} passes, {} resources",
            self.order.len(),
            self.cache.len()
        );
        Ok(())
    }

    /// Start a frame: patch the acquired swapchain image and depth image
    /// into the cache, then run every enabled node's begin hook.
    pub fn begin_frame(
        &mut self,
        backend: &dyn GpuBackend,
        frame: &FrameContext,
        swapchain_image: TextureHandle,
        depth_image: TextureHandle,
        extent: Extent2d,
    ) {
        assert!(self.compiled, "render graph used before init");
        self.cache.set_handle(
            RESOURCE_SWAPCHAIN,
            Some(ResourceHandle::Texture(swapchain_image)),
        );
        self.cache
            .set_handle(RESOURCE_DEPTH, Some(ResourceHandle::Texture(depth_image)));

        let cache = &self.cache;
        let pin_resources = &self.pin_resources;
        let graph = &mut self.graph;
        for &id in &self.order {
            let node = graph.node_mut(id);
            if !node.is_enabled() {
                continue;
            }
            let mut ctx = GraphFrameContext {
                backend,
                resources: ResourceResolver::new(pin_resources, cache),
                frame,
                extent,
            };
            node.begin_frame(&mut ctx);
        }
    }

    /// Record the frame: one primary command buffer, every enabled node's
    /// `pre_render -> render -> post_render` in topological order. That
    /// ordering is the entire cross-pass hazard guarantee; the graph
    /// inserts no barriers beyond what nodes request themselves.
    pub fn render(
        &mut self,
        backend: &dyn GpuBackend,
        frame: &FrameContext,
        extent: Extent2d,
    ) -> CommandBufferHandle {
        assert!(self.compiled, "render graph used before init");
        let cmd = backend.command_buffer(frame.frame_index, true);

        let cache = &self.cache;
        let pin_resources = &self.pin_resources;
        let graph = &mut self.graph;
        for &id in &self.order {
            let node = graph.node_mut(id);
            if !node.is_enabled() {
                continue;
            }
            let mut ctx = GraphRenderContext {
                backend,
                resources: ResourceResolver::new(pin_resources, cache),
                frame,
                extent,
                cmd,
            };
            node.pre_render(&mut ctx);
            node.render(&mut ctx);
            node.post_render(&mut ctx);
        }
        cmd
    }

    /// Finish the frame: end hooks, then the unconditional present-layout
    /// transition on the swapchain image as the last GPU command.
    pub fn end_frame(&mut self, backend: &dyn GpuBackend, frame: &FrameContext, extent: Extent2d) {
        assert!(self.compiled, "render graph used before init");

        let cache = &self.cache;
        let pin_resources = &self.pin_resources;
        let graph = &mut self.graph;
        for &id in &self.order {
            let node = graph.node_mut(id);
            if !node.is_enabled() {
                continue;
            }
            let mut ctx = GraphFrameContext {
                backend,
                resources: ResourceResolver::new(pin_resources, cache),
                frame,
                extent,
            };
            node.end_frame(&mut ctx);
        }

        let cmd = backend.command_buffer(frame.frame_index, false);
        match self
            .cache
            .try_get(RESOURCE_SWAPCHAIN)
            .and_then(|r| r.texture_handle())
        {
            Some(image) => backend.transition_to_present(cmd, image),
            None => log::warn!("no swapchain image patched in; present transition skipped"),
        }
    }

    /// Notify every node of a new swapchain extent. Nodes rebuild their
    /// own size-dependent resources; the allocation pass is not re-run.
    pub fn on_swapchain_resized(&mut self, backend: &dyn GpuBackend, extent: Extent2d) {
        let cache = &mut self.cache;
        let graph = &mut self.graph;
        for &id in &self.order {
            let node = graph.node_mut(id);
            let mut ctx = ResizeContext {
                backend,
                cache: &mut *cache,
                extent,
            };
            node.on_swapchain_resized(&mut ctx);
        }
    }

    /// Destroy every graph-owned GPU resource. Handles become invalid
    /// until the next `init`.
    pub fn shutdown(&mut self, backend: &dyn GpuBackend) {
        let ids: Vec<ResourceId> = self.cache.iter().map(|r| r.id).collect();
        for id in ids {
            let entry = self.cache.get_mut(id);
            if entry.is_external() {
                entry.handle = None;
                continue;
            }
            match entry.handle.take() {
                Some(ResourceHandle::Texture(handle)) => backend.destroy_texture(handle),
                Some(ResourceHandle::Buffer(handle)) => backend.destroy_buffer(handle),
                None => {}
            }
        }
        self.compiled = false;
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Back an owned buffer resource with GPU storage.
fn allocate_buffer(backend: &dyn GpuBackend, cache: &mut ResourceCache, id: ResourceId) {
    let entry = cache.get(id);
    if entry.is_external() || entry.handle.is_some() {
        return;
    }
    let Some(info) = entry.info.as_buffer() else {
        return;
    };
    let desc = BufferDescriptor {
        label: Some(format!("graph buffer {:#018x}", id.0)),
        size: info.size,
        usage: info.usage,
    };
    match backend.create_buffer(&desc) {
        Ok(handle) => cache.set_handle(id, Some(ResourceHandle::Buffer(handle))),
        Err(error) => {
            log::warn!("failed to create buffer for resource {id:?}: {error}; output left unbacked")
        }
    }
}

/// Back an owned texture resource, aliasing a dead allocation of identical
/// extent and format when the free list offers one.
fn create_attachment(
    backend: &dyn GpuBackend,
    cache: &mut ResourceCache,
    free_list: &mut Vec<ResourceId>,
    id: ResourceId,
    swapchain_extent: Extent2d,
) {
    let entry = cache.get(id);
    if entry.is_external() || entry.handle.is_some() {
        return;
    }
    let Some(info) = entry.info.as_texture() else {
        return;
    };
    let extent = info.extent.unwrap_or(swapchain_extent);
    let format = info.format;

    let desc = TextureDescriptor {
        label: Some(format!("graph attachment {:#018x}", id.0)),
        extent,
        mip_level_count: 1,
        sample_count: 1,
        format,
        usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
    };

    // A dead resource of identical shape can donate its storage.
    let candidate = free_list.iter().position(|&free_id| {
        let free = cache.get(free_id);
        match (&free.info, free.texture_handle()) {
            (ResourceInfo::Texture(free_info), Some(_)) => {
                free_info.extent.unwrap_or(swapchain_extent) == extent
                    && free_info.format == format
            }
            _ => false,
        }
    });

    if let Some(index) = candidate {
        let source_id = free_list.remove(index);
        let source = cache
            .get(source_id)
            .texture_handle()
            .expect("free-list entry lost its handle");
        match backend.create_texture_alias(source, &desc) {
            Ok(handle) => {
                log::trace!("resource {id:?} aliases storage of {source_id:?}");
                cache.set_handle(id, Some(ResourceHandle::Texture(handle)));
            }
            Err(error) => {
                log::warn!("failed to alias attachment for resource {id:?}: {error}");
            }
        }
        return;
    }

    match backend.create_texture(&desc) {
        Ok(handle) => cache.set_handle(id, Some(ResourceHandle::Texture(handle))),
        Err(error) => log::warn!(
            "failed to create attachment for resource {id:?}: {error}; output left unbacked"
        ),
    }
}
