//! The render graph node interface.
//!
//! One node is one rendering or compute pass. Nodes are [`GraphNode`]s
//! (typed pins, JSON persistence) extended with the per-frame hooks the
//! graph drives in topological order, plus a declaration of what each
//! output pin produces.

use std::collections::HashMap;

use crate::api::FrameContext;
use crate::backend::{CommandBufferHandle, Extent2d, GpuBackend, TextureFormat, TextureHandle};
use crate::error::GraphicsResult;
use crate::node_graph::{GraphNode, LocalPinId, Pin, PinId, PinTypeId};
use crate::render_graph::cache::ResourceCache;
use crate::render_graph::resource::{ResourceId, ResourceInfo};

/// Pin type tag for texture-carrying pins.
pub const PIN_TEXTURE: PinTypeId = PinTypeId(1);
/// Pin type tag for buffer-carrying pins.
pub const PIN_BUFFER: PinTypeId = PinTypeId(2);

/// What an output pin produces: the resource id plus its descriptor.
#[derive(Debug, Clone)]
pub struct ResourceBinding {
    pub id: ResourceId,
    pub info: ResourceInfo,
}

/// Resolves pins to resources and live handles.
///
/// Input pins resolve through their linked upstream pin; output pins
/// resolve directly. Built by the graph during compile and handed to nodes
/// inside every context.
#[derive(Clone, Copy)]
pub struct ResourceResolver<'a> {
    pin_resources: &'a HashMap<PinId, ResourceId>,
    cache: &'a ResourceCache,
}

impl<'a> ResourceResolver<'a> {
    pub(crate) fn new(
        pin_resources: &'a HashMap<PinId, ResourceId>,
        cache: &'a ResourceCache,
    ) -> Self {
        Self {
            pin_resources,
            cache,
        }
    }

    /// Resource behind a pin: the linked upstream resource for inputs, the
    /// pin's own resource for outputs.
    pub fn pin_resource(&self, pin: &Pin) -> Option<ResourceId> {
        let key = match pin.direction() {
            crate::node_graph::PinDirection::Input => pin.linked_pin()?,
            crate::node_graph::PinDirection::Output => pin.id(),
        };
        self.pin_resources.get(&key).copied()
    }

    /// Live texture handle behind a pin, if allocated.
    pub fn pin_texture(&self, pin: &Pin) -> Option<TextureHandle> {
        self.cache
            .try_get(self.pin_resource(pin)?)?
            .texture_handle()
    }

    /// Direct cache access for named resources.
    pub fn cache(&self) -> &ResourceCache {
        self.cache
    }
}

/// Context for the compile hook: resources are allocated, build your
/// render pass / framebuffer / pipeline objects here.
pub struct CompileContext<'a> {
    pub backend: &'a dyn GpuBackend,
    pub resources: ResourceResolver<'a>,
    pub swapchain_extent: Extent2d,
    pub swapchain_format: TextureFormat,
}

/// Context for the begin/end-of-frame hooks (no command buffer yet).
pub struct GraphFrameContext<'a> {
    pub backend: &'a dyn GpuBackend,
    pub resources: ResourceResolver<'a>,
    pub frame: &'a FrameContext,
    pub extent: Extent2d,
}

/// Context for the render hooks, all recording into the same primary
/// command buffer for the frame.
pub struct GraphRenderContext<'a> {
    pub backend: &'a dyn GpuBackend,
    pub resources: ResourceResolver<'a>,
    pub frame: &'a FrameContext,
    pub extent: Extent2d,
    pub cmd: CommandBufferHandle,
}

/// Context for swapchain-resize notification. Nodes recreate their own
/// size-dependent attachments and patch the cache; the graph does not
/// re-run its allocation pass.
pub struct ResizeContext<'a> {
    pub backend: &'a dyn GpuBackend,
    pub cache: &'a mut ResourceCache,
    pub extent: Extent2d,
}

/// One rendering/compute pass in the graph.
///
/// The graph invokes the hooks below in topological order; a node
/// reporting [`is_enabled`](Self::is_enabled) `false` is skipped in every
/// frame phase without being removed from the graph (the mechanism for
/// toggling optional passes such as debug overlays).
pub trait RenderGraphNode: GraphNode {
    /// Declare the resource produced by the output pin with the given
    /// local id, or `None` if that pin produces nothing.
    fn output_binding(&self, local_id: LocalPinId) -> Option<ResourceBinding>;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Build API objects once resources are resolved. Failures degrade the
    /// node (logged by the graph), they do not abort graph compilation.
    fn compile(&mut self, _ctx: &mut CompileContext) -> GraphicsResult<()> {
        Ok(())
    }

    fn begin_frame(&mut self, _ctx: &mut GraphFrameContext) {}

    fn pre_render(&mut self, _ctx: &mut GraphRenderContext) {}

    fn render(&mut self, _ctx: &mut GraphRenderContext) {}

    fn post_render(&mut self, _ctx: &mut GraphRenderContext) {}

    fn end_frame(&mut self, _ctx: &mut GraphFrameContext) {}

    fn on_swapchain_resized(&mut self, _ctx: &mut ResizeContext) {}
}
