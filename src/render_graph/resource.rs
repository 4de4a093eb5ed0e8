//! Render graph resources.
//!
//! A resource is the unit of data flowing between passes: a texture that
//! one pass renders and another samples, or a buffer produced by a compute
//! pass. Resources are identified by a stable hash of their name, so saved
//! graphs and host code agree on ids across runs.
//!
//! Three reserved names are injected by the host frame rather than
//! allocated by the graph: the acquired swapchain image, the depth image,
//! and the per-frame view-constants buffer.

use crate::backend::{
    BufferHandle, BufferUsage, ClearValue, Extent2d, LoadOp, TextureFormat, TextureHandle,
};
use crate::hash::fnv1a_64;
use crate::node_graph::PinId;

/// Stable identifier of a render graph resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl ResourceId {
    /// Hash a resource name into its id. Stable across runs.
    pub const fn from_name(name: &str) -> Self {
        Self(fnv1a_64(name.as_bytes()))
    }

    /// Id for an anonymous resource owned by an output pin.
    pub(crate) fn from_pin(pin: PinId) -> Self {
        Self(fnv1a_64(&pin.0.to_le_bytes()))
    }

    /// Whether this is one of the host-injected reserved resources.
    pub fn is_reserved(self) -> bool {
        self == RESOURCE_SWAPCHAIN || self == RESOURCE_DEPTH || self == RESOURCE_VIEW_CONSTANTS
    }
}

/// The acquired swapchain image, patched in every frame.
pub const RESOURCE_SWAPCHAIN: ResourceId = ResourceId::from_name("swapchain");
/// The host-owned depth image.
pub const RESOURCE_DEPTH: ResourceId = ResourceId::from_name("depth");
/// The per-frame view-constants uniform buffer.
pub const RESOURCE_VIEW_CONSTANTS: ResourceId = ResourceId::from_name("u_viewconstants");

/// How the graph treats a texture resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Owned by the graph and rendered into; eligible for aliasing.
    Attachment,
    /// Owned by the graph, sampled only; eligible for aliasing.
    Texture,
    /// Injected by the host frame; never allocated or freed by the graph.
    Reference,
}

/// Descriptor for a texture resource.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureResourceInfo {
    pub kind: ResourceKind,
    /// `None` means "match the swapchain extent at compile time".
    pub extent: Option<Extent2d>,
    pub format: TextureFormat,
    pub load_op: LoadOp,
    pub clear: ClearValue,
}

impl TextureResourceInfo {
    /// A graph-owned color attachment.
    pub fn attachment(format: TextureFormat) -> Self {
        Self {
            kind: ResourceKind::Attachment,
            extent: None,
            format,
            load_op: LoadOp::Clear,
            clear: ClearValue::Color([0.0, 0.0, 0.0, 1.0]),
        }
    }

    /// A host-injected external texture.
    pub fn reference(format: TextureFormat) -> Self {
        Self {
            kind: ResourceKind::Reference,
            extent: None,
            format,
            load_op: LoadOp::Load,
            clear: ClearValue::None,
        }
    }

    pub fn with_extent(mut self, extent: Extent2d) -> Self {
        self.extent = Some(extent);
        self
    }

    pub fn with_load_op(mut self, load_op: LoadOp) -> Self {
        self.load_op = load_op;
        self
    }
}

/// Descriptor for a buffer resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferResourceInfo {
    pub size: u64,
    pub usage: BufferUsage,
    /// Host-owned buffers (e.g. view constants) are never allocated here.
    pub external: bool,
}

/// Descriptor variant stored per resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceInfo {
    Texture(TextureResourceInfo),
    Buffer(BufferResourceInfo),
}

impl ResourceInfo {
    /// Whether the host, not the graph, owns the backing storage.
    pub fn is_external(&self) -> bool {
        match self {
            Self::Texture(info) => info.kind == ResourceKind::Reference,
            Self::Buffer(info) => info.external,
        }
    }

    pub fn as_texture(&self) -> Option<&TextureResourceInfo> {
        match self {
            Self::Texture(info) => Some(info),
            Self::Buffer(_) => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&BufferResourceInfo> {
        match self {
            Self::Buffer(info) => Some(info),
            Self::Texture(_) => None,
        }
    }
}

/// Live GPU handle variant behind a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceHandle {
    Texture(TextureHandle),
    Buffer(BufferHandle),
}

impl ResourceHandle {
    pub fn texture(self) -> Option<TextureHandle> {
        match self {
            Self::Texture(handle) => Some(handle),
            Self::Buffer(_) => None,
        }
    }

    pub fn buffer(self) -> Option<BufferHandle> {
        match self {
            Self::Buffer(handle) => Some(handle),
            Self::Texture(_) => None,
        }
    }
}

/// One entry of the resource cache: descriptor, live handle, and the
/// compile-time liveness counter.
#[derive(Debug, Clone)]
pub struct RenderGraphResource {
    pub id: ResourceId,
    pub info: ResourceInfo,
    /// Valid between graph init and shutdown for owned resources; patched
    /// per frame for externals.
    pub handle: Option<ResourceHandle>,
    pub(crate) ref_count: u32,
}

impl RenderGraphResource {
    pub fn new(id: ResourceId, info: ResourceInfo) -> Self {
        Self {
            id,
            info,
            handle: None,
            ref_count: 0,
        }
    }

    pub fn is_external(&self) -> bool {
        self.info.is_external()
    }

    pub fn texture_handle(&self) -> Option<TextureHandle> {
        self.handle.and_then(ResourceHandle::texture)
    }

    pub fn buffer_handle(&self) -> Option<BufferHandle> {
        self.handle.and_then(ResourceHandle::buffer)
    }

    /// Remaining downstream consumers during the compile liveness pass.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_ids_are_name_hashes() {
        assert_eq!(RESOURCE_SWAPCHAIN, ResourceId::from_name("swapchain"));
        assert_eq!(RESOURCE_DEPTH, ResourceId::from_name("depth"));
        assert_eq!(
            RESOURCE_VIEW_CONSTANTS,
            ResourceId::from_name("u_viewconstants")
        );
        assert!(RESOURCE_SWAPCHAIN.is_reserved());
        assert!(!ResourceId::from_name("gbuffer").is_reserved());
    }

    #[test]
    fn test_pin_derived_ids_are_distinct() {
        assert_ne!(
            ResourceId::from_pin(PinId(1)),
            ResourceId::from_pin(PinId(2))
        );
    }

    #[test]
    fn test_externality() {
        let reference = ResourceInfo::Texture(TextureResourceInfo::reference(
            TextureFormat::Bgra8Unorm,
        ));
        assert!(reference.is_external());

        let attachment =
            ResourceInfo::Texture(TextureResourceInfo::attachment(TextureFormat::Rgba8Unorm));
        assert!(!attachment.is_external());

        let constants = ResourceInfo::Buffer(BufferResourceInfo {
            size: 256,
            usage: BufferUsage::UNIFORM,
            external: true,
        });
        assert!(constants.is_external());
    }
}
