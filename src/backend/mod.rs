//! GPU backend abstraction.
//!
//! The engine core records frames against the [`GpuBackend`] trait; a
//! backend translates those calls into a concrete graphics API. The crate
//! ships [`DummyBackend`], a GPU-less implementation used by tests and
//! headless tools; real swapchain-owning backends plug in behind the same
//! trait.
//!
//! Handles are plain 64-bit ids. They are `Copy`, hashable, and only
//! meaningful to the backend that issued them; GPU memory lifetime is
//! owned by the backend (the resource cache above only indexes into it).

pub mod dummy;
mod types;

pub use dummy::{DummyBackend, DummyStats};
pub use types::{
    BufferDescriptor, BufferUsage, ClearValue, Extent2d, LoadOp, TextureDescriptor, TextureFormat,
    TextureUsage,
};

use crate::error::GraphicsResult;

/// Handle to a GPU texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a compiled shader module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub(crate) u64);

/// Handle to a render pass object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPassHandle(pub(crate) u64);

/// Handle to a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(pub(crate) u64);

/// Handle to a primary command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandBufferHandle(pub(crate) u64);

/// One attachment slot of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassAttachment {
    pub format: TextureFormat,
    pub load_op: LoadOp,
}

/// Descriptor for creating a render pass object.
#[derive(Debug, Clone, Default)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<RenderPassAttachment>,
    pub depth_attachment: Option<RenderPassAttachment>,
}

/// Descriptor for creating a framebuffer over concrete attachments.
#[derive(Debug, Clone)]
pub struct FramebufferDescriptor {
    pub label: Option<String>,
    pub render_pass: RenderPassHandle,
    pub attachments: Vec<TextureHandle>,
    pub extent: Extent2d,
}

/// Graphics backend interface.
///
/// All methods take `&self`: implementations guard their internal state so
/// resource creation may be called from loader threads concurrently with
/// the render thread.
pub trait GpuBackend: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &'static str;

    // Resources

    fn create_texture(&self, desc: &TextureDescriptor) -> GraphicsResult<TextureHandle>;

    /// Create a texture view bound to the same underlying storage as
    /// `source`. This is the aliasing primitive the render graph uses to
    /// reuse memory of resources whose live ranges do not overlap; the
    /// descriptor's extent and format must match the source allocation.
    fn create_texture_alias(
        &self,
        source: TextureHandle,
        desc: &TextureDescriptor,
    ) -> GraphicsResult<TextureHandle>;

    fn destroy_texture(&self, texture: TextureHandle);

    fn create_buffer(&self, desc: &BufferDescriptor) -> GraphicsResult<BufferHandle>;

    fn destroy_buffer(&self, buffer: BufferHandle);

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]);

    fn create_shader(&self, label: &str, source: &str) -> GraphicsResult<ShaderHandle>;

    fn destroy_shader(&self, shader: ShaderHandle);

    fn create_render_pass(&self, desc: &RenderPassDescriptor) -> GraphicsResult<RenderPassHandle>;

    fn destroy_render_pass(&self, pass: RenderPassHandle);

    fn create_framebuffer(&self, desc: &FramebufferDescriptor) -> GraphicsResult<FramebufferHandle>;

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);

    // Swapchain

    /// (Re)build the swapchain at the given size. Clears any out-of-date
    /// condition.
    fn configure_swapchain(&self, extent: Extent2d, format: TextureFormat) -> GraphicsResult<()>;

    /// Acquire the next swapchain image.
    ///
    /// Fails with [`GraphicsError::SwapchainOutOfDate`] when the surface
    /// has changed underneath the swapchain; the caller is expected to
    /// reconfigure and skip the frame.
    ///
    /// [`GraphicsError::SwapchainOutOfDate`]: crate::error::GraphicsError::SwapchainOutOfDate
    fn acquire_swapchain_image(&self) -> GraphicsResult<TextureHandle>;

    fn swapchain_format(&self) -> TextureFormat;

    // Command recording

    /// The primary command buffer for a frame slot. With `begin` the
    /// buffer is reset and opened for recording.
    fn command_buffer(&self, frame_index: usize, begin: bool) -> CommandBufferHandle;

    fn begin_render_pass(
        &self,
        cmd: CommandBufferHandle,
        pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        clear_values: &[ClearValue],
    );

    fn end_render_pass(&self, cmd: CommandBufferHandle);

    fn bind_shader(&self, cmd: CommandBufferHandle, shader: ShaderHandle);

    fn bind_texture(&self, cmd: CommandBufferHandle, slot: u32, texture: TextureHandle);

    fn bind_buffer(&self, cmd: CommandBufferHandle, slot: u32, buffer: BufferHandle);

    fn draw(&self, cmd: CommandBufferHandle, vertex_count: u32, instance_count: u32);

    fn dispatch(&self, cmd: CommandBufferHandle, x: u32, y: u32, z: u32);

    /// Transition `texture` to the presentable layout. Issued by the render
    /// graph as the last command of every frame.
    fn transition_to_present(&self, cmd: CommandBufferHandle, texture: TextureHandle);

    fn submit(&self, cmd: CommandBufferHandle) -> GraphicsResult<()>;

    /// Present a previously acquired swapchain image. Called from the
    /// present thread, never from the frame-submission thread.
    fn present(&self, image: TextureHandle) -> GraphicsResult<()>;
}
