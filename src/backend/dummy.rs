//! GPU-less backend for tests and headless tools.
//!
//! `DummyBackend` performs no GPU work but keeps full bookkeeping:
//! descriptors of every live resource, which textures alias which storage,
//! a per-frame command journal, and creation counters. Scheduler tests use
//! the counters to verify allocate-vs-alias decisions and the journal to
//! verify command ordering.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::backend::{
    BufferDescriptor, BufferHandle, ClearValue, CommandBufferHandle, Extent2d,
    FramebufferDescriptor, FramebufferHandle, GpuBackend, RenderPassDescriptor, RenderPassHandle,
    ShaderHandle, TextureDescriptor, TextureFormat, TextureHandle,
};
use crate::error::{GraphicsError, GraphicsResult};
use crate::FRAMES_IN_FLIGHT;

/// Creation counters exposed to tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    /// Fresh texture allocations via `create_texture`.
    pub textures_created: usize,
    /// Views bound to existing storage via `create_texture_alias`.
    pub aliases_created: usize,
    pub buffers_created: usize,
    pub submits: usize,
    pub presents: usize,
}

#[derive(Default)]
struct DummyState {
    next_handle: u64,
    textures: HashMap<u64, TextureDescriptor>,
    /// Aliased handle -> the handle owning the underlying storage.
    alias_roots: HashMap<u64, u64>,
    buffers: HashMap<u64, BufferDescriptor>,
    swapchain_extent: Extent2d,
    swapchain_format: TextureFormat,
    swapchain_images: Vec<TextureHandle>,
    acquire_cursor: usize,
    out_of_date: bool,
    fail_next_texture: bool,
    stats: DummyStats,
    journal: Vec<String>,
}

impl DummyState {
    fn fresh_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// Dummy GPU backend.
pub struct DummyBackend {
    state: Mutex<DummyState>,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DummyState::default()),
        }
    }

    /// Snapshot of the creation counters.
    pub fn stats(&self) -> DummyStats {
        self.state.lock().stats
    }

    /// The handle owning the storage behind `texture`: the texture itself
    /// for fresh allocations, the original allocation for aliases.
    pub fn storage_of(&self, texture: TextureHandle) -> TextureHandle {
        let state = self.state.lock();
        let mut handle = texture.0;
        while let Some(&root) = state.alias_roots.get(&handle) {
            handle = root;
        }
        TextureHandle(handle)
    }

    /// Descriptor of a live texture.
    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<TextureDescriptor> {
        self.state.lock().textures.get(&texture.0).cloned()
    }

    /// Number of live textures (fresh and aliased views).
    pub fn live_texture_count(&self) -> usize {
        self.state.lock().textures.len()
    }

    /// Simulate the surface going stale; the next acquire fails until the
    /// swapchain is reconfigured.
    pub fn set_out_of_date(&self) {
        self.state.lock().out_of_date = true;
    }

    /// Make the next `create_texture` call fail, for degraded-path tests.
    pub fn fail_next_texture_creation(&self) {
        self.state.lock().fail_next_texture = true;
    }

    /// Drain the recorded command journal.
    pub fn take_journal(&self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().journal)
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> GraphicsResult<TextureHandle> {
        let mut state = self.state.lock();
        if state.fail_next_texture {
            state.fail_next_texture = false;
            return Err(GraphicsError::TextureCreationFailed(
                "creation failure injected".into(),
            ));
        }
        let handle = state.fresh_handle();
        log::trace!(
            "dummy: create texture {:?} {}x{} {:?}",
            desc.label,
            desc.extent.width,
            desc.extent.height,
            desc.format
        );
        state.textures.insert(handle, desc.clone());
        state.stats.textures_created += 1;
        Ok(TextureHandle(handle))
    }

    fn create_texture_alias(
        &self,
        source: TextureHandle,
        desc: &TextureDescriptor,
    ) -> GraphicsResult<TextureHandle> {
        let mut state = self.state.lock();
        let Some(source_desc) = state.textures.get(&source.0).cloned() else {
            return Err(GraphicsError::TextureCreationFailed(format!(
                "alias source {source:?} is not a live texture"
            )));
        };
        assert_eq!(
            (source_desc.extent, source_desc.format),
            (desc.extent, desc.format),
            "alias must match the source allocation's extent and format"
        );

        let handle = state.fresh_handle();
        log::trace!("dummy: alias texture {:?} onto {:?}", desc.label, source);
        state.textures.insert(handle, desc.clone());
        let root = *state.alias_roots.get(&source.0).unwrap_or(&source.0);
        state.alias_roots.insert(handle, root);
        state.stats.aliases_created += 1;
        Ok(TextureHandle(handle))
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let mut state = self.state.lock();
        state.textures.remove(&texture.0);
        state.alias_roots.remove(&texture.0);
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> GraphicsResult<BufferHandle> {
        let mut state = self.state.lock();
        let handle = state.fresh_handle();
        log::trace!("dummy: create buffer {:?} ({} bytes)", desc.label, desc.size);
        state.buffers.insert(handle, desc.clone());
        state.stats.buffers_created += 1;
        Ok(BufferHandle(handle))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.state.lock().buffers.remove(&buffer.0);
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        log::trace!(
            "dummy: write buffer {:?} offset={} len={}",
            buffer,
            offset,
            data.len()
        );
    }

    fn create_shader(&self, label: &str, _source: &str) -> GraphicsResult<ShaderHandle> {
        let mut state = self.state.lock();
        let handle = state.fresh_handle();
        log::trace!("dummy: create shader '{label}'");
        Ok(ShaderHandle(handle))
    }

    fn destroy_shader(&self, _shader: ShaderHandle) {}

    fn create_render_pass(&self, desc: &RenderPassDescriptor) -> GraphicsResult<RenderPassHandle> {
        let mut state = self.state.lock();
        let handle = state.fresh_handle();
        log::trace!(
            "dummy: create render pass {:?} ({} color, depth: {})",
            desc.label,
            desc.color_attachments.len(),
            desc.depth_attachment.is_some()
        );
        Ok(RenderPassHandle(handle))
    }

    fn destroy_render_pass(&self, _pass: RenderPassHandle) {}

    fn create_framebuffer(
        &self,
        desc: &FramebufferDescriptor,
    ) -> GraphicsResult<FramebufferHandle> {
        let mut state = self.state.lock();
        let handle = state.fresh_handle();
        log::trace!(
            "dummy: create framebuffer {:?} ({} attachments)",
            desc.label,
            desc.attachments.len()
        );
        Ok(FramebufferHandle(handle))
    }

    fn destroy_framebuffer(&self, _framebuffer: FramebufferHandle) {}

    fn configure_swapchain(&self, extent: Extent2d, format: TextureFormat) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        for image in std::mem::take(&mut state.swapchain_images) {
            state.textures.remove(&image.0);
        }
        state.swapchain_extent = extent;
        state.swapchain_format = format;
        state.swapchain_images = (0..FRAMES_IN_FLIGHT)
            .map(|i| {
                let handle = state.fresh_handle();
                state.textures.insert(
                    handle,
                    TextureDescriptor::new_2d(
                        extent.width,
                        extent.height,
                        format,
                        crate::backend::TextureUsage::RENDER_ATTACHMENT,
                    )
                    .with_label(format!("swapchain image {i}")),
                );
                TextureHandle(handle)
            })
            .collect();
        state.acquire_cursor = 0;
        state.out_of_date = false;
        log::debug!(
            "dummy: swapchain configured {}x{} {:?}",
            extent.width,
            extent.height,
            format
        );
        Ok(())
    }

    fn acquire_swapchain_image(&self) -> GraphicsResult<TextureHandle> {
        let mut state = self.state.lock();
        if state.out_of_date {
            return Err(GraphicsError::SwapchainOutOfDate);
        }
        if state.swapchain_images.is_empty() {
            return Err(GraphicsError::SurfaceLost);
        }
        let image = state.swapchain_images[state.acquire_cursor];
        state.acquire_cursor = (state.acquire_cursor + 1) % state.swapchain_images.len();
        Ok(image)
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.state.lock().swapchain_format
    }

    fn command_buffer(&self, frame_index: usize, begin: bool) -> CommandBufferHandle {
        let mut state = self.state.lock();
        if begin {
            state.journal.push(format!("begin cmd[{frame_index}]"));
        }
        CommandBufferHandle(frame_index as u64 + 1)
    }

    fn begin_render_pass(
        &self,
        _cmd: CommandBufferHandle,
        pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        _clear_values: &[ClearValue],
    ) {
        self.state
            .lock()
            .journal
            .push(format!("begin_render_pass {} fb {}", pass.0, framebuffer.0));
    }

    fn end_render_pass(&self, _cmd: CommandBufferHandle) {
        self.state.lock().journal.push("end_render_pass".into());
    }

    fn bind_shader(&self, _cmd: CommandBufferHandle, shader: ShaderHandle) {
        self.state
            .lock()
            .journal
            .push(format!("bind_shader {}", shader.0));
    }

    fn bind_texture(&self, _cmd: CommandBufferHandle, slot: u32, texture: TextureHandle) {
        self.state
            .lock()
            .journal
            .push(format!("bind_texture slot {} -> {}", slot, texture.0));
    }

    fn bind_buffer(&self, _cmd: CommandBufferHandle, slot: u32, buffer: BufferHandle) {
        self.state
            .lock()
            .journal
            .push(format!("bind_buffer slot {} -> {}", slot, buffer.0));
    }

    fn draw(&self, _cmd: CommandBufferHandle, vertex_count: u32, instance_count: u32) {
        self.state
            .lock()
            .journal
            .push(format!("draw {vertex_count}x{instance_count}"));
    }

    fn dispatch(&self, _cmd: CommandBufferHandle, x: u32, y: u32, z: u32) {
        self.state
            .lock()
            .journal
            .push(format!("dispatch {x}x{y}x{z}"));
    }

    fn transition_to_present(&self, _cmd: CommandBufferHandle, texture: TextureHandle) {
        self.state
            .lock()
            .journal
            .push(format!("transition_to_present {}", texture.0));
    }

    fn submit(&self, cmd: CommandBufferHandle) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        state.journal.push(format!("submit cmd[{}]", cmd.0 - 1));
        state.stats.submits += 1;
        Ok(())
    }

    fn present(&self, image: TextureHandle) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        state.journal.push(format!("present {}", image.0));
        state.stats.presents += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TextureUsage;

    fn attachment_desc() -> TextureDescriptor {
        TextureDescriptor::new_2d(
            512,
            512,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT,
        )
    }

    #[test]
    fn test_alias_shares_storage() {
        let backend = DummyBackend::new();
        let original = backend.create_texture(&attachment_desc()).unwrap();
        let alias = backend
            .create_texture_alias(original, &attachment_desc())
            .unwrap();
        let alias_of_alias = backend
            .create_texture_alias(alias, &attachment_desc())
            .unwrap();

        assert_ne!(original, alias);
        assert_eq!(backend.storage_of(alias), original);
        assert_eq!(backend.storage_of(alias_of_alias), original);
        assert_eq!(backend.storage_of(original), original);

        let stats = backend.stats();
        assert_eq!(stats.textures_created, 1);
        assert_eq!(stats.aliases_created, 2);
    }

    #[test]
    #[should_panic(expected = "alias must match")]
    fn test_alias_mismatch_panics() {
        let backend = DummyBackend::new();
        let original = backend.create_texture(&attachment_desc()).unwrap();
        let mut other = attachment_desc();
        other.extent = Extent2d::new(256, 256);
        let _ = backend.create_texture_alias(original, &other);
    }

    #[test]
    fn test_swapchain_acquire_rotates() {
        let backend = DummyBackend::new();
        backend
            .configure_swapchain(Extent2d::new(1280, 720), TextureFormat::Bgra8Unorm)
            .unwrap();

        let first = backend.acquire_swapchain_image().unwrap();
        let second = backend.acquire_swapchain_image().unwrap();
        let third = backend.acquire_swapchain_image().unwrap();
        let wrapped = backend.acquire_swapchain_image().unwrap();

        assert_ne!(first, second);
        assert_ne!(second, third);
        assert_eq!(first, wrapped);
    }

    #[test]
    fn test_out_of_date_until_reconfigured() {
        let backend = DummyBackend::new();
        backend
            .configure_swapchain(Extent2d::new(1280, 720), TextureFormat::Bgra8Unorm)
            .unwrap();
        backend.set_out_of_date();

        assert_eq!(
            backend.acquire_swapchain_image(),
            Err(GraphicsError::SwapchainOutOfDate)
        );

        backend
            .configure_swapchain(Extent2d::new(1920, 1080), TextureFormat::Bgra8Unorm)
            .unwrap();
        assert!(backend.acquire_swapchain_image().is_ok());
    }

    #[test]
    fn test_injected_texture_failure_is_one_shot() {
        let backend = DummyBackend::new();
        backend.fail_next_texture_creation();
        assert!(backend.create_texture(&attachment_desc()).is_err());
        assert!(backend.create_texture(&attachment_desc()).is_ok());
    }
}
