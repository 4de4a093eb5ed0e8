//! Graphics api: the host side of the render graph.
//!
//! [`GraphicsApi`] owns what the graph treats as external: the swapchain
//! and depth images, the per-slot view-constants buffers, the frame ring,
//! and the present thread. One logical frame-submission thread drives
//! frames synchronously:
//!
//! ```text
//! loop {
//!     api.begin_frame()          // acquire image, bump counters; false
//!                                //   when minimized or swapchain stale
//!     graph.begin_frame(..)      // patch externals, node hooks
//!     graph.render(..)           // record one command buffer
//!     graph.end_frame(..)        // node hooks + present transition
//!     api.end_frame()            // submit, queue present, advance ring
//! }
//! ```
//!
//! GPU execution overlaps across the [`FRAMES_IN_FLIGHT`] ring; the graph
//! itself is a singleton, so every resource it reads across two in-flight
//! frames is multi-buffered *here* (one view-constants buffer per slot),
//! never inside the graph.

mod frame;
mod present;

pub use frame::{FrameContext, ViewConstants};
pub use present::{PresentRequest, PresentThread};

use std::sync::Arc;

use crate::backend::{
    BufferDescriptor, BufferHandle, BufferUsage, CommandBufferHandle, Extent2d, GpuBackend,
    TextureDescriptor, TextureFormat, TextureHandle, TextureUsage,
};
use crate::error::{GraphicsError, GraphicsResult};
use crate::render_graph::{RenderGraph, ResourceHandle, RESOURCE_VIEW_CONSTANTS};
use crate::{EngineConfig, FRAMES_IN_FLIGHT};

/// Owner of the device-facing frame state. See the module docs.
pub struct GraphicsApi {
    backend: Arc<dyn GpuBackend>,
    frames: Vec<FrameContext>,
    frame_index: usize,
    absolute_frame: u64,
    swapchain_extent: Extent2d,
    swapchain_format: TextureFormat,
    depth_image: TextureHandle,
    /// One uniform buffer per frame slot; the graph sees the current one
    /// through the reserved view-constants resource.
    view_constants_buffers: Vec<BufferHandle>,
    acquired_image: Option<TextureHandle>,
    present: PresentThread,
}

impl GraphicsApi {
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        extent: Extent2d,
        format: TextureFormat,
    ) -> GraphicsResult<Self> {
        backend.configure_swapchain(extent, format)?;
        let depth_image = create_depth_image(backend.as_ref(), extent)?;

        let view_constants_buffers = (0..FRAMES_IN_FLIGHT)
            .map(|i| {
                backend.create_buffer(
                    &BufferDescriptor::new(
                        std::mem::size_of::<ViewConstants>() as u64,
                        BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                    )
                    .with_label(format!("view constants {i}")),
                )
            })
            .collect::<GraphicsResult<Vec<_>>>()?;

        let present = PresentThread::spawn(backend.clone());

        log::info!(
            "graphics api ready: backend '{}', {}x{} {:?}, {} frames in flight",
            backend.name(),
            extent.width,
            extent.height,
            format,
            FRAMES_IN_FLIGHT
        );

        Ok(Self {
            backend,
            frames: (0..FRAMES_IN_FLIGHT).map(FrameContext::new).collect(),
            frame_index: 0,
            absolute_frame: 0,
            swapchain_extent: extent,
            swapchain_format: format,
            depth_image,
            view_constants_buffers,
            acquired_image: None,
            present,
        })
    }

    pub fn from_config(backend: Arc<dyn GpuBackend>, config: &EngineConfig) -> GraphicsResult<Self> {
        Self::new(
            backend,
            Extent2d::new(config.width, config.height),
            config.swapchain_format,
        )
    }

    pub fn backend(&self) -> &dyn GpuBackend {
        self.backend.as_ref()
    }

    /// Start a frame: acquire the swapchain image, bump counters, upload
    /// this slot's view constants.
    ///
    /// Returns `false` when the surface is minimized or the swapchain is
    /// stale; the caller skips rendering for this tick and (for staleness)
    /// calls [`resize`](Self::resize).
    pub fn begin_frame(&mut self) -> bool {
        if self.swapchain_extent.is_zero() {
            log::trace!("surface minimized; frame skipped");
            return false;
        }
        match self.backend.acquire_swapchain_image() {
            Ok(image) => self.acquired_image = Some(image),
            Err(GraphicsError::SwapchainOutOfDate) | Err(GraphicsError::SurfaceLost) => {
                log::debug!("swapchain stale; frame skipped until resize");
                return false;
            }
            Err(error) => {
                log::warn!("failed to acquire swapchain image: {error}");
                return false;
            }
        }

        self.absolute_frame += 1;
        let frame = &mut self.frames[self.frame_index];
        frame.absolute_frame = self.absolute_frame;

        let buffer = self.view_constants_buffers[self.frame_index];
        self.backend.write_buffer(
            buffer,
            0,
            bytemuck::bytes_of(&self.frames[self.frame_index].view_constants),
        );
        true
    }

    /// The frame context of the current slot.
    pub fn current_frame(&self) -> &FrameContext {
        &self.frames[self.frame_index]
    }

    /// Mutable access, e.g. to update view constants before `begin_frame`.
    pub fn current_frame_mut(&mut self) -> &mut FrameContext {
        &mut self.frames[self.frame_index]
    }

    /// The swapchain image acquired by `begin_frame`.
    ///
    /// # Panics
    ///
    /// Panics outside a `begin_frame`/`end_frame` pair.
    pub fn acquired_swapchain_image(&self) -> TextureHandle {
        self.acquired_image
            .expect("no frame in progress; call begin_frame first")
    }

    pub fn depth_image(&self) -> TextureHandle {
        self.depth_image
    }

    pub fn swapchain_extent(&self) -> Extent2d {
        self.swapchain_extent
    }

    pub fn swapchain_format(&self) -> TextureFormat {
        self.swapchain_format
    }

    /// This slot's view-constants buffer.
    pub fn view_constants_buffer(&self) -> BufferHandle {
        self.view_constants_buffers[self.frame_index]
    }

    /// Record one compute submission on the current frame's counter.
    pub fn advance_compute_frame(&mut self) {
        self.frames[self.frame_index].compute_frame += 1;
    }

    /// The primary command buffer of the current slot.
    pub fn command_buffer(&self, begin: bool) -> CommandBufferHandle {
        self.backend.command_buffer(self.frame_index, begin)
    }

    /// Finish the frame: submit the command buffer, hand the image to the
    /// present thread, advance the ring.
    pub fn end_frame(&mut self) -> GraphicsResult<()> {
        let image = self
            .acquired_image
            .take()
            .expect("end_frame without begin_frame");
        let cmd = self.backend.command_buffer(self.frame_index, false);
        self.backend.submit(cmd)?;
        self.present.enqueue(PresentRequest {
            frame_index: self.frame_index,
            image,
        });
        self.frame_index = (self.frame_index + 1) % FRAMES_IN_FLIGHT;
        Ok(())
    }

    /// Drive one complete frame of the given graph. Returns `Ok(false)`
    /// when the frame was skipped (minimized or stale swapchain).
    pub fn render_graph_frame(&mut self, graph: &mut RenderGraph) -> GraphicsResult<bool> {
        if !self.begin_frame() {
            return Ok(false);
        }
        graph.set_external_handle(
            RESOURCE_VIEW_CONSTANTS,
            ResourceHandle::Buffer(self.view_constants_buffer()),
        );

        let frame = self.frames[self.frame_index].clone();
        let extent = self.swapchain_extent;
        let backend = self.backend.as_ref();
        graph.begin_frame(
            backend,
            &frame,
            self.acquired_swapchain_image(),
            self.depth_image,
            extent,
        );
        graph.render(backend, &frame, extent);
        graph.end_frame(backend, &frame, extent);

        self.end_frame()?;
        Ok(true)
    }

    /// Rebuild the swapchain and dependent images at a new extent and
    /// notify the graph. A zero extent records the minimized state and
    /// defers the rebuild until a real size arrives.
    pub fn resize(&mut self, graph: &mut RenderGraph, extent: Extent2d) -> GraphicsResult<()> {
        self.swapchain_extent = extent;
        if extent.is_zero() {
            return Ok(());
        }
        self.backend
            .configure_swapchain(extent, self.swapchain_format)?;
        self.backend.destroy_texture(self.depth_image);
        self.depth_image = create_depth_image(self.backend.as_ref(), extent)?;
        graph.on_swapchain_resized(self.backend.as_ref(), extent);
        log::info!("swapchain resized to {}x{}", extent.width, extent.height);
        Ok(())
    }
}

impl Drop for GraphicsApi {
    fn drop(&mut self) {
        // Drain and join the present thread before destroying anything it
        // may still touch.
        self.present.shutdown();
        for buffer in self.view_constants_buffers.drain(..) {
            self.backend.destroy_buffer(buffer);
        }
        self.backend.destroy_texture(self.depth_image);
    }
}

fn create_depth_image(backend: &dyn GpuBackend, extent: Extent2d) -> GraphicsResult<TextureHandle> {
    backend.create_texture(
        &TextureDescriptor::new_2d(
            extent.width,
            extent.height,
            TextureFormat::Depth32Float,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        )
        .with_label("depth"),
    )
}
