//! Engine error types.

use thiserror::Error;

/// Errors surfaced by the graphics and render-graph layers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    #[error("failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("failed to create render pass: {0}")]
    RenderPassCreationFailed(String),
    #[error("failed to create framebuffer: {0}")]
    FramebufferCreationFailed(String),
    #[error("swapchain is out of date")]
    SwapchainOutOfDate,
    #[error("surface lost")]
    SurfaceLost,
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("GPU device lost")]
    DeviceLost,
    #[error("render graph contains a cycle")]
    CyclicGraph,
    #[error("graph deserialization failed: {0}")]
    DeserializationFailed(String),
    #[error("present failed: {0}")]
    PresentFailed(String),
}

pub type GraphicsResult<T> = Result<T, GraphicsError>;
