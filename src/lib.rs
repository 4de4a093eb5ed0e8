//! Ember Engine - a render graph-based real-time engine core.
//!
//! The engine schedules GPU work through a data-driven render graph:
//! passes are nodes with typed pins, pin connections become dependency
//! edges in a DAG, and compilation produces a topological execution order
//! plus a fully allocated set of transient GPU resources with memory
//! aliasing derived from a liveness analysis.
//!
//! # Layers
//!
//! - [`dag`] - generic acyclic graph container (cycle rejection,
//!   topological sort, transitive reduction)
//! - [`node_graph`] - typed node/pin layer with JSON persistence and a
//!   node-type factory
//! - [`render_graph`] - the frame scheduler: compile-time allocation and
//!   aliasing, per-frame `begin/render/end` execution
//! - [`backend`] - GPU abstraction trait plus the GPU-less dummy backend
//! - [`api`] - host frame state: swapchain, frame ring, present thread
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ember_engine::api::GraphicsApi;
//! use ember_engine::backend::{DummyBackend, Extent2d, TextureFormat};
//! use ember_engine::node_graph::GraphNode;
//! use ember_engine::render_graph::{FixedFunction, FixedShaderNode, RenderGraph, ShaderNode};
//!
//! let backend = Arc::new(DummyBackend::new());
//! let mut api = GraphicsApi::new(
//!     backend.clone(),
//!     Extent2d::new(1280, 720),
//!     TextureFormat::Bgra8UnormSrgb,
//! )
//! .unwrap();
//!
//! let mut graph = RenderGraph::new();
//! let scene = graph.add_node(Box::new(ShaderNode::new("scene")));
//! let blit = graph.add_node(Box::new(
//!     FixedShaderNode::new("present", FixedFunction::Blit).with_target_name("swapchain"),
//! ));
//! let scene_out = graph.node(scene).output_pin(0).id();
//! let blit_in = graph.node(blit).input_pin(0).id();
//! graph.connect(scene_out, blit_in);
//!
//! graph
//!     .init(api.backend(), api.swapchain_extent(), api.swapchain_format())
//!     .unwrap();
//! api.render_graph_frame(&mut graph).unwrap();
//! ```

pub mod api;
pub mod backend;
pub mod dag;
pub mod error;
mod hash;
pub mod node_graph;
pub mod render_graph;

pub use api::{FrameContext, GraphicsApi, ViewConstants};
pub use backend::{DummyBackend, GpuBackend};
pub use error::{GraphicsError, GraphicsResult};
pub use render_graph::{RenderGraph, RenderGraphNode};

/// Number of frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 3;

/// Engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration for bringing up the graphics api.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Initial surface width.
    pub width: u32,
    /// Initial surface height.
    pub height: u32,
    /// Swapchain surface format.
    pub swapchain_format: backend::TextureFormat,
    /// Enable vsync on backends that support toggling it.
    pub vsync: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            swapchain_format: backend::TextureFormat::Bgra8UnormSrgb,
            vsync: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);
        assert!(config.vsync);
    }
}
