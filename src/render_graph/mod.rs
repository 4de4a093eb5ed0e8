//! DAG-scheduled rendering.
//!
//! This module is the heart of the engine: a data-driven graph of pass
//! nodes, compiled into a topological execution order with transient GPU
//! resources allocated and aliased from a liveness analysis, then driven
//! through `begin_frame / render / end_frame` every frame.
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Api | [`GraphicsApi`](crate::api::GraphicsApi) | Frames in flight, swapchain, present thread |
//! | **Graph** | [`RenderGraph`] | Pass scheduling + resource lifetime (this module) |
//! | Node | [`ShaderNode`], [`FixedShaderNode`] | Single GPU pass |
//! | Backend | [`GpuBackend`](crate::backend::GpuBackend) | API-specific recording |

mod cache;
mod graph;
mod node;
mod resource;
mod shader_node;

pub use cache::ResourceCache;
pub use graph::RenderGraph;
pub use node::{
    CompileContext, GraphFrameContext, GraphRenderContext, RenderGraphNode, ResizeContext,
    ResourceBinding, ResourceResolver, PIN_BUFFER, PIN_TEXTURE,
};
pub use resource::{
    BufferResourceInfo, RenderGraphResource, ResourceHandle, ResourceId, ResourceInfo,
    ResourceKind, TextureResourceInfo, RESOURCE_DEPTH, RESOURCE_SWAPCHAIN,
    RESOURCE_VIEW_CONSTANTS,
};
pub use shader_node::{
    BlendMode, CullMode, DepthMode, FixedFunction, FixedShaderNode, PipelineState, ShaderNode,
    FIXED_SHADER_NODE_TYPE, SHADER_NODE_TYPE,
};

use crate::node_graph::NodeTypeRegistry;

/// Register the built-in pass node types.
pub fn register_node_types(registry: &mut NodeTypeRegistry<dyn RenderGraphNode>) {
    registry.register(SHADER_NODE_TYPE, "ShaderNode", || {
        Box::new(ShaderNode::new("shader"))
    });
    registry.register(FIXED_SHADER_NODE_TYPE, "FixedShaderNode", || {
        Box::new(FixedShaderNode::new("fixed", FixedFunction::Blit))
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::{Map, Value};

    use super::*;
    use crate::api::FrameContext;
    use crate::backend::{
        DummyBackend, Extent2d, GpuBackend, TextureFormat, TextureHandle,
    };
    use crate::dag::NodeId;
    use crate::error::GraphicsError;
    use crate::node_graph::{GraphNode, LocalPinId, NodeTypeId, Pin};

    type EventLog = Arc<Mutex<Vec<String>>>;

    /// Minimal pass node that records which hooks ran.
    struct TracePass {
        inputs: Vec<Pin>,
        outputs: Vec<Pin>,
        name: String,
        target_name: Option<String>,
        extent: Option<Extent2d>,
        format: TextureFormat,
        enabled: bool,
        events: EventLog,
    }

    impl TracePass {
        fn new(name: &str, input_count: usize, events: &EventLog) -> Self {
            Self {
                inputs: (0..input_count)
                    .map(|i| Pin::input(i as u32, PIN_TEXTURE))
                    .collect(),
                outputs: vec![Pin::output(0, PIN_TEXTURE)],
                name: name.to_string(),
                target_name: None,
                extent: Some(Extent2d::new(512, 512)),
                format: TextureFormat::Rgba8Unorm,
                enabled: true,
                events: events.clone(),
            }
        }

        fn with_target_name(mut self, name: &str) -> Self {
            self.target_name = Some(name.to_string());
            self
        }

        fn with_extent(mut self, extent: Extent2d) -> Self {
            self.extent = Some(extent);
            self
        }

        fn push(&self, phase: &str) {
            self.events.lock().push(format!("{}:{}", self.name, phase));
        }
    }

    impl GraphNode for TracePass {
        fn node_type(&self) -> NodeTypeId {
            NodeTypeId::from_name("TracePass")
        }

        fn type_name(&self) -> &'static str {
            "TracePass"
        }

        fn input_pins(&self) -> &[Pin] {
            &self.inputs
        }

        fn input_pins_mut(&mut self) -> &mut [Pin] {
            &mut self.inputs
        }

        fn output_pins(&self) -> &[Pin] {
            &self.outputs
        }

        fn output_pins_mut(&mut self) -> &mut [Pin] {
            &mut self.outputs
        }

        fn serialize_state(&self, _out: &mut Map<String, Value>) {}

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    impl RenderGraphNode for TracePass {
        fn output_binding(&self, local_id: LocalPinId) -> Option<ResourceBinding> {
            if local_id != LocalPinId(0) {
                return None;
            }
            let id = match &self.target_name {
                Some(name) => ResourceId::from_name(name),
                None => ResourceId::from_pin(self.outputs[0].id()),
            };
            let kind = if id.is_reserved() {
                ResourceKind::Reference
            } else {
                ResourceKind::Attachment
            };
            Some(ResourceBinding {
                id,
                info: ResourceInfo::Texture(TextureResourceInfo {
                    kind,
                    extent: self.extent,
                    format: self.format,
                    load_op: Default::default(),
                    clear: Default::default(),
                }),
            })
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        fn compile(&mut self, _ctx: &mut CompileContext) -> crate::error::GraphicsResult<()> {
            self.push("compile");
            Ok(())
        }

        fn begin_frame(&mut self, _ctx: &mut GraphFrameContext) {
            self.push("begin");
        }

        fn pre_render(&mut self, _ctx: &mut GraphRenderContext) {
            self.push("pre");
        }

        fn render(&mut self, _ctx: &mut GraphRenderContext) {
            self.push("render");
        }

        fn post_render(&mut self, _ctx: &mut GraphRenderContext) {
            self.push("post");
        }

        fn end_frame(&mut self, _ctx: &mut GraphFrameContext) {
            self.push("end");
        }
    }

    const EXTENT: Extent2d = Extent2d {
        width: 1280,
        height: 720,
    };

    fn chain(events: &EventLog) -> (RenderGraph, Vec<NodeId>) {
        // a -> b -> c, every output 512x512 Rgba8Unorm.
        let mut graph = RenderGraph::new();
        let a = graph.add_node(Box::new(TracePass::new("a", 1, events)));
        let b = graph.add_node(Box::new(TracePass::new("b", 1, events)));
        let c = graph.add_node(Box::new(TracePass::new("c", 1, events)));
        for (from, to) in [(a, b), (b, c)] {
            let out = graph.node(from).output_pin(0).id();
            let input = graph.node(to).input_pin(0).id();
            assert!(graph.connect(out, input));
        }
        (graph, vec![a, b, c])
    }

    fn frame() -> FrameContext {
        FrameContext::new(0)
    }

    fn output_handle(graph: &RenderGraph, id: NodeId) -> TextureHandle {
        let binding = graph
            .node(id)
            .output_binding(LocalPinId(0))
            .expect("no binding");
        graph
            .cache()
            .get(binding.id)
            .texture_handle()
            .expect("no handle")
    }

    #[test]
    fn test_init_orders_by_connections() {
        let events = EventLog::default();
        let (mut graph, ids) = chain(&events);
        let backend = DummyBackend::new();
        graph
            .init(&backend, EXTENT, TextureFormat::Bgra8Unorm)
            .unwrap();

        assert_eq!(graph.execution_order(), ids.as_slice());

        // Compile hooks ran in order.
        assert_eq!(
            events.lock().as_slice(),
            ["a:compile", "b:compile", "c:compile"]
        );
    }

    #[test]
    fn test_chain_aliases_dead_storage() {
        // a's output is dead after b consumed it; c's identically shaped
        // output must reuse a's storage through an alias, not a fresh
        // allocation.
        let events = EventLog::default();
        let (mut graph, ids) = chain(&events);
        let backend = DummyBackend::new();
        graph
            .init(&backend, EXTENT, TextureFormat::Bgra8Unorm)
            .unwrap();

        let stats = backend.stats();
        assert_eq!(stats.textures_created, 2);
        assert_eq!(stats.aliases_created, 1);

        let storage_a = backend.storage_of(output_handle(&graph, ids[0]));
        let storage_b = backend.storage_of(output_handle(&graph, ids[1]));
        let storage_c = backend.storage_of(output_handle(&graph, ids[2]));
        assert_eq!(storage_c, storage_a);
        assert_ne!(storage_b, storage_a);
    }

    #[test]
    fn test_mismatched_shape_does_not_alias() {
        let events = EventLog::default();
        let mut graph = RenderGraph::new();
        let a = graph.add_node(Box::new(TracePass::new("a", 1, &events)));
        let b = graph.add_node(Box::new(TracePass::new("b", 1, &events)));
        let c = graph.add_node(Box::new(
            TracePass::new("c", 1, &events).with_extent(Extent2d::new(256, 256)),
        ));
        for (from, to) in [(a, b), (b, c)] {
            let out = graph.node(from).output_pin(0).id();
            let input = graph.node(to).input_pin(0).id();
            assert!(graph.connect(out, input));
        }

        let backend = DummyBackend::new();
        graph
            .init(&backend, EXTENT, TextureFormat::Bgra8Unorm)
            .unwrap();

        // c's 256x256 output cannot reuse a's 512x512 storage.
        assert_eq!(backend.stats().textures_created, 3);
        assert_eq!(backend.stats().aliases_created, 0);
    }

    #[test]
    fn test_refcounts_return_to_zero() {
        let events = EventLog::default();
        let (mut graph, _) = chain(&events);
        let backend = DummyBackend::new();
        graph
            .init(&backend, EXTENT, TextureFormat::Bgra8Unorm)
            .unwrap();

        for resource in graph.cache().iter() {
            assert_eq!(
                resource.ref_count(),
                0,
                "resource {:?} not fully released",
                resource.id
            );
        }
    }

    #[test]
    fn test_fan_out_keeps_storage_alive_until_last_consumer() {
        // a feeds both b and c; d consumes both. a's storage must stay
        // live until c has consumed it, so only d can alias it.
        let events = EventLog::default();
        let mut graph = RenderGraph::new();
        let a = graph.add_node(Box::new(TracePass::new("a", 0, &events)));
        let b = graph.add_node(Box::new(TracePass::new("b", 1, &events)));
        let c = graph.add_node(Box::new(TracePass::new("c", 1, &events)));
        let d = graph.add_node(Box::new(TracePass::new("d", 2, &events)));

        let a_out = graph.node(a).output_pin(0).id();
        assert!(graph.connect(a_out, graph.node(b).input_pin(0).id()));
        assert!(graph.connect(a_out, graph.node(c).input_pin(0).id()));
        let b_out = graph.node(b).output_pin(0).id();
        let c_out = graph.node(c).output_pin(0).id();
        assert!(graph.connect(b_out, graph.node(d).input_pin(0).id()));
        assert!(graph.connect(c_out, graph.node(d).input_pin(1).id()));

        let backend = DummyBackend::new();
        graph
            .init(&backend, EXTENT, TextureFormat::Bgra8Unorm)
            .unwrap();

        // a, b, c allocate fresh; d is the only alias.
        assert_eq!(backend.stats().textures_created, 3);
        assert_eq!(backend.stats().aliases_created, 1);
        assert_eq!(
            backend.storage_of(output_handle(&graph, d)),
            backend.storage_of(output_handle(&graph, a))
        );
    }

    #[test]
    fn test_final_texture_is_last_output() {
        let events = EventLog::default();
        let (mut graph, ids) = chain(&events);
        let backend = DummyBackend::new();
        graph
            .init(&backend, EXTENT, TextureFormat::Bgra8Unorm)
            .unwrap();

        let expected = graph
            .node(ids[2])
            .output_binding(LocalPinId(0))
            .unwrap()
            .id;
        assert_eq!(graph.final_texture_id(), Some(expected));
    }

    #[test]
    fn test_frame_phases_run_in_topological_order() {
        let events = EventLog::default();
        let (mut graph, _) = chain(&events);
        let backend = DummyBackend::new();
        graph
            .init(&backend, EXTENT, TextureFormat::Bgra8Unorm)
            .unwrap();
        events.lock().clear();

        let frame = frame();
        let swapchain = backend.create_texture(&Default::default()).unwrap();
        let depth = backend.create_texture(&Default::default()).unwrap();
        graph.begin_frame(&backend, &frame, swapchain, depth, EXTENT);
        graph.render(&backend, &frame, EXTENT);
        graph.end_frame(&backend, &frame, EXTENT);

        assert_eq!(
            events.lock().as_slice(),
            [
                "a:begin", "b:begin", "c:begin", "a:pre", "a:render", "a:post", "b:pre",
                "b:render", "b:post", "c:pre", "c:render", "c:post", "a:end", "b:end", "c:end",
            ]
        );

        // The present transition is the very last recorded command.
        let journal = backend.take_journal();
        assert_eq!(
            journal.last().map(String::as_str),
            Some(format!("transition_to_present {}", swapchain.0).as_str())
        );
    }

    #[test]
    fn test_disabled_node_is_skipped_but_stays_scheduled() {
        let events = EventLog::default();
        let (mut graph, ids) = chain(&events);
        let backend = DummyBackend::new();
        graph
            .init(&backend, EXTENT, TextureFormat::Bgra8Unorm)
            .unwrap();

        graph
            .node_mut(ids[1])
            .as_any_mut()
            .downcast_mut::<TracePass>()
            .unwrap()
            .enabled = false;
        events.lock().clear();

        let frame = frame();
        let swapchain = backend.create_texture(&Default::default()).unwrap();
        let depth = backend.create_texture(&Default::default()).unwrap();
        graph.begin_frame(&backend, &frame, swapchain, depth, EXTENT);
        graph.render(&backend, &frame, EXTENT);
        graph.end_frame(&backend, &frame, EXTENT);

        let log = events.lock();
        assert!(!log.iter().any(|e| e.starts_with("b:")));
        assert!(log.iter().any(|e| e == "a:render"));
        assert!(log.iter().any(|e| e == "c:render"));
        drop(log);

        // Still present in the schedule.
        assert_eq!(graph.execution_order().len(), 3);
    }

    #[test]
    fn test_begin_frame_patches_external_handles() {
        let events = EventLog::default();
        let (mut graph, _) = chain(&events);
        let backend = DummyBackend::new();
        graph
            .init(&backend, EXTENT, TextureFormat::Bgra8Unorm)
            .unwrap();

        let frame = frame();
        let swapchain = backend.create_texture(&Default::default()).unwrap();
        let depth = backend.create_texture(&Default::default()).unwrap();
        graph.begin_frame(&backend, &frame, swapchain, depth, EXTENT);

        assert_eq!(
            graph.cache().get(RESOURCE_SWAPCHAIN).texture_handle(),
            Some(swapchain)
        );
        assert_eq!(
            graph.cache().get(RESOURCE_DEPTH).texture_handle(),
            Some(depth)
        );
    }

    #[test]
    fn test_named_external_target_is_never_allocated() {
        let events = EventLog::default();
        let mut graph = RenderGraph::new();
        graph.add_node(Box::new(
            TracePass::new("present", 0, &events).with_target_name("swapchain"),
        ));

        let backend = DummyBackend::new();
        graph
            .init(&backend, EXTENT, TextureFormat::Bgra8Unorm)
            .unwrap();

        assert_eq!(backend.stats().textures_created, 0);
        assert_eq!(backend.stats().aliases_created, 0);
        assert!(graph.cache().get(RESOURCE_SWAPCHAIN).is_external());
    }

    #[test]
    fn test_allocation_failure_degrades_gracefully() {
        let events = EventLog::default();
        let (mut graph, ids) = chain(&events);
        let backend = DummyBackend::new();
        backend.fail_next_texture_creation();

        // Compilation completes; a's output is simply unbacked.
        graph
            .init(&backend, EXTENT, TextureFormat::Bgra8Unorm)
            .unwrap();

        let binding = graph.node(ids[0]).output_binding(LocalPinId(0)).unwrap();
        assert!(graph.cache().get(binding.id).handle.is_none());
    }

    #[test]
    fn test_cycle_is_reported_at_init() {
        let events = EventLog::default();
        let mut graph = RenderGraph::new();
        let a = graph.add_node(Box::new(TracePass::new("a", 1, &events)));
        let b = graph.add_node(Box::new(TracePass::new("b", 1, &events)));
        let a_out = graph.node(a).output_pin(0).id();
        let b_out = graph.node(b).output_pin(0).id();
        assert!(graph.connect(a_out, graph.node(b).input_pin(0).id()));
        assert!(graph.connect(b_out, graph.node(a).input_pin(0).id()));

        let backend = DummyBackend::new();
        assert_eq!(
            graph.init(&backend, EXTENT, TextureFormat::Bgra8Unorm),
            Err(GraphicsError::CyclicGraph)
        );
    }

    #[test]
    fn test_shutdown_releases_owned_handles() {
        let events = EventLog::default();
        let (mut graph, _) = chain(&events);
        let backend = DummyBackend::new();
        graph
            .init(&backend, EXTENT, TextureFormat::Bgra8Unorm)
            .unwrap();
        assert!(backend.live_texture_count() > 0);

        graph.shutdown(&backend);
        for resource in graph.cache().iter() {
            assert!(resource.handle.is_none());
        }
        assert_eq!(backend.live_texture_count(), 0);
    }
}
