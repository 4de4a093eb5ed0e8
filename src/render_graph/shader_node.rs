//! Concrete pass nodes.
//!
//! [`ShaderNode`] wraps one programmable fullscreen pass: it owns a render
//! pass / framebuffer pair built from its resolved target, pipeline state,
//! and a shader compiled from user source. [`FixedShaderNode`] is the
//! fixed-function sibling: same pass shape, shader chosen from a built-in
//! set (blit, tonemap) instead of user source.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::backend::{
    ClearValue, Extent2d, FramebufferDescriptor, FramebufferHandle, GpuBackend, LoadOp,
    RenderPassAttachment, RenderPassDescriptor, RenderPassHandle, ShaderHandle, TextureFormat,
    TextureHandle,
};
use crate::error::GraphicsResult;
use crate::node_graph::{GraphNode, LocalPinId, NodeTypeId, Pin};
use crate::render_graph::cache::ResourceCache;
use crate::render_graph::node::{
    CompileContext, GraphFrameContext, GraphRenderContext, RenderGraphNode, ResizeContext,
    ResourceBinding, ResourceResolver, PIN_TEXTURE,
};
use crate::render_graph::resource::{
    ResourceId, ResourceInfo, ResourceKind, TextureResourceInfo, RESOURCE_DEPTH,
    RESOURCE_SWAPCHAIN, RESOURCE_VIEW_CONSTANTS,
};

pub const SHADER_NODE_TYPE: NodeTypeId = NodeTypeId::from_name("ShaderNode");
pub const FIXED_SHADER_NODE_TYPE: NodeTypeId = NodeTypeId::from_name("FixedShaderNode");

/// Color blend mode of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Opaque,
    Alpha,
    Additive,
}

/// Depth usage of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DepthMode {
    #[default]
    Disabled,
    ReadOnly,
    ReadWrite,
}

/// Triangle culling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

/// Fixed-function pipeline state owned by a pass node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PipelineState {
    pub blend: BlendMode,
    pub depth: DepthMode,
    pub cull: CullMode,
}

/// Built-in shaders for [`FixedShaderNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FixedFunction {
    /// Copy the source texture to the target.
    #[default]
    Blit,
    /// Apply tonemapping while copying to the target.
    Tonemap,
}

impl FixedFunction {
    fn shader_source(self) -> &'static str {
        match self {
            Self::Blit => include_str!("shaders/blit.wgsl"),
            Self::Tonemap => include_str!("shaders/tonemap.wgsl"),
        }
    }
}

/// The GPU objects a pass rebuilds whenever its target changes.
#[derive(Debug, Default)]
struct PassObjects {
    shader: Option<ShaderHandle>,
    render_pass: Option<RenderPassHandle>,
    framebuffer: Option<FramebufferHandle>,
    /// The color attachment the current framebuffer was built over. The
    /// swapchain image rotates per frame, so this is how staleness is
    /// detected.
    framebuffer_target: Option<TextureHandle>,
}

impl PassObjects {
    fn release(&mut self, backend: &dyn GpuBackend) {
        if let Some(framebuffer) = self.framebuffer.take() {
            backend.destroy_framebuffer(framebuffer);
        }
        self.framebuffer_target = None;
        if let Some(render_pass) = self.render_pass.take() {
            backend.destroy_render_pass(render_pass);
        }
        if let Some(shader) = self.shader.take() {
            backend.destroy_shader(shader);
        }
    }

    /// Whether the framebuffer must be (re)built for the given target.
    fn framebuffer_stale(&self, target: TextureHandle) -> bool {
        self.framebuffer.is_none() || self.framebuffer_target != Some(target)
    }

    /// Build shader + render pass, and the framebuffer when the target
    /// handle is already known. External targets (swapchain) are patched
    /// in per frame, so their framebuffer is built lazily in
    /// `begin_frame` instead.
    #[allow(clippy::too_many_arguments)]
    fn build(
        &mut self,
        backend: &dyn GpuBackend,
        name: &str,
        source: &str,
        color_format: TextureFormat,
        load_op: LoadOp,
        target: Option<TextureHandle>,
        depth: Option<TextureHandle>,
        extent: Extent2d,
    ) -> GraphicsResult<()> {
        self.release(backend);

        self.shader = Some(backend.create_shader(name, source)?);

        let desc = RenderPassDescriptor {
            label: Some(name.to_string()),
            color_attachments: vec![RenderPassAttachment {
                format: color_format,
                load_op,
            }],
            depth_attachment: depth.map(|_| RenderPassAttachment {
                format: TextureFormat::Depth32Float,
                load_op: LoadOp::Load,
            }),
        };
        let render_pass = backend.create_render_pass(&desc)?;
        self.render_pass = Some(render_pass);

        if let Some(target) = target {
            let mut attachments = vec![target];
            attachments.extend(depth);
            self.framebuffer = Some(backend.create_framebuffer(&FramebufferDescriptor {
                label: Some(name.to_string()),
                render_pass,
                attachments,
                extent,
            })?);
            self.framebuffer_target = Some(target);
        }
        Ok(())
    }

    /// Recreate only the framebuffer, after the target handle or extent
    /// changed.
    fn rebuild_framebuffer(
        &mut self,
        backend: &dyn GpuBackend,
        name: &str,
        target: TextureHandle,
        depth: Option<TextureHandle>,
        extent: Extent2d,
    ) {
        let Some(render_pass) = self.render_pass else {
            return;
        };
        if let Some(framebuffer) = self.framebuffer.take() {
            backend.destroy_framebuffer(framebuffer);
        }
        let mut attachments = vec![target];
        attachments.extend(depth);
        match backend.create_framebuffer(&FramebufferDescriptor {
            label: Some(name.to_string()),
            render_pass,
            attachments,
            extent,
        }) {
            Ok(framebuffer) => {
                self.framebuffer = Some(framebuffer);
                self.framebuffer_target = Some(target);
            }
            Err(error) => log::warn!("pass '{name}': framebuffer rebuild failed: {error}"),
        }
    }

    /// Record the fullscreen draw: bind view constants and connected input
    /// textures, draw one triangle.
    fn record(
        &self,
        ctx: &mut GraphRenderContext,
        name: &str,
        clear: ClearValue,
        inputs: &[Pin],
    ) {
        let (Some(render_pass), Some(framebuffer), Some(shader)) =
            (self.render_pass, self.framebuffer, self.shader)
        else {
            // Degraded pass (missing target or failed compile); skip.
            return;
        };

        ctx.backend
            .begin_render_pass(ctx.cmd, render_pass, framebuffer, &[clear]);
        ctx.backend.bind_shader(ctx.cmd, shader);

        if let Some(constants) = ctx
            .resources
            .cache()
            .try_get(RESOURCE_VIEW_CONSTANTS)
            .and_then(|r| r.buffer_handle())
        {
            ctx.backend.bind_buffer(ctx.cmd, 0, constants);
        }

        for (slot, pin) in inputs.iter().filter(|p| p.is_connected()).enumerate() {
            match ctx.resources.pin_texture(pin) {
                Some(texture) => ctx.backend.bind_texture(ctx.cmd, slot as u32, texture),
                None => log::warn!("pass '{name}': input {slot} has no resolved texture"),
            }
        }

        ctx.backend.draw(ctx.cmd, 3, 1);
        ctx.backend.end_render_pass(ctx.cmd);
    }
}

/// Shared target description of both pass node kinds.
#[derive(Debug, Clone)]
struct PassTarget {
    /// Named resource to render into (e.g. "swapchain"); `None` gives the
    /// pass an anonymous attachment owned by its output pin.
    name: Option<String>,
    /// `None` follows the swapchain extent.
    extent: Option<Extent2d>,
    format: TextureFormat,
    load_op: LoadOp,
    clear: ClearValue,
}

impl Default for PassTarget {
    fn default() -> Self {
        Self {
            name: None,
            extent: None,
            format: TextureFormat::Rgba8Unorm,
            load_op: LoadOp::Clear,
            clear: ClearValue::Color([0.0, 0.0, 0.0, 1.0]),
        }
    }
}

impl PassTarget {
    fn resource_id(&self, output_pin: &Pin) -> ResourceId {
        match &self.name {
            Some(name) => ResourceId::from_name(name),
            None => ResourceId::from_pin(output_pin.id()),
        }
    }

    fn binding(&self, output_pin: &Pin) -> ResourceBinding {
        let id = self.resource_id(output_pin);
        let kind = if id.is_reserved() {
            ResourceKind::Reference
        } else {
            ResourceKind::Attachment
        };
        ResourceBinding {
            id,
            info: ResourceInfo::Texture(TextureResourceInfo {
                kind,
                extent: self.extent,
                format: self.format,
                load_op: self.load_op,
                clear: self.clear,
            }),
        }
    }

    fn serialize_into(&self, out: &mut Map<String, Value>) {
        if let Some(name) = &self.name {
            out.insert("targetName".into(), json!(name));
        }
        if let Some(extent) = self.extent {
            out.insert(
                "targetExtent".into(),
                serde_json::to_value(extent).unwrap_or(Value::Null),
            );
        }
        out.insert(
            "targetFormat".into(),
            serde_json::to_value(self.format).unwrap_or(Value::Null),
        );
        out.insert(
            "loadOp".into(),
            serde_json::to_value(self.load_op).unwrap_or(Value::Null),
        );
        out.insert(
            "clear".into(),
            serde_json::to_value(self.clear).unwrap_or(Value::Null),
        );
    }

    fn deserialize_from(&mut self, value: &Value) {
        if let Some(name) = value.get("targetName").and_then(Value::as_str) {
            self.name = Some(name.to_string());
        }
        if let Some(extent) = value.get("targetExtent") {
            self.extent = serde_json::from_value(extent.clone()).ok();
        }
        if let Some(format) = value.get("targetFormat") {
            if let Ok(format) = serde_json::from_value(format.clone()) {
                self.format = format;
            }
        }
        if let Some(load_op) = value.get("loadOp") {
            if let Ok(load_op) = serde_json::from_value(load_op.clone()) {
                self.load_op = load_op;
            }
        }
        if let Some(clear) = value.get("clear") {
            if let Ok(clear) = serde_json::from_value(clear.clone()) {
                self.clear = clear;
            }
        }
    }
}

fn resolved_target_handle(cache: &ResourceCache, id: ResourceId) -> Option<TextureHandle> {
    cache.try_get(id).and_then(|r| r.texture_handle())
}

/// A programmable fullscreen pass.
pub struct ShaderNode {
    inputs: Vec<Pin>,
    outputs: Vec<Pin>,
    name: String,
    shader_source: String,
    pipeline: PipelineState,
    target: PassTarget,
    enabled: bool,
    objects: PassObjects,
}

impl ShaderNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inputs: vec![Pin::input(0, PIN_TEXTURE)],
            outputs: vec![Pin::output(0, PIN_TEXTURE)],
            name: name.into(),
            shader_source: String::new(),
            pipeline: PipelineState::default(),
            target: PassTarget::default(),
            enabled: true,
            objects: PassObjects::default(),
        }
    }

    pub fn with_shader_source(mut self, source: impl Into<String>) -> Self {
        self.shader_source = source.into();
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineState) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Render into the named resource instead of an anonymous attachment.
    pub fn with_target_name(mut self, name: impl Into<String>) -> Self {
        self.target.name = Some(name.into());
        self
    }

    pub fn with_target_format(mut self, format: TextureFormat) -> Self {
        self.target.format = format;
        self
    }

    /// Fix the target size; without this the target follows the swapchain.
    pub fn with_target_extent(mut self, extent: Extent2d) -> Self {
        self.target.extent = Some(extent);
        self
    }

    pub fn with_load_op(mut self, load_op: LoadOp) -> Self {
        self.target.load_op = load_op;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn output_resource_id(&self) -> ResourceId {
        self.target.resource_id(&self.outputs[0])
    }

    fn depth_handle(&self, cache: &ResourceCache) -> Option<TextureHandle> {
        if self.pipeline.depth == DepthMode::Disabled {
            return None;
        }
        let handle = resolved_target_handle(cache, RESOURCE_DEPTH);
        if handle.is_none() {
            log::warn!("pass '{}' wants depth but no depth image is bound", self.name);
        }
        handle
    }
}

impl GraphNode for ShaderNode {
    fn node_type(&self) -> NodeTypeId {
        SHADER_NODE_TYPE
    }

    fn type_name(&self) -> &'static str {
        "ShaderNode"
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

    fn serialize_state(&self, out: &mut Map<String, Value>) {
        out.insert("name".into(), json!(self.name));
        out.insert("shaderSource".into(), json!(self.shader_source));
        out.insert(
            "pipeline".into(),
            serde_json::to_value(self.pipeline).unwrap_or(Value::Null),
        );
        out.insert("enabled".into(), json!(self.enabled));
        self.target.serialize_into(out);
    }

    fn deserialize_state(&mut self, value: &Value) -> GraphicsResult<()> {
        if let Some(name) = value.get("name").and_then(Value::as_str) {
            self.name = name.to_string();
        }
        if let Some(source) = value.get("shaderSource").and_then(Value::as_str) {
            self.shader_source = source.to_string();
        }
        if let Some(pipeline) = value.get("pipeline") {
            if let Ok(pipeline) = serde_json::from_value(pipeline.clone()) {
                self.pipeline = pipeline;
            }
        }
        if let Some(enabled) = value.get("enabled").and_then(Value::as_bool) {
            self.enabled = enabled;
        }
        self.target.deserialize_from(value);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl RenderGraphNode for ShaderNode {
    fn output_binding(&self, local_id: LocalPinId) -> Option<ResourceBinding> {
        (local_id == LocalPinId(0)).then(|| self.target.binding(&self.outputs[0]))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn compile(&mut self, ctx: &mut CompileContext) -> GraphicsResult<()> {
        let id = self.output_resource_id();
        let target = resolved_target_handle(ctx.resources.cache(), id);
        let external = ctx
            .resources
            .cache()
            .try_get(id)
            .is_some_and(|r| r.is_external());
        if target.is_none() && !external {
            // Allocation failed upstream; stay degraded until recompile.
            log::warn!(
                "pass '{}' has no backing target; it will not draw",
                self.name
            );
            self.objects.release(ctx.backend);
            return Ok(());
        }

        let color_format = if id == RESOURCE_SWAPCHAIN {
            ctx.swapchain_format
        } else {
            self.target.format
        };
        let depth = self.depth_handle(ctx.resources.cache());
        let extent = self.target.extent.unwrap_or(ctx.swapchain_extent);
        self.objects.build(
            ctx.backend,
            &self.name,
            &self.shader_source,
            color_format,
            self.target.load_op,
            target,
            depth,
            extent,
        )
    }

    fn begin_frame(&mut self, ctx: &mut GraphFrameContext) {
        // The swapchain target rotates per frame, and a resize leaves the
        // framebuffer missing; rebuild against the currently bound target
        // whenever it went stale.
        let id = self.output_resource_id();
        let Some(target) = resolved_target_handle(ctx.resources.cache(), id) else {
            return;
        };
        if !self.objects.framebuffer_stale(target) {
            return;
        }
        let depth = self.depth_handle(ctx.resources.cache());
        let extent = self.target.extent.unwrap_or(ctx.extent);
        self.objects
            .rebuild_framebuffer(ctx.backend, &self.name, target, depth, extent);
    }

    fn render(&mut self, ctx: &mut GraphRenderContext) {
        self.objects
            .record(ctx, &self.name, self.target.clear, &self.inputs);
    }

    fn on_swapchain_resized(&mut self, ctx: &mut ResizeContext) {
        // Fixed-size targets are unaffected.
        if self.target.extent.is_some() {
            return;
        }
        let id = self.output_resource_id();
        if !id.is_reserved() {
            // Recreate the owned swapchain-sized attachment at the new
            // extent and patch it into the cache.
            if let Some(entry) = ctx.cache.try_get_mut(id) {
                if let Some(old) = entry.handle.take() {
                    if let Some(texture) = old.texture() {
                        ctx.backend.destroy_texture(texture);
                    }
                }
            }
            let desc = crate::backend::TextureDescriptor::new_2d(
                ctx.extent.width,
                ctx.extent.height,
                self.target.format,
                crate::backend::TextureUsage::RENDER_ATTACHMENT
                    | crate::backend::TextureUsage::TEXTURE_BINDING,
            )
            .with_label(self.name.clone());
            match ctx.backend.create_texture(&desc) {
                Ok(handle) => ctx.cache.set_handle(
                    id,
                    Some(crate::render_graph::resource::ResourceHandle::Texture(
                        handle,
                    )),
                ),
                Err(error) => {
                    log::warn!("pass '{}': target recreation failed: {error}", self.name)
                }
            }
        }
        // The framebuffer is stale either way; it is rebuilt lazily in
        // begin_frame.
        if let Some(framebuffer) = self.objects.framebuffer.take() {
            ctx.backend.destroy_framebuffer(framebuffer);
        }
    }
}

/// A fixed-function fullscreen pass over a built-in shader.
pub struct FixedShaderNode {
    inputs: Vec<Pin>,
    outputs: Vec<Pin>,
    name: String,
    function: FixedFunction,
    target: PassTarget,
    enabled: bool,
    objects: PassObjects,
}

impl FixedShaderNode {
    pub fn new(name: impl Into<String>, function: FixedFunction) -> Self {
        Self {
            inputs: vec![Pin::input(0, PIN_TEXTURE)],
            outputs: vec![Pin::output(0, PIN_TEXTURE)],
            name: name.into(),
            function,
            target: PassTarget::default(),
            enabled: true,
            objects: PassObjects::default(),
        }
    }

    pub fn with_target_name(mut self, name: impl Into<String>) -> Self {
        self.target.name = Some(name.into());
        self
    }

    pub fn with_target_format(mut self, format: TextureFormat) -> Self {
        self.target.format = format;
        self
    }

    pub fn function(&self) -> FixedFunction {
        self.function
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn output_resource_id(&self) -> ResourceId {
        self.target.resource_id(&self.outputs[0])
    }
}

impl GraphNode for FixedShaderNode {
    fn node_type(&self) -> NodeTypeId {
        FIXED_SHADER_NODE_TYPE
    }

    fn type_name(&self) -> &'static str {
        "FixedShaderNode"
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

    fn serialize_state(&self, out: &mut Map<String, Value>) {
        out.insert("name".into(), json!(self.name));
        out.insert(
            "function".into(),
            serde_json::to_value(self.function).unwrap_or(Value::Null),
        );
        out.insert("enabled".into(), json!(self.enabled));
        self.target.serialize_into(out);
    }

    fn deserialize_state(&mut self, value: &Value) -> GraphicsResult<()> {
        if let Some(name) = value.get("name").and_then(Value::as_str) {
            self.name = name.to_string();
        }
        if let Some(function) = value.get("function") {
            if let Ok(function) = serde_json::from_value(function.clone()) {
                self.function = function;
            }
        }
        if let Some(enabled) = value.get("enabled").and_then(Value::as_bool) {
            self.enabled = enabled;
        }
        self.target.deserialize_from(value);
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl RenderGraphNode for FixedShaderNode {
    fn output_binding(&self, local_id: LocalPinId) -> Option<ResourceBinding> {
        (local_id == LocalPinId(0)).then(|| self.target.binding(&self.outputs[0]))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn compile(&mut self, ctx: &mut CompileContext) -> GraphicsResult<()> {
        let id = self.output_resource_id();
        let target = resolved_target_handle(ctx.resources.cache(), id);
        let external = ctx
            .resources
            .cache()
            .try_get(id)
            .is_some_and(|r| r.is_external());
        if target.is_none() && !external {
            log::warn!(
                "pass '{}' has no backing target; it will not draw",
                self.name
            );
            self.objects.release(ctx.backend);
            return Ok(());
        }

        let color_format = if id == RESOURCE_SWAPCHAIN {
            ctx.swapchain_format
        } else {
            self.target.format
        };
        let extent = self.target.extent.unwrap_or(ctx.swapchain_extent);
        self.objects.build(
            ctx.backend,
            &self.name,
            self.function.shader_source(),
            color_format,
            self.target.load_op,
            target,
            None,
            extent,
        )
    }

    fn begin_frame(&mut self, ctx: &mut GraphFrameContext) {
        let id = self.output_resource_id();
        let Some(target) = resolved_target_handle(ctx.resources.cache(), id) else {
            return;
        };
        if !self.objects.framebuffer_stale(target) {
            return;
        }
        let extent = self.target.extent.unwrap_or(ctx.extent);
        self.objects
            .rebuild_framebuffer(ctx.backend, &self.name, target, None, extent);
    }

    fn render(&mut self, ctx: &mut GraphRenderContext) {
        self.objects
            .record(ctx, &self.name, self.target.clear, &self.inputs);
    }

    fn on_swapchain_resized(&mut self, ctx: &mut ResizeContext) {
        if let Some(framebuffer) = self.objects.framebuffer.take() {
            ctx.backend.destroy_framebuffer(framebuffer);
        }
    }
}
