// Graphics pipeline description and compilation
//
// A PipelineDescriptor is a plain value: clone it, swap the shader stages and
// compile again to get a second, independent pipeline that shares every
// other piece of fixed-function state.

use ash::vk;
use std::ffi::CString;

use super::gpu::GpuDevice;
use crate::error::{EngineError, EngineResult, VkResultExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStageKind {
    Vertex,
    Fragment,
}

impl ShaderStageKind {
    pub fn to_vk(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStageKind::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStageKind::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

/// One programmable stage: which stage, which module, which entry symbol
#[derive(Debug, Clone)]
pub struct ShaderStage {
    pub kind: ShaderStageKind,
    pub module: vk::ShaderModule,
    pub entry: CString,
}

impl ShaderStage {
    pub fn new(kind: ShaderStageKind, module: vk::ShaderModule) -> Self {
        Self {
            kind,
            module,
            entry: CString::from(c"main"),
        }
    }

    pub fn vertex(module: vk::ShaderModule) -> Self {
        Self::new(ShaderStageKind::Vertex, module)
    }

    pub fn fragment(module: vk::ShaderModule) -> Self {
        Self::new(ShaderStageKind::Fragment, module)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RasterizationState {
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
}

impl RasterizationState {
    /// Solid triangles, no culling
    pub fn fill() -> Self {
        Self {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
            line_width: 1.0,
        }
    }
}

impl Default for RasterizationState {
    fn default() -> Self {
        Self::fill()
    }
}

/// Everything needed to compile one graphics pipeline.
///
/// Multisampling is always one sample per pixel and the viewport state always
/// holds exactly one viewport and one scissor.
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    /// Used in logs and errors only
    pub name: String,
    pub shader_stages: Vec<ShaderStage>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub viewport: vk::Viewport,
    pub scissor: vk::Rect2D,
    pub rasterization: RasterizationState,
    pub color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    pub layout: vk::PipelineLayout,
}

impl PipelineDescriptor {
    /// Descriptor covering the whole of `extent`, with no shader stages yet
    pub fn new(name: &str, extent: vk::Extent2D, layout: vk::PipelineLayout) -> Self {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        // No blending, write all of RGBA
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();

        Self {
            name: name.to_string(),
            shader_stages: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            viewport,
            scissor,
            rasterization: RasterizationState::fill(),
            color_blend_attachment,
            layout,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Replace the whole stage list
    pub fn with_shader_stages(mut self, stages: Vec<ShaderStage>) -> Self {
        self.shader_stages = stages;
        self
    }

    /// Exactly one vertex and one fragment stage
    pub fn validate(&self) -> EngineResult<()> {
        for kind in [ShaderStageKind::Vertex, ShaderStageKind::Fragment] {
            match self.shader_stages.iter().filter(|s| s.kind == kind).count() {
                0 => return Err(EngineError::MissingShaderStage(kind)),
                1 => {}
                _ => return Err(EngineError::DuplicateShaderStage(kind)),
            }
        }
        Ok(())
    }

    /// Compile against `render_pass` (subpass 0).
    ///
    /// Errors are recoverable: the caller reports them and leaves the
    /// pipeline slot empty.
    pub fn compile<G: GpuDevice>(
        self,
        gpu: &G,
        render_pass: vk::RenderPass,
    ) -> EngineResult<CompiledPipeline> {
        self.validate()?;

        let stages: Vec<vk::PipelineShaderStageCreateInfo> = self
            .shader_stages
            .iter()
            .map(|stage| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage.kind.to_vk())
                    .module(stage.module)
                    .name(&stage.entry)
                    .build()
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(self.topology)
            .primitive_restart_enable(false);

        let viewports = [self.viewport];
        let scissors = [self.scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.rasterization.polygon_mode)
            .line_width(self.rasterization.line_width)
            .cull_mode(self.rasterization.cull_mode)
            .front_face(self.rasterization.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        let color_blend_attachments = [self.color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(self.layout)
            .render_pass(render_pass)
            .subpass(0)
            .base_pipeline_handle(vk::Pipeline::null());

        let handle = gpu
            .create_graphics_pipeline(&pipeline_info)
            .map_err(|result| match result {
                // A lost device says nothing about this pipeline
                vk::Result::ERROR_DEVICE_LOST => EngineError::Vulkan {
                    call: "vkCreateGraphicsPipelines",
                    result,
                },
                _ => EngineError::PipelineCompilation {
                    name: self.name.clone(),
                    result,
                },
            })?;

        log::info!("Compiled pipeline '{}'", self.name);

        Ok(CompiledPipeline {
            name: self.name,
            handle,
        })
    }
}

/// Pipeline layout with no descriptor sets and no push constants
pub fn create_empty_layout<G: GpuDevice>(gpu: &G) -> EngineResult<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::builder();
    gpu.create_pipeline_layout(&layout_info)
        .call("vkCreatePipelineLayout")
}

/// A GPU pipeline object. Not Clone: it is destroyed exactly once.
#[derive(Debug)]
pub struct CompiledPipeline {
    name: String,
    handle: vk::Pipeline,
}

impl CompiledPipeline {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.handle
    }

    pub fn destroy<G: GpuDevice>(self, gpu: &G) {
        gpu.destroy_pipeline(self.handle);
    }
}

/// Pipelines the frame loop can bind, one of them selected.
///
/// A slot is empty when its shaders or its compilation failed; an empty slot
/// is never bound.
#[derive(Debug, Default)]
pub struct PipelineSlots {
    slots: Vec<Option<CompiledPipeline>>,
    selected: usize,
}

impl PipelineSlots {
    pub fn new(slots: Vec<Option<CompiledPipeline>>) -> Self {
        Self { slots, selected: 0 }
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn selected(&self) -> Option<&CompiledPipeline> {
        self.slots.get(self.selected).and_then(Option::as_ref)
    }

    pub fn is_usable(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }

    /// Select the next slot, wrapping around. Returns the new index.
    pub fn cycle(&mut self) -> usize {
        if !self.slots.is_empty() {
            self.selected = (self.selected + 1) % self.slots.len();
        }
        self.selected
    }

    pub fn destroy<G: GpuDevice>(self, gpu: &G) {
        for pipeline in self.slots.into_iter().flatten() {
            pipeline.destroy(gpu);
        }
    }
}
