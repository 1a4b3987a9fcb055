// =============================================================================
// ENGINE - init / run / cleanup
// =============================================================================
//
// LIFECYCLE:
// ┌─────────────────────────────────────────────────────────────────┐
// │  init()    surface resources -> layout -> pipelines -> sync     │
// │  run()     poll events -> draw frame, until Quit or fatal error │
// │  cleanup() wait idle -> sync -> pipelines -> layout -> surface  │
// └─────────────────────────────────────────────────────────────────┘
//
// Pipeline and shader failures only empty a slot. Everything else is fatal
// and is handed back to the caller, which shuts down.
//
// =============================================================================

use ash::vk;
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::gpu::GpuDevice;
use crate::backend::pipeline::{
    create_empty_layout, CompiledPipeline, PipelineDescriptor, PipelineSlots, ShaderStage,
};
use crate::backend::shader::load_shader_module;
use crate::backend::swapchain::SurfaceResources;
use crate::backend::sync::FrameSyncRing;
use crate::config::{Config, GraphicsConfig};
use crate::error::{EngineError, EngineResult};
use crate::frame::{FrameLoop, FrameReport, FrameTimeouts};

/// SPIR-V files for one selectable pipeline
#[derive(Debug, Clone)]
pub struct PipelineSource {
    pub name: String,
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub frames_in_flight: usize,
    pub timeouts: FrameTimeouts,
    pub clear_color_period: f32,
    pub pipelines: Vec<PipelineSource>,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            extent: vk::Extent2D {
                width: config.window.width,
                height: config.window.height,
            },
            present_mode: config.present_mode(),
            frames_in_flight: config.graphics.frames_in_flight,
            timeouts: FrameTimeouts {
                fence_ns: config.graphics.fence_timeout_ns,
                acquire_ns: config.graphics.acquire_timeout_ns,
            },
            clear_color_period: clear_color_period(config),
            pipelines: config
                .pipelines
                .iter()
                .map(|p| PipelineSource {
                    name: p.name.clone(),
                    vertex: p.vertex.clone(),
                    fragment: p.fragment.clone(),
                })
                .collect(),
        }
    }
}

/// A period at or below zero would divide by zero or run the flash backwards
fn clear_color_period(config: &Config) -> f32 {
    let period = config.graphics.clear_color_period;
    if period.is_finite() && period > 0.0 {
        return period;
    }

    let fallback = GraphicsConfig::default().clear_color_period;
    log::warn!(
        "Invalid clear_color_period {}, defaulting to {}",
        period,
        fallback
    );
    fallback
}

/// Input the frame loop reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Quit,
    CyclePipeline,
}

/// Drained once between frames, never blocks
pub trait EventSource {
    fn poll_events(&mut self, events: &mut Vec<EngineEvent>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

/// Everything init() creates, released together by cleanup()
struct EngineResources {
    surface: SurfaceResources,
    layout: vk::PipelineLayout,
    pipelines: PipelineSlots,
    frames: FrameLoop,
}

pub struct Engine<G: GpuDevice> {
    gpu: Arc<G>,
    settings: EngineSettings,
    resources: Option<EngineResources>,
}

impl<G: GpuDevice> Engine<G> {
    pub fn new(gpu: Arc<G>, settings: EngineSettings) -> Self {
        Self {
            gpu,
            settings,
            resources: None,
        }
    }

    #[cfg(test)]
    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    #[cfg(test)]
    pub fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    /// Build all GPU state. On failure nothing is left behind and false is returned.
    pub fn init(&mut self) -> bool {
        if self.resources.is_some() {
            log::warn!("Engine already initialized");
            return true;
        }

        match self.create_resources() {
            Ok(resources) => {
                self.resources = Some(resources);
                log::info!("Engine initialized");
                true
            }
            Err(e) => {
                log::error!("Engine initialization failed: {}", e);
                false
            }
        }
    }

    fn create_resources(&self) -> EngineResult<EngineResources> {
        let gpu = self.gpu.as_ref();

        let surface =
            SurfaceResources::new(gpu, self.settings.extent, self.settings.present_mode)?;

        let layout = match create_empty_layout(gpu) {
            Ok(layout) => layout,
            Err(e) => {
                surface.destroy(gpu);
                return Err(e);
            }
        };

        let pipelines = match self.build_pipelines(&surface, layout) {
            Ok(pipelines) => pipelines,
            Err(e) => {
                gpu.destroy_pipeline_layout(layout);
                surface.destroy(gpu);
                return Err(e);
            }
        };

        let sync = match FrameSyncRing::new(gpu, self.settings.frames_in_flight) {
            Ok(sync) => sync,
            Err(e) => {
                pipelines.destroy(gpu);
                gpu.destroy_pipeline_layout(layout);
                surface.destroy(gpu);
                return Err(e);
            }
        };

        let frames = FrameLoop::new(
            sync,
            surface.image_count(),
            self.settings.timeouts,
            self.settings.clear_color_period,
        );

        Ok(EngineResources {
            surface,
            layout,
            pipelines,
            frames,
        })
    }

    /// One slot per configured pipeline. Recoverable failures leave that
    /// slot empty, fatal ones release the slots built so far and propagate.
    fn build_pipelines(
        &self,
        surface: &SurfaceResources,
        layout: vk::PipelineLayout,
    ) -> EngineResult<PipelineSlots> {
        let base = PipelineDescriptor::new("base", surface.extent, layout);
        let mut slots: Vec<Option<CompiledPipeline>> =
            Vec::with_capacity(self.settings.pipelines.len());

        for source in &self.settings.pipelines {
            match self.build_pipeline(&base, source, surface.render_pass) {
                Ok(pipeline) => slots.push(Some(pipeline)),
                Err(e) if !e.is_fatal() => {
                    log::error!("Pipeline '{}' unavailable: {}", source.name, e);
                    slots.push(None);
                }
                Err(e) => {
                    PipelineSlots::new(slots).destroy(self.gpu.as_ref());
                    return Err(e);
                }
            }
        }

        let slots = PipelineSlots::new(slots);
        if !slots.is_usable(slots.selected_index()) {
            log::warn!("Initially selected pipeline is empty, frames will only clear");
        }
        Ok(slots)
    }

    fn build_pipeline(
        &self,
        base: &PipelineDescriptor,
        source: &PipelineSource,
        render_pass: vk::RenderPass,
    ) -> EngineResult<CompiledPipeline> {
        let gpu = self.gpu.as_ref();

        let vertex = load_shader_module(gpu, &source.vertex)?;
        let fragment = match load_shader_module(gpu, &source.fragment) {
            Ok(module) => module,
            Err(e) => {
                gpu.destroy_shader_module(vertex);
                return Err(e);
            }
        };

        let result = base
            .clone()
            .with_name(&source.name)
            .with_shader_stages(vec![ShaderStage::vertex(vertex), ShaderStage::fragment(fragment)])
            .compile(gpu, render_pass);

        // The pipeline keeps what it needs from the modules
        gpu.destroy_shader_module(fragment);
        gpu.destroy_shader_module(vertex);

        result
    }

    #[cfg(test)]
    pub fn selected_pipeline(&self) -> Option<&CompiledPipeline> {
        self.resources.as_ref()?.pipelines.selected()
    }

    #[cfg(test)]
    pub fn frame_number(&self) -> u64 {
        self.resources
            .as_ref()
            .map_or(0, |r| r.frames.frame_number())
    }

    pub fn handle_event(&mut self, event: EngineEvent) -> LoopControl {
        match event {
            EngineEvent::Quit => {
                log::info!("Quit requested");
                LoopControl::Stop
            }
            EngineEvent::CyclePipeline => {
                if let Some(resources) = self.resources.as_mut() {
                    let index = resources.pipelines.cycle();
                    match resources.pipelines.selected() {
                        Some(pipeline) => {
                            log::info!("Switched to pipeline {} '{}'", index, pipeline.name())
                        }
                        None => log::warn!("Pipeline slot {} is empty, clearing only", index),
                    }
                }
                LoopControl::Continue
            }
        }
    }

    pub fn draw_frame(&mut self) -> EngineResult<FrameReport> {
        let resources = self.resources.as_mut().ok_or(EngineError::NotInitialized)?;
        resources.frames.draw(
            self.gpu.as_ref(),
            &resources.surface,
            resources.pipelines.selected(),
        )
    }

    /// Draw frames until the event source asks to quit. Returns the number of
    /// frames drawn; the first fatal error ends the loop.
    pub fn run<E: EventSource>(&mut self, events: &mut E) -> EngineResult<u64> {
        if self.resources.is_none() {
            return Err(EngineError::NotInitialized);
        }

        log::info!("Entering frame loop");
        let mut pending = Vec::new();
        let mut drawn = 0u64;

        'frames: loop {
            events.poll_events(&mut pending);
            for event in pending.drain(..) {
                if self.handle_event(event) == LoopControl::Stop {
                    break 'frames;
                }
            }

            self.draw_frame()?;
            drawn += 1;
        }

        log::info!("Frame loop finished after {} frames", drawn);
        Ok(drawn)
    }

    /// Release everything init() created. No-op when init never succeeded,
    /// and only the first call does anything.
    pub fn cleanup(&mut self) {
        let Some(resources) = self.resources.take() else {
            return;
        };
        let gpu = self.gpu.as_ref();

        log::info!("Cleaning up engine...");
        if let Err(e) = gpu.wait_idle() {
            log::error!("vkDeviceWaitIdle failed during cleanup: {}", e);
        }

        resources.frames.destroy(gpu);
        resources.pipelines.destroy(gpu);
        gpu.destroy_pipeline_layout(resources.layout);
        resources.surface.destroy(gpu);

        log::info!("Engine cleanup complete");
    }
}

impl<G: GpuDevice> Drop for Engine<G> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
