// =============================================================================
// FRAME LOOP - wait -> acquire -> record -> submit -> present
// =============================================================================
//
// FRAME TIMELINE (one slot):
// ┌──────────────────────────────────────────────────────────────────────┐
// │  wait fence ─> reset fence ─> acquire ─> reset cmd ─> record        │
// │       ─> submit (wait acquired, signal finished + fence) ─> present  │
// └──────────────────────────────────────────────────────────────────────┘
//
// The fence wait is the only thing that keeps the CPU from touching a
// command buffer the GPU is still reading. Every failure in here is fatal.
//
// =============================================================================

use ash::vk;

use crate::backend::gpu::GpuDevice;
use crate::backend::pipeline::CompiledPipeline;
use crate::backend::swapchain::SurfaceResources;
use crate::backend::sync::FrameSyncRing;
use crate::error::{EngineError, EngineResult, VkResultExt};

/// Every pipeline draws one hard-coded triangle
pub const TRIANGLE_VERTEX_COUNT: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct FrameTimeouts {
    pub fence_ns: u64,
    pub acquire_ns: u64,
}

impl Default for FrameTimeouts {
    fn default() -> Self {
        Self {
            fence_ns: 1_000_000_000,
            acquire_ns: 1_000_000_000,
        }
    }
}

/// Clear color for a frame: blue flashing with |sin(n / period)|
pub fn clear_color(frame_number: u64, period: f32) -> [f32; 4] {
    let flash = (frame_number as f32 / period).sin().abs();
    [0.0, 0.0, flash, 1.0]
}

/// What a finished frame did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub frame_number: u64,
    pub image_index: u32,
    /// False when the selected pipeline slot was empty and only the clear ran
    pub drew: bool,
}

pub struct FrameLoop {
    sync: FrameSyncRing,
    /// Fence of the slot that last rendered each swapchain image
    image_fences: Vec<vk::Fence>,
    frame_number: u64,
    timeouts: FrameTimeouts,
    clear_color_period: f32,
}

impl FrameLoop {
    pub fn new(
        sync: FrameSyncRing,
        image_count: usize,
        timeouts: FrameTimeouts,
        clear_color_period: f32,
    ) -> Self {
        Self {
            sync,
            image_fences: vec![vk::Fence::null(); image_count],
            frame_number: 0,
            timeouts,
            clear_color_period,
        }
    }

    #[cfg(test)]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Run one full frame. `pipeline` is None when the selected slot is empty.
    pub fn draw<G: GpuDevice>(
        &mut self,
        gpu: &G,
        surface: &SurfaceResources,
        pipeline: Option<&CompiledPipeline>,
    ) -> EngineResult<FrameReport> {
        let sync = self.sync.current();
        let fence = sync.render_fence;
        let cmd = sync.command_buffer;
        let image_acquired = sync.image_acquired;
        let render_finished = sync.render_finished;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until the GPU is done with this slot, then re-arm it
        // ─────────────────────────────────────────────────────────────────────
        wait_fence(gpu, fence, self.timeouts.fence_ns)?;
        gpu.reset_fence(fence).call("vkResetFences")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire the next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let image_index = match gpu.acquire_next_image(
            surface.swapchain,
            self.timeouts.acquire_ns,
            image_acquired,
        ) {
            Ok((_, true)) => return Err(EngineError::SwapchainSuboptimal),
            Ok((index, false)) => index,
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                return Err(EngineError::AcquireTimeout {
                    timeout_ns: self.timeouts.acquire_ns,
                })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Err(EngineError::SwapchainOutOfDate),
            Err(result) => {
                return Err(EngineError::Vulkan {
                    call: "vkAcquireNextImageKHR",
                    result,
                })
            }
        };

        // With several slots the image may still be in use by another one.
        // Our own fence was already waited on and is now reset.
        let previous = self.image_fences[image_index as usize];
        if previous != vk::Fence::null() && previous != fence {
            wait_fence(gpu, previous, self.timeouts.fence_ns)?;
        }
        self.image_fences[image_index as usize] = fence;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Re-record the command buffer
        // ─────────────────────────────────────────────────────────────────────
        gpu.reset_command_buffer(cmd).call("vkResetCommandBuffer")?;
        gpu.begin_command_buffer(cmd, true)
            .call("vkBeginCommandBuffer")?;

        let clear_value = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color(self.frame_number, self.clear_color_period),
            },
        };
        gpu.cmd_begin_render_pass(
            cmd,
            surface.render_pass,
            surface.framebuffer(image_index),
            surface.render_area(),
            clear_value,
        );

        let drew = match pipeline {
            Some(pipeline) => {
                gpu.cmd_bind_pipeline(cmd, pipeline.handle());
                gpu.cmd_draw(cmd, TRIANGLE_VERTEX_COUNT, 1);
                true
            }
            None => false,
        };

        gpu.cmd_end_render_pass(cmd);
        gpu.end_command_buffer(cmd).call("vkEndCommandBuffer")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Submit - render once the image is acquired, then signal
        // ─────────────────────────────────────────────────────────────────────
        gpu.queue_submit(
            cmd,
            image_acquired,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            render_finished,
            fence,
        )
        .call("vkQueueSubmit")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Present once rendering finished
        // ─────────────────────────────────────────────────────────────────────
        match gpu.queue_present(surface.swapchain, image_index, render_finished) {
            Ok(false) => {}
            Ok(true) => return Err(EngineError::SwapchainSuboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Err(EngineError::SwapchainOutOfDate),
            Err(result) => {
                return Err(EngineError::Vulkan {
                    call: "vkQueuePresentKHR",
                    result,
                })
            }
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Advance
        // ─────────────────────────────────────────────────────────────────────
        let report = FrameReport {
            frame_number: self.frame_number,
            image_index,
            drew,
        };
        log::trace!("Frame {:?}", report);

        self.frame_number += 1;
        self.sync.advance();

        Ok(report)
    }

    /// Caller must have drained the GPU first
    pub fn destroy<G: GpuDevice>(self, gpu: &G) {
        self.sync.destroy(gpu);
    }
}

fn wait_fence<G: GpuDevice>(gpu: &G, fence: vk::Fence, timeout_ns: u64) -> EngineResult<()> {
    match gpu.wait_for_fence(fence, timeout_ns) {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(EngineError::FenceTimeout { timeout_ns }),
        Err(result) => Err(EngineError::Vulkan {
            call: "vkWaitForFences",
            result,
        }),
    }
}
