// Synchronization primitives
//
// Fences order CPU recording after the GPU finished with a slot,
// semaphores order acquire -> render -> present on the GPU.

use ash::vk;

use super::gpu::GpuDevice;
use crate::error::{EngineResult, VkResultExt};

/// Frame synchronization - one per frame in flight
#[derive(Debug)]
pub struct FrameSync {
    /// Signaled by the queue when this slot's submission completes
    pub render_fence: vk::Fence,
    /// Signaled by the presentation engine when the acquired image is ready
    pub image_acquired: vk::Semaphore,
    /// Signaled by the queue when rendering finished, presentation waits on it
    pub render_finished: vk::Semaphore,
    pub command_buffer: vk::CommandBuffer,
}

impl FrameSync {
    fn new<G: GpuDevice>(gpu: &G, command_buffer: vk::CommandBuffer) -> EngineResult<Self> {
        // Start signaled so the first wait returns immediately
        let render_fence = gpu.create_fence(true).call("vkCreateFence")?;

        let image_acquired = match gpu.create_semaphore().call("vkCreateSemaphore") {
            Ok(semaphore) => semaphore,
            Err(e) => {
                gpu.destroy_fence(render_fence);
                return Err(e);
            }
        };

        let render_finished = match gpu.create_semaphore().call("vkCreateSemaphore") {
            Ok(semaphore) => semaphore,
            Err(e) => {
                gpu.destroy_semaphore(image_acquired);
                gpu.destroy_fence(render_fence);
                return Err(e);
            }
        };

        Ok(Self {
            render_fence,
            image_acquired,
            render_finished,
            command_buffer,
        })
    }

    fn destroy<G: GpuDevice>(&self, gpu: &G) {
        gpu.destroy_fence(self.render_fence);
        gpu.destroy_semaphore(self.render_finished);
        gpu.destroy_semaphore(self.image_acquired);
    }
}

/// Ring of frame slots advanced modulo its length.
///
/// Owns the command pool every slot's command buffer comes from.
pub struct FrameSyncRing {
    command_pool: vk::CommandPool,
    slots: Vec<FrameSync>,
    current: usize,
}

impl FrameSyncRing {
    pub fn new<G: GpuDevice>(gpu: &G, frames_in_flight: usize) -> EngineResult<Self> {
        let frames_in_flight = frames_in_flight.max(1);

        // RESET_COMMAND_BUFFER: each slot resets its own buffer every frame
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(gpu.graphics_queue_family())
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = gpu
            .create_command_pool(&pool_info)
            .call("vkCreateCommandPool")?;

        let command_buffers = match gpu
            .allocate_command_buffers(command_pool, frames_in_flight as u32)
            .call("vkAllocateCommandBuffers")
        {
            Ok(buffers) => buffers,
            Err(e) => {
                gpu.destroy_command_pool(command_pool);
                return Err(e);
            }
        };

        let mut slots = Vec::with_capacity(frames_in_flight);
        for command_buffer in command_buffers {
            match FrameSync::new(gpu, command_buffer) {
                Ok(sync) => slots.push(sync),
                Err(e) => {
                    for sync in &slots {
                        sync.destroy(gpu);
                    }
                    gpu.destroy_command_pool(command_pool);
                    return Err(e);
                }
            }
        }

        log::info!("Created {} frame sync slot(s)", slots.len());

        Ok(Self {
            command_pool,
            slots,
            current: 0,
        })
    }

    pub fn current(&self) -> &FrameSync {
        &self.slots[self.current]
    }

    #[cfg(test)]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
    }

    /// Caller must have drained the GPU first
    pub fn destroy<G: GpuDevice>(self, gpu: &G) {
        for sync in &self.slots {
            sync.destroy(gpu);
        }
        // Frees the command buffers too
        gpu.destroy_command_pool(self.command_pool);
    }
}
