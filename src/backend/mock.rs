// Recording GPU for tests
//
// Simulates just enough of a device to drive the frame core: fences that
// signal when their submission "completes", binary semaphores, and a
// swapchain of k images handed out round robin. Misuse that a validation
// layer would catch is pushed onto `violations` instead of panicking, so
// tests can assert on it.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{HashMap, HashSet};
use std::ffi::CStr;
use std::path::{Path, PathBuf};

use super::gpu::{GpuDevice, SurfaceSupport};

/// Fixed-function state captured from one vkCreateGraphicsPipelines call
#[derive(Debug, Clone)]
pub struct PipelineRecord {
    pub handle: vk::Pipeline,
    pub stages: Vec<(vk::ShaderStageFlags, vk::ShaderModule)>,
    pub entry_points: Vec<String>,
    pub viewport_count: u32,
    pub scissor_count: u32,
    pub attachment_count: u32,
    pub logic_op_enable: bool,
    pub samples: vk::SampleCountFlags,
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub framebuffer: vk::Framebuffer,
    /// Swapchain image behind `framebuffer`
    pub image: vk::Image,
    pub wait_stage: vk::PipelineStageFlags,
    pub fence: vk::Fence,
    pub completed: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct FenceState {
    signaled: bool,
    /// A submission that has not completed yet will signal it
    pending: bool,
}

#[derive(Debug, Default)]
pub struct MockState {
    /// Every GPU entry point hit, in order, by Vulkan name
    pub calls: Vec<&'static str>,
    pub destroy_calls: usize,
    pub fences_created_signaled: usize,
    pub violations: Vec<String>,

    pub pipelines: Vec<PipelineRecord>,
    /// framebuffer -> (attached view, render pass)
    pub framebuffers: HashMap<vk::Framebuffer, (vk::ImageView, vk::RenderPass)>,
    /// view -> viewed image
    pub views: HashMap<vk::ImageView, vk::Image>,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,

    pub submissions: Vec<Submission>,
    /// Presented image indices
    pub presents: Vec<u32>,
    pub command_buffer_resets: usize,
    pub one_time_submits: usize,
    pub clear_values: Vec<[f32; 4]>,
    pub bound_pipelines: Vec<vk::Pipeline>,
    /// (vertex_count, instance_count)
    pub draws: Vec<(u32, u32)>,

    /// Submissions never complete
    pub hang_gpu: bool,
    pub acquire_error: Option<vk::Result>,
    pub acquire_suboptimal: bool,
    pub present_error: Option<vk::Result>,
    pub present_suboptimal: bool,

    image_count: u32,
    images: Vec<vk::Image>,
    next_image: u32,
    next_handle: u64,
    failing: HashMap<&'static str, vk::Result>,
    live: HashMap<u64, &'static str>,
    fences: HashMap<vk::Fence, FenceState>,
    signaled_semaphores: HashSet<vk::Semaphore>,
    recorded_framebuffer: HashMap<vk::CommandBuffer, vk::Framebuffer>,
}

impl MockState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn create(&mut self, kind: &'static str) -> u64 {
        let raw = self.handle();
        self.live.insert(raw, kind);
        raw
    }

    fn destroy(&mut self, call: &'static str, raw: u64) {
        self.calls.push(call);
        self.destroy_calls += 1;
        if self.live.remove(&raw).is_none() {
            self.violations
                .push(format!("{call} on unknown or already destroyed handle {raw:#x}"));
        }
    }

    fn pending(&self, cmd: vk::CommandBuffer) -> bool {
        self.submissions
            .iter()
            .any(|s| s.command_buffer == cmd && !s.completed)
    }

    /// Queue is in order: completing one submission completes every earlier one
    fn complete_through(&mut self, last: usize) {
        for submission in &mut self.submissions[..=last] {
            if !submission.completed {
                submission.completed = true;
                if let Some(fence) = self.fences.get_mut(&submission.fence) {
                    fence.signaled = true;
                    fence.pending = false;
                }
            }
        }
    }

    fn complete_all(&mut self) {
        if !self.submissions.is_empty() {
            let last = self.submissions.len() - 1;
            self.complete_through(last);
        }
    }
}

pub struct MockGpu {
    state: RefCell<MockState>,
}

impl MockGpu {
    /// Device whose swapchains always hold `image_count` images
    pub fn new(image_count: u32) -> Self {
        let state = MockState {
            image_count,
            next_handle: 0x10_0000,
            surface_formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            ..Default::default()
        };
        Self {
            state: RefCell::new(state),
        }
    }

    /// Make every later call named `name` fail
    pub fn fail_call(&self, name: &'static str) {
        self.fail_call_with(name, vk::Result::ERROR_INITIALIZATION_FAILED);
    }

    pub fn fail_call_with(&self, name: &'static str, result: vk::Result) {
        self.state.borrow_mut().failing.insert(name, result);
    }

    pub fn state(&self) -> Ref<'_, MockState> {
        self.state.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, MockState> {
        self.state.borrow_mut()
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state
            .borrow()
            .fences
            .get(&fence)
            .is_some_and(|f| f.signaled)
    }

    /// Objects created and not yet destroyed (command buffers excluded)
    pub fn live_objects(&self) -> usize {
        self.state.borrow().live.len()
    }

    fn enter(&self, call: &'static str) -> VkResult<RefMut<'_, MockState>> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call);
        if let Some(&result) = state.failing.get(call) {
            return Err(result);
        }
        Ok(state)
    }

    fn record(&self, call: &'static str) -> RefMut<'_, MockState> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call);
        state
    }
}

impl GpuDevice for MockGpu {
    fn graphics_queue_family(&self) -> u32 {
        0
    }

    fn surface(&self) -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(0xface)
    }

    fn surface_support(&self) -> VkResult<SurfaceSupport> {
        let state = self.enter("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        Ok(SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 0,
                current_extent: vk::Extent2D {
                    width: 640,
                    height: 320,
                },
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: state.surface_formats.clone(),
            present_modes: state.present_modes.clone(),
        })
    }

    fn wait_idle(&self) -> VkResult<()> {
        let mut state = self.enter("vkDeviceWaitIdle")?;
        state.complete_all();
        Ok(())
    }

    fn create_swapchain(&self, _info: &vk::SwapchainCreateInfoKHR) -> VkResult<vk::SwapchainKHR> {
        let mut state = self.enter("vkCreateSwapchainKHR")?;
        let raw = state.create("swapchain");
        let images: Vec<vk::Image> = (0..state.image_count)
            .map(|_| {
                let raw = state.handle();
                vk::Image::from_raw(raw)
            })
            .collect();
        state.images = images;
        state.next_image = 0;
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, _swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let state = self.enter("vkGetSwapchainImagesKHR")?;
        Ok(state.images.clone())
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.state
            .borrow_mut()
            .destroy("vkDestroySwapchainKHR", swapchain.as_raw());
    }

    fn acquire_next_image(
        &self,
        _swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut state = self.enter("vkAcquireNextImageKHR")?;
        if let Some(error) = state.acquire_error {
            return Err(error);
        }
        if state.image_count == 0 {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        if !state.signaled_semaphores.insert(signal) {
            state
                .violations
                .push(format!("acquire signals semaphore {signal:?} that is already signaled"));
        }
        let index = state.next_image % state.image_count;
        state.next_image += 1;
        Ok((index, state.acquire_suboptimal))
    }

    fn queue_present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut state = self.enter("vkQueuePresentKHR")?;
        if let Some(error) = state.present_error {
            return Err(error);
        }
        if !state.signaled_semaphores.remove(&wait) {
            state
                .violations
                .push(format!("present waits on unsignaled semaphore {wait:?}"));
        }
        let image = state.images.get(image_index as usize).copied();
        let rendered = state.submissions.last().map(|s| s.image);
        if image.is_none() || image != rendered {
            state.violations.push(format!(
                "presented image {image_index} is not the one last rendered"
            ));
        }
        state.presents.push(image_index);
        Ok(state.present_suboptimal)
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> VkResult<vk::ImageView> {
        let mut state = self.enter("vkCreateImageView")?;
        let view = vk::ImageView::from_raw(state.create("image view"));
        state.views.insert(view, info.image);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state
            .borrow_mut()
            .destroy("vkDestroyImageView", view.as_raw());
    }

    fn create_render_pass(&self, _info: &vk::RenderPassCreateInfo) -> VkResult<vk::RenderPass> {
        let mut state = self.enter("vkCreateRenderPass")?;
        Ok(vk::RenderPass::from_raw(state.create("render pass")))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state
            .borrow_mut()
            .destroy("vkDestroyRenderPass", render_pass.as_raw());
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> VkResult<vk::Framebuffer> {
        let mut state = self.enter("vkCreateFramebuffer")?;
        let view = if info.attachment_count > 0 {
            unsafe { *info.p_attachments }
        } else {
            vk::ImageView::null()
        };
        let framebuffer = vk::Framebuffer::from_raw(state.create("framebuffer"));
        state
            .framebuffers
            .insert(framebuffer, (view, info.render_pass));
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state
            .borrow_mut()
            .destroy("vkDestroyFramebuffer", framebuffer.as_raw());
    }

    fn create_shader_module(&self, _code: &[u32]) -> VkResult<vk::ShaderModule> {
        let mut state = self.enter("vkCreateShaderModule")?;
        Ok(vk::ShaderModule::from_raw(state.create("shader module")))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.state
            .borrow_mut()
            .destroy("vkDestroyShaderModule", module.as_raw());
    }

    fn create_pipeline_layout(
        &self,
        _info: &vk::PipelineLayoutCreateInfo,
    ) -> VkResult<vk::PipelineLayout> {
        let mut state = self.enter("vkCreatePipelineLayout")?;
        Ok(vk::PipelineLayout::from_raw(state.create("pipeline layout")))
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.state
            .borrow_mut()
            .destroy("vkDestroyPipelineLayout", layout.as_raw());
    }

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> VkResult<vk::Pipeline> {
        let mut state = self.enter("vkCreateGraphicsPipelines")?;

        // The create info only borrows caller memory for the duration of the call
        let (stages, entry_points) = unsafe {
            let stages = std::slice::from_raw_parts(info.p_stages, info.stage_count as usize);
            (
                stages.iter().map(|s| (s.stage, s.module)).collect(),
                stages
                    .iter()
                    .map(|s| CStr::from_ptr(s.p_name).to_string_lossy().into_owned())
                    .collect(),
            )
        };
        let viewport = unsafe { &*info.p_viewport_state };
        let blend = unsafe { &*info.p_color_blend_state };
        let multisample = unsafe { &*info.p_multisample_state };

        let handle = vk::Pipeline::from_raw(state.create("pipeline"));
        state.pipelines.push(PipelineRecord {
            handle,
            stages,
            entry_points,
            viewport_count: viewport.viewport_count,
            scissor_count: viewport.scissor_count,
            attachment_count: blend.attachment_count,
            logic_op_enable: blend.logic_op_enable != vk::FALSE,
            samples: multisample.rasterization_samples,
            render_pass: info.render_pass,
            layout: info.layout,
        });
        Ok(handle)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state
            .borrow_mut()
            .destroy("vkDestroyPipeline", pipeline.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.enter("vkCreateFence")?;
        let fence = vk::Fence::from_raw(state.create("fence"));
        state.fences.insert(
            fence,
            FenceState {
                signaled,
                pending: false,
            },
        );
        if signaled {
            state.fences_created_signaled += 1;
        }
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.borrow_mut();
        if state.fences.remove(&fence).is_some_and(|f| f.pending) {
            state
                .violations
                .push(format!("fence {fence:?} destroyed while in use"));
        }
        state.destroy("vkDestroyFence", fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        let mut state = self.enter("vkWaitForFences")?;
        let Some(current) = state.fences.get(&fence).copied() else {
            state
                .violations
                .push(format!("wait on unknown fence {fence:?}"));
            return Err(vk::Result::ERROR_DEVICE_LOST);
        };
        if current.signaled {
            return Ok(());
        }
        if !current.pending || state.hang_gpu {
            return Err(vk::Result::TIMEOUT);
        }
        let last = state
            .submissions
            .iter()
            .rposition(|s| s.fence == fence && !s.completed);
        if let Some(last) = last {
            state.complete_through(last);
        }
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.enter("vkResetFences")?;
        let pending = match state.fences.get_mut(&fence) {
            Some(f) => {
                f.signaled = false;
                f.pending
            }
            None => false,
        };
        if pending {
            state
                .violations
                .push(format!("fence {fence:?} reset while its submission is pending"));
        }
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.enter("vkCreateSemaphore")?;
        Ok(vk::Semaphore::from_raw(state.create("semaphore")))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.borrow_mut();
        state.signaled_semaphores.remove(&semaphore);
        state.destroy("vkDestroySemaphore", semaphore.as_raw());
    }

    fn create_command_pool(&self, _info: &vk::CommandPoolCreateInfo) -> VkResult<vk::CommandPool> {
        let mut state = self.enter("vkCreateCommandPool")?;
        Ok(vk::CommandPool::from_raw(state.create("command pool")))
    }

    fn allocate_command_buffers(
        &self,
        _pool: vk::CommandPool,
        count: u32,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut state = self.enter("vkAllocateCommandBuffers")?;
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(state.handle()))
            .collect())
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.state
            .borrow_mut()
            .destroy("vkDestroyCommandPool", pool.as_raw());
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.enter("vkResetCommandBuffer")?;
        if state.pending(cmd) {
            state
                .violations
                .push(format!("command buffer {cmd:?} reset while pending"));
        }
        state.recorded_framebuffer.remove(&cmd);
        state.command_buffer_resets += 1;
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer, one_time_submit: bool) -> VkResult<()> {
        let mut state = self.enter("vkBeginCommandBuffer")?;
        if state.pending(cmd) {
            state
                .violations
                .push(format!("command buffer {cmd:?} recorded while pending"));
        }
        if one_time_submit {
            state.one_time_submits += 1;
        }
        Ok(())
    }

    fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> VkResult<()> {
        self.enter("vkEndCommandBuffer").map(|_| ())
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        _render_area: vk::Rect2D,
        clear_value: vk::ClearValue,
    ) {
        let mut state = self.record("vkCmdBeginRenderPass");
        state.clear_values.push(unsafe { clear_value.color.float32 });
        state.recorded_framebuffer.insert(cmd, framebuffer);
    }

    fn cmd_bind_pipeline(&self, _cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.record("vkCmdBindPipeline").bound_pipelines.push(pipeline);
    }

    fn cmd_draw(&self, _cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32) {
        self.record("vkCmdDraw")
            .draws
            .push((vertex_count, instance_count));
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {
        self.record("vkCmdEndRenderPass");
    }

    fn queue_submit(
        &self,
        cmd: vk::CommandBuffer,
        wait: vk::Semaphore,
        wait_stage: vk::PipelineStageFlags,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut state = self.enter("vkQueueSubmit")?;

        if !state.signaled_semaphores.remove(&wait) {
            state
                .violations
                .push(format!("submit waits on unsignaled semaphore {wait:?}"));
        }
        if wait_stage != vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT {
            state
                .violations
                .push(format!("submit waits at stage {wait_stage:?}"));
        }
        let fence_ready = match state.fences.get_mut(&fence) {
            Some(f) if !f.signaled && !f.pending => {
                f.pending = true;
                true
            }
            _ => false,
        };
        if !fence_ready {
            state
                .violations
                .push(format!("submit with fence {fence:?} that is signaled or in use"));
        }
        if state.pending(cmd) {
            state
                .violations
                .push(format!("command buffer {cmd:?} submitted while pending"));
        }
        state.signaled_semaphores.insert(signal);

        let framebuffer = state
            .recorded_framebuffer
            .get(&cmd)
            .copied()
            .unwrap_or_default();
        let image = state
            .framebuffers
            .get(&framebuffer)
            .and_then(|(view, _)| state.views.get(view))
            .copied()
            .unwrap_or_default();

        state.submissions.push(Submission {
            command_buffer: cmd,
            framebuffer,
            image,
            wait_stage,
            fence,
            completed: false,
        });
        Ok(())
    }
}

/// Write a minimal little-endian SPIR-V blob into `dir`
pub fn write_spv(dir: &Path, name: &str) -> PathBuf {
    let words: [u32; 5] = [0x0723_0203, 0x0001_0000, 0, 1, 0];
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    write_temp_file(dir, name, &bytes)
}

/// `dir` is a test's own TempDir, removed with everything in it on drop
pub fn write_temp_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}
