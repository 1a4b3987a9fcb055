// Swapchain and everything bound to its images
//
// images[i], image_views[i] and framebuffers[i] always describe the same
// swapchain image. Built once; the surface is never resized.

use ash::vk;

use super::gpu::GpuDevice;
use crate::error::{EngineError, EngineResult, VkResultExt};

pub struct SurfaceResources {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    /// Shared by every framebuffer
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl SurfaceResources {
    pub fn new<G: GpuDevice>(
        gpu: &G,
        requested: vk::Extent2D,
        present_mode: vk::PresentModeKHR,
    ) -> EngineResult<Self> {
        let support = gpu
            .surface_support()
            .call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;

        let surface_format =
            choose_surface_format(&support.formats).ok_or(EngineError::NoSurfaceFormat)?;
        let present_mode = choose_present_mode(&support.present_modes, present_mode);
        let extent = choose_extent(&support.capabilities, requested);
        let image_count = choose_image_count(&support.capabilities);

        log::info!(
            "Creating swapchain: {}x{} {:?} {:?}",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(gpu.surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = gpu
            .create_swapchain(&create_info)
            .call("vkCreateSwapchainKHR")?;

        let mut resources = Self {
            swapchain,
            format: surface_format.format,
            extent,
            images: Vec::new(),
            image_views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
        };

        // Anything created before a failure is released again
        if let Err(e) = resources.create_attachments(gpu) {
            resources.destroy(gpu);
            return Err(e);
        }

        log::info!("Created swapchain with {} images", resources.images.len());
        Ok(resources)
    }

    fn create_attachments<G: GpuDevice>(&mut self, gpu: &G) -> EngineResult<()> {
        self.images = gpu
            .swapchain_images(self.swapchain)
            .call("vkGetSwapchainImagesKHR")?;

        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = gpu
                .create_image_view(&create_info)
                .call("vkCreateImageView")?;
            self.image_views.push(view);
        }

        self.render_pass = create_render_pass(gpu, self.format)?;

        for &view in &self.image_views {
            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer = gpu
                .create_framebuffer(&framebuffer_info)
                .call("vkCreateFramebuffer")?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Framebuffer wrapping the swapchain image at `image_index`
    pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }

    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }

    /// Caller must have drained the GPU first
    pub fn destroy<G: GpuDevice>(self, gpu: &G) {
        for &framebuffer in &self.framebuffers {
            gpu.destroy_framebuffer(framebuffer);
        }
        if self.render_pass != vk::RenderPass::null() {
            gpu.destroy_render_pass(self.render_pass);
        }
        for &view in &self.image_views {
            gpu.destroy_image_view(view);
        }
        // Images belong to the swapchain
        gpu.destroy_swapchain(self.swapchain);
    }
}

/// Single color attachment cleared on load and handed to presentation afterwards
fn create_render_pass<G: GpuDevice>(gpu: &G, format: vk::Format) -> EngineResult<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = [color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachments)
        .build();

    // The acquire semaphore is waited on at COLOR_ATTACHMENT_OUTPUT, so the
    // layout transition must not start earlier than that
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = [color_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    gpu.create_render_pass(&render_pass_info)
        .call("vkCreateRenderPass")
}

/// Prefer 8-bit BGRA sRGB, otherwise take whatever comes first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// FIFO is always supported
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    wanted: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&wanted) {
        wanted
    } else {
        if wanted != vk::PresentModeKHR::FIFO {
            log::warn!("Present mode {:?} unsupported, using FIFO", wanted);
        }
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: requested.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: requested.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum, within the maximum (0 = unbounded)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        image_count = capabilities.max_image_count;
    }
    image_count
}
