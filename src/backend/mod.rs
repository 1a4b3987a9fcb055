// Backend module - Vulkan abstraction layer
//
// Everything above this module talks to the GPU through the GpuDevice trait.

pub mod device;
pub mod gpu;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
pub mod mock;

pub use device::VulkanDevice;
