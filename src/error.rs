// Engine error kinds
//
// Two tiers: fatal errors stop the frame loop and lead to an orderly
// shutdown, recoverable ones only empty a pipeline slot.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

use crate::backend::pipeline::ShaderStageKind;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A Vulkan call returned an error code
    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    /// The GPU did not signal the frame fence in time
    #[error("timed out after {timeout_ns}ns waiting for the frame fence (GPU hang?)")]
    FenceTimeout { timeout_ns: u64 },

    #[error("timed out after {timeout_ns}ns acquiring a swapchain image")]
    AcquireTimeout { timeout_ns: u64 },

    #[error("swapchain is out of date")]
    SwapchainOutOfDate,

    #[error("swapchain is suboptimal for the surface")]
    SwapchainSuboptimal,

    #[error("surface reports no usable format")]
    NoSurfaceFormat,

    #[error("pipeline descriptor has no {0:?} shader stage")]
    MissingShaderStage(ShaderStageKind),

    #[error("pipeline descriptor has more than one {0:?} shader stage")]
    DuplicateShaderStage(ShaderStageKind),

    /// The driver rejected the pipeline
    #[error("failed to compile pipeline '{name}': {result}")]
    PipelineCompilation { name: String, result: vk::Result },

    #[error("failed to load shader {path:?}: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create shader module from {path:?}: {result}")]
    ShaderModule { path: PathBuf, result: vk::Result },

    #[error("engine is not initialized")]
    NotInitialized,
}

impl EngineError {
    /// Recoverable errors leave a pipeline slot empty; everything else ends the loop.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            EngineError::MissingShaderStage(_)
                | EngineError::DuplicateShaderStage(_)
                | EngineError::PipelineCompilation { .. }
                | EngineError::ShaderLoad { .. }
                | EngineError::ShaderModule { .. }
        )
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Tags a raw Vulkan result with the name of the call that produced it.
pub trait VkResultExt<T> {
    fn call(self, name: &'static str) -> EngineResult<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    fn call(self, name: &'static str) -> EngineResult<T> {
        self.map_err(|result| EngineError::Vulkan { call: name, result })
    }
}
