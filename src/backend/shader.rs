// Shader module loading
//
// SPIR-V is read from disk at runtime. Any failure here is recoverable: the
// pipeline that needed the module simply stays empty.

use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::gpu::GpuDevice;
use crate::error::{EngineError, EngineResult};

/// Load a SPIR-V file and create a shader module from it
pub fn load_shader_module<G: GpuDevice>(gpu: &G, path: &Path) -> EngineResult<vk::ShaderModule> {
    let bytes = std::fs::read(path).map_err(|source| EngineError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    })?;

    // read_spv checks the length and magic number and fixes endianness
    let code = ash::util::read_spv(&mut Cursor::new(&bytes)).map_err(|source| {
        EngineError::ShaderLoad {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let module = gpu
        .create_shader_module(&code)
        .map_err(|result| EngineError::ShaderModule {
            path: path.to_path_buf(),
            result,
        })?;

    log::debug!("Loaded shader module {:?} ({} words)", path, code.len());
    Ok(module)
}
