//! SPIR-V loading and `VkShaderModule` ownership.
//!
//! Shaders are consumed as precompiled SPIR-V. [`Shader`] pairs the module
//! handle with its stage and entry point so pipeline builders can ask it
//! for a ready-made stage create info.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use ember_rhi::device::Device;
//! use ember_rhi::shader::{Shader, ShaderStage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), ember_rhi::RhiError> {
//! let vertex = Shader::from_spirv_file(
//!     device.clone(),
//!     Path::new("shaders/mesh.vert.spv"),
//!     ShaderStage::Vertex,
//!     "main",
//! )?;
//! let _stage = vertex.stage_create_info();
//! # Ok(())
//! # }
//! ```

use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Pipeline stage a shader module plugs into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// Matching Vulkan stage flag.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    /// Lowercase stage name, used in logs and error messages.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A compiled shader module plus the metadata pipelines need.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
}

impl Shader {
    /// Reads a SPIR-V binary from disk and wraps it in a module.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Shader`] when the file cannot be read or does
    /// not hold valid SPIR-V, and a Vulkan error when module creation
    /// fails.
    pub fn from_spirv_file(
        device: Arc<Device>,
        path: &Path,
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage, path);
        let bytes = std::fs::read(path)
            .map_err(|e| RhiError::Shader(format!("failed to read {:?}: {}", path, e)))?;
        Self::from_spirv_bytes(device, &bytes, stage, entry_point)
    }

    /// Wraps in-memory SPIR-V in a module.
    ///
    /// The words are validated through `ash::util::read_spv`, which also
    /// fixes up byte order should the binary come from a big-endian
    /// toolchain.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Shader`] for malformed SPIR-V or an entry
    /// point name with interior NULs.
    pub fn from_spirv_bytes(
        device: Arc<Device>,
        bytes: &[u8],
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        let code = parse_spirv(bytes)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        let entry_point = CString::new(entry_point)
            .map_err(|e| RhiError::Shader(format!("invalid entry point name: {}", e)))?;

        info!(
            "Created {} shader module ({} words, entry '{}')",
            stage,
            code.len(),
            entry_point.to_string_lossy()
        );

        Ok(Self {
            device,
            module,
            stage,
            entry_point,
        })
    }

    /// Raw module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage this shader was loaded for.
    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Entry point name as a C string.
    #[inline]
    pub fn entry_point(&self) -> &std::ffi::CStr {
        &self.entry_point
    }

    /// Stage create info for pipeline creation.
    ///
    /// Borrows the entry point name, so the returned struct must not
    /// outlive this shader.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

/// Decodes raw bytes into SPIR-V words, checking alignment and magic.
fn parse_spirv(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    let mut cursor = std::io::Cursor::new(bytes);
    ash::util::read_spv(&mut cursor).map_err(|e| RhiError::Shader(format!("invalid SPIR-V: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC_LE: [u8; 4] = 0x0723_0203u32.to_le_bytes();

    #[test]
    fn test_stage_flags() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(
            ShaderStage::Compute.to_vk_stage(),
            vk::ShaderStageFlags::COMPUTE
        );
    }

    #[test]
    fn test_stage_display_matches_name() {
        for stage in [ShaderStage::Vertex, ShaderStage::Fragment, ShaderStage::Compute] {
            assert_eq!(format!("{}", stage), stage.name());
        }
    }

    #[test]
    fn test_parse_spirv_rejects_unaligned_input() {
        assert!(parse_spirv(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_parse_spirv_rejects_missing_magic() {
        assert!(parse_spirv(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_parse_spirv_accepts_magic_header() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&SPIRV_MAGIC_LE);
        bytes.extend_from_slice(&[0u8; 16]);
        let words = parse_spirv(&bytes).expect("valid header should parse");
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], 0x0723_0203);
    }
}
