//! The GPU operations the renderer needs, independent of any particular API
//!
//! All work is submitted in call order on a single device context. Read-backs block until every
//! prior operation has completed.

use crate::colorimetry::Mat4;
use crate::error::GpuError;

pub mod vulkan;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UniformType {
    Float,
    Int,
    Vec3,
    Vec4,
    Mat4,
    FloatArray(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4(Mat4),
    FloatArray(Vec<f32>),
}

impl UniformValue {
    pub fn ty(&self) -> UniformType {
        match *self {
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
            UniformValue::Mat4(_) => UniformType::Mat4,
            UniformValue::FloatArray(ref x) => UniformType::FloatArray(x.len() as u32),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformDecl {
    pub name: String,
    pub ty: UniformType,
}

impl UniformDecl {
    pub fn new(name: &str, ty: UniformType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextureDim {
    D1,
    D2,
    D3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDecl {
    pub name: String,
    pub dim: TextureDim,
}

impl SamplerDecl {
    pub fn new(name: &str, dim: TextureDim) -> Self {
        Self {
            name: name.into(),
            dim,
        }
    }
}

/// A vertex input of the host's view-ray vertex shader
#[derive(Debug, Clone, PartialEq)]
pub struct VertexAttribute {
    pub name: String,
    pub location: u32,
    /// Number of `f32` components
    pub components: u32,
}

/// The host's camera model, opaque to the renderer
///
/// `fragment_source` must define `vec3 calcViewDir()` returning the unit view direction of the
/// current fragment. Every surface pass links it in.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRayShader {
    pub fragment_source: String,
    pub vertex_source: String,
    pub vertex_attributes: Vec<VertexAttribute>,
    /// Uniforms the host sets from its surface callback
    pub uniforms: Vec<UniformDecl>,
}

impl ViewRayShader {
    /// Floats per vertex, as laid out by `vertex_attributes`
    pub fn vertex_stride(&self) -> u32 {
        self.vertex_attributes.iter().map(|a| a.components).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VertexStage {
    /// The host's view-ray vertex shader; geometry comes from the surface callback
    Host {
        source: String,
        attributes: Vec<VertexAttribute>,
    },
    /// Built-in stage covering the target with one triangle
    Fullscreen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramDesc {
    /// Used in diagnostics
    pub name: String,
    pub fragment_source: String,
    pub vertex: VertexStage,
    pub uniforms: Vec<UniformDecl>,
    pub samplers: Vec<SamplerDecl>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub dim: TextureDim,
    /// Unused trailing dimensions are 1
    pub extent: [u32; 3],
}

impl TextureDesc {
    pub fn from_sizes(sizes: &[u32]) -> Self {
        let dim = match sizes.len() {
            1 => TextureDim::D1,
            2 => TextureDim::D2,
            _ => TextureDim::D3,
        };
        let mut extent = [1; 3];
        for (e, &s) in extent.iter_mut().zip(sizes.iter()) {
            *e = s;
        }
        // Anything beyond three dimensions is folded into depth
        for &s in sizes.iter().skip(3) {
            extent[2] *= s;
        }
        Self { dim, extent }
    }

    pub fn texel_count(&self) -> usize {
        self.extent.iter().map(|&x| x as usize).product()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Luminance,
    /// Spectral radiance of one wavelength set
    Radiance { layer: u32 },
    /// Scratch target for point queries
    Probe,
}

pub struct DrawCall<'a, G: Gpu + ?Sized> {
    pub program: &'a G::Program,
    pub target: Target,
    pub uniforms: Vec<(&'static str, UniformValue)>,
    pub textures: Vec<(&'static str, &'a G::Texture)>,
    /// Restrict rasterization to one pixel
    pub scissor: Option<(u32, u32)>,
}

/// A pass drawing a `width` × `height` grid with the fullscreen vertex stage
pub struct OffscreenCall<'a, G: Gpu + ?Sized> {
    pub program: &'a G::Program,
    pub width: u32,
    pub height: u32,
    pub uniforms: Vec<(&'static str, UniformValue)>,
    pub textures: Vec<(&'static str, &'a G::Texture)>,
}

/// Handed to the host's surface callback once the pass program is bound
pub trait SurfaceDraw {
    /// Set a uniform declared in `ViewRayShader::uniforms`
    fn set_uniform(&mut self, name: &str, value: UniformValue);
    /// Submit triangles, interleaved per `ViewRayShader::vertex_attributes`
    fn draw_triangles(&mut self, vertices: &[f32]);
}

pub trait Gpu {
    /// Freed when dropped
    type Texture;
    /// Freed when dropped
    type Program;

    fn compile_program(&mut self, desc: &ProgramDesc) -> Result<Self::Program, GpuError>;

    /// Compile the shader stages of `desc` and discard them, building no pipeline
    fn check_program(&mut self, desc: &ProgramDesc) -> Result<(), GpuError>;

    fn upload_texture(
        &mut self,
        desc: &TextureDesc,
        texels: &[[f32; 4]],
    ) -> Result<Self::Texture, GpuError>;

    /// Reallocate every render target, discarding its contents
    fn resize_targets(
        &mut self,
        width: u32,
        height: u32,
        radiance_layers: u32,
    ) -> Result<(), GpuError>;

    fn clear_target(&mut self, target: Target) -> Result<(), GpuError>;

    /// Blend one pass additively into `call.target`
    ///
    /// `surface` is invoked once, with the program bound, to supply the geometry.
    fn draw(
        &mut self,
        call: &DrawCall<'_, Self>,
        surface: &mut dyn FnMut(&mut dyn SurfaceDraw),
    ) -> Result<(), GpuError>;

    fn read_target_pixel(&mut self, target: Target, x: u32, y: u32)
        -> Result<[f32; 4], GpuError>;

    /// Render into a fresh target and read it back, row-major
    fn render_offscreen(&mut self, call: &OffscreenCall<'_, Self>)
        -> Result<Vec<[f32; 4]>, GpuError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_desc_folds_extra_dimensions() {
        let desc = TextureDesc::from_sizes(&[4, 3, 2, 5]);
        assert_eq!(desc.dim, TextureDim::D3);
        assert_eq!(desc.extent, [4, 3, 10]);
        let desc = TextureDesc::from_sizes(&[7]);
        assert_eq!(desc.dim, TextureDim::D1);
        assert_eq!(desc.extent, [7, 1, 1]);
        assert_eq!(desc.texel_count(), 7);
    }
}
