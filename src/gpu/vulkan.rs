//! `Gpu` implementation on Vulkan
//!
//! Model shaders are GLSL fragments written against a fixed interface. Each program gets a
//! generated prelude declaring its uniforms as one std140 block at binding 0 and its samplers at
//! the following bindings, and is compiled at runtime. Every operation is recorded into its own
//! command buffer and waited on, so work completes in call order.

use std::os::raw::c_char;
use std::{mem, ptr, sync::Arc};

use ash::version::{DeviceV1_0, InstanceV1_0};
use ash::{vk, Device, Instance};
use vk_shader_macros::include_glsl;

use super::{
    DrawCall, Gpu, OffscreenCall, ProgramDesc, SamplerDecl, SurfaceDraw, Target, TextureDesc,
    TextureDim, UniformDecl, UniformType, UniformValue, VertexAttribute, VertexStage,
};
use crate::error::GpuError;

const FULLSCREEN: &[u32] = include_glsl!("shaders/fullscreen.vert");

const TARGET_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;
const TABLE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// Upper bound on samplers per program
const MAX_SAMPLERS: u32 = 16;

/// Offset of one uniform within a program's block
#[derive(Debug, Clone, PartialEq)]
struct UniformSlot {
    name: String,
    ty: UniformType,
    offset: u32,
}

/// std140 placement of `uniforms`, and the size of the whole block
fn std140_layout(uniforms: &[UniformDecl]) -> (Vec<UniformSlot>, u32) {
    let mut offset = 0;
    let mut slots = Vec::with_capacity(uniforms.len());
    for u in uniforms {
        let (align, size) = match u.ty {
            UniformType::Float | UniformType::Int => (4, 4),
            UniformType::Vec3 => (16, 12),
            UniformType::Vec4 => (16, 16),
            UniformType::Mat4 => (16, 64),
            UniformType::FloatArray(n) => (16, 16 * n),
        };
        offset = align_up(offset, align);
        slots.push(UniformSlot {
            name: u.name.clone(),
            ty: u.ty,
            offset,
        });
        offset += size;
    }
    (slots, align_up(offset.max(4), 16))
}

fn align_up(x: u32, align: u32) -> u32 {
    (x + align - 1) / align * align
}

fn glsl_declaration(u: &UniformDecl) -> String {
    match u.ty {
        UniformType::Float => format!("float {};", u.name),
        UniformType::Int => format!("int {};", u.name),
        UniformType::Vec3 => format!("vec3 {};", u.name),
        UniformType::Vec4 => format!("vec4 {};", u.name),
        UniformType::Mat4 => format!("mat4 {};", u.name),
        UniformType::FloatArray(n) => format!("float {}[{}];", u.name, n),
    }
}

fn vector_type(components: u32) -> &'static str {
    match components {
        1 => "float",
        2 => "vec2",
        3 => "vec3",
        _ => "vec4",
    }
}

fn vertex_format(components: u32) -> vk::Format {
    match components {
        1 => vk::Format::R32_SFLOAT,
        2 => vk::Format::R32G32_SFLOAT,
        3 => vk::Format::R32G32B32_SFLOAT,
        _ => vk::Format::R32G32B32A32_SFLOAT,
    }
}

/// Declarations shared by both stages of a program
fn interface_prelude(uniforms: &[UniformDecl], samplers: &[SamplerDecl]) -> String {
    let mut out = String::from("#version 450\n");
    out.push_str("layout(set = 0, binding = 0, std140) uniform Uniforms {\n");
    if uniforms.is_empty() {
        out.push_str("    float unusedUniform;\n");
    }
    for u in uniforms {
        out.push_str("    ");
        out.push_str(&glsl_declaration(u));
        out.push('\n');
    }
    out.push_str("};\n");
    for (i, s) in samplers.iter().enumerate() {
        let ty = match s.dim {
            TextureDim::D1 => "sampler1D",
            TextureDim::D2 => "sampler2D",
            TextureDim::D3 => "sampler3D",
        };
        out.push_str(&format!(
            "layout(set = 0, binding = {}) uniform {} {};\n",
            i + 1,
            ty,
            s.name
        ));
    }
    out
}

fn fragment_prelude(uniforms: &[UniformDecl], samplers: &[SamplerDecl]) -> String {
    let mut out = interface_prelude(uniforms, samplers);
    out.push_str("layout(location = 0) out vec4 luminance;\n");
    out
}

fn vertex_prelude(
    uniforms: &[UniformDecl],
    samplers: &[SamplerDecl],
    attributes: &[VertexAttribute],
) -> String {
    let mut out = interface_prelude(uniforms, samplers);
    for a in attributes {
        out.push_str(&format!(
            "layout(location = {}) in {} {};\n",
            a.location,
            vector_type(a.components),
            a.name
        ));
    }
    out
}

fn find_memory_type(
    device_props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..device_props.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0
            && device_props.memory_types[i as usize]
                .property_flags
                .contains(flags)
    })
}

unsafe fn allocate(
    device: &Device,
    device_props: &vk::PhysicalDeviceMemoryProperties,
    reqs: vk::MemoryRequirements,
    flags: vk::MemoryPropertyFlags,
    what: &'static str,
) -> Result<vk::DeviceMemory, GpuError> {
    let ty = find_memory_type(device_props, reqs.memory_type_bits, flags)
        .ok_or(GpuError::NoMemoryType(what))?;
    Ok(device.allocate_memory(
        &vk::MemoryAllocateInfo {
            allocation_size: reqs.size,
            memory_type_index: ty,
            ..Default::default()
        },
        None,
    )?)
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn color_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

struct Image {
    handle: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

/// A sampled look-up table
pub struct VulkanTexture {
    device: Arc<Device>,
    image: Image,
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.image.view, None);
            self.device.destroy_image(self.image.handle, None);
            self.device.free_memory(self.image.memory, None);
        }
    }
}

pub struct VulkanProgram {
    device: Arc<Device>,
    name: String,
    ds_layout: vk::DescriptorSetLayout,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    uniforms: Vec<UniformSlot>,
    uniform_size: u32,
    samplers: Vec<SamplerDecl>,
    /// Floats per vertex; zero for the fullscreen stage
    vertex_stride: u32,
}

impl Drop for VulkanProgram {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
            self.device
                .destroy_descriptor_set_layout(self.ds_layout, None);
        }
    }
}

impl VulkanProgram {
    fn write_uniform(
        &self,
        block: &mut [u8],
        name: &str,
        value: &UniformValue,
    ) -> Result<(), GpuError> {
        let slot = self
            .uniforms
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| GpuError::UnknownUniform(format!("{} in {}", name, self.name)))?;
        if slot.ty != value.ty() {
            return Err(GpuError::UnknownUniform(format!(
                "{} in {} is {:?}, not {:?}",
                name,
                self.name,
                slot.ty,
                value.ty()
            )));
        }
        let at = slot.offset as usize;
        let mut put = |offset: usize, bytes: &[u8]| {
            block[at + offset..at + offset + bytes.len()].copy_from_slice(bytes);
        };
        match *value {
            UniformValue::Float(x) => put(0, bytemuck::bytes_of(&x)),
            UniformValue::Int(x) => put(0, bytemuck::bytes_of(&x)),
            UniformValue::Vec3(ref x) => put(0, bytemuck::cast_slice(&x[..])),
            UniformValue::Vec4(ref x) => put(0, bytemuck::cast_slice(&x[..])),
            UniformValue::Mat4(ref m) => {
                for (i, col) in m.iter().enumerate() {
                    put(16 * i, bytemuck::cast_slice(&col[..]));
                }
            }
            UniformValue::FloatArray(ref xs) => {
                for (i, x) in xs.iter().enumerate() {
                    put(16 * i, bytemuck::bytes_of(x));
                }
            }
        }
        Ok(())
    }

    /// Image views in binding order
    fn bind_textures(
        &self,
        textures: &[(&'static str, &VulkanTexture)],
    ) -> Result<Vec<vk::ImageView>, GpuError> {
        for &(name, _) in textures {
            if !self.samplers.iter().any(|s| s.name == name) {
                return Err(GpuError::UnknownSampler(format!("{} in {}", name, self.name)));
            }
        }
        self.samplers
            .iter()
            .map(|s| {
                textures
                    .iter()
                    .find(|&&(name, _)| name == s.name)
                    .map(|&(_, t)| t.image.view)
                    .ok_or_else(|| {
                        GpuError::Unsupported(format!("{} left unbound in {}", s.name, self.name))
                    })
            })
            .collect()
    }
}

struct RenderTarget {
    device: Arc<Device>,
    image: Image,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
            self.device.destroy_image_view(self.image.view, None);
            self.device.destroy_image(self.image.handle, None);
            self.device.free_memory(self.image.memory, None);
        }
    }
}

struct Targets {
    luminance: RenderTarget,
    probe: RenderTarget,
    radiance: Vec<RenderTarget>,
}

impl Targets {
    fn get(&self, target: Target) -> Result<&RenderTarget, GpuError> {
        match target {
            Target::Luminance => Ok(&self.luminance),
            Target::Probe => Ok(&self.probe),
            Target::Radiance { layer } => self.radiance.get(layer as usize).ok_or_else(|| {
                GpuError::Unsupported(format!(
                    "radiance layer {} of {}",
                    layer,
                    self.radiance.len()
                ))
            }),
        }
    }
}

/// Host-visible, coherent buffer, freed on drop
struct HostBuffer {
    device: Arc<Device>,
    handle: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.handle, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

impl HostBuffer {
    unsafe fn write(&self, offset: usize, bytes: &[u8]) -> Result<(), GpuError> {
        let ptr = self
            .device
            .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::default())?
            as *mut u8;
        ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(offset), bytes.len());
        self.device.unmap_memory(self.memory);
        Ok(())
    }

    unsafe fn read_texels(&self, count: usize) -> Result<Vec<[f32; 4]>, GpuError> {
        let ptr = self
            .device
            .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::default())?
            as *const u8;
        let bytes = std::slice::from_raw_parts(ptr, count * mem::size_of::<[f32; 4]>());
        let texels = bytes
            .chunks_exact(mem::size_of::<[f32; 4]>())
            .map(bytemuck::pod_read_unaligned::<[f32; 4]>)
            .collect();
        self.device.unmap_memory(self.memory);
        Ok(texels)
    }
}

/// Collects the geometry a surface callback submits
struct SurfaceRecorder<'a> {
    program: &'a VulkanProgram,
    uniforms: Vec<u8>,
    /// Uniform block snapshot, first vertex and vertex count per submission
    batches: Vec<(Vec<u8>, u32, u32)>,
    vertices: Vec<f32>,
    error: Option<GpuError>,
}

impl SurfaceDraw for SurfaceRecorder<'_> {
    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        if let Err(e) = self.program.write_uniform(&mut self.uniforms, name, &value) {
            self.error.get_or_insert(e);
        }
    }

    fn draw_triangles(&mut self, vertices: &[f32]) {
        let stride = self.program.vertex_stride as usize;
        if stride == 0 || vertices.len() % stride != 0 {
            self.error.get_or_insert(GpuError::Unsupported(format!(
                "{} floats do not form whole vertices of {}",
                vertices.len(),
                self.program.name
            )));
            return;
        }
        let first = (self.vertices.len() / stride) as u32;
        self.vertices.extend_from_slice(vertices);
        self.batches.push((
            self.uniforms.clone(),
            first,
            (vertices.len() / stride) as u32,
        ));
    }
}

pub struct VulkanGpu {
    device: Arc<Device>,
    memory_props: vk::PhysicalDeviceMemoryProperties,
    uniform_alignment: u32,
    queue: vk::Queue,
    cmd_pool: vk::CommandPool,
    fence: vk::Fence,
    sampler: vk::Sampler,
    descriptor_pool: vk::DescriptorPool,
    render_pass: vk::RenderPass,
    fullscreen: vk::ShaderModule,
    compiler: shaderc::Compiler,
    targets: Option<Targets>,
}

impl Drop for VulkanGpu {
    fn drop(&mut self) {
        self.targets = None;
        unsafe {
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_render_pass(self.render_pass, None);
            self.device.destroy_shader_module(self.fullscreen, None);
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_fence(self.fence, None);
            self.device.destroy_command_pool(self.cmd_pool, None);
        }
    }
}

impl VulkanGpu {
    /// Drive `device`'s queue `queue_family`, index 0
    ///
    /// Textures and programs must be dropped before the device is destroyed.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        physical: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<Self, GpuError> {
        let compiler = shaderc::Compiler::new()
            .ok_or_else(|| GpuError::Unsupported("failed to initialize shaderc".into()))?;
        unsafe {
            let memory_props = instance.get_physical_device_memory_properties(physical);
            let limits = instance.get_physical_device_properties(physical).limits;
            let queue = device.get_device_queue(queue_family, 0);
            let cmd_pool = device.create_command_pool(
                &vk::CommandPoolCreateInfo::builder().queue_family_index(queue_family),
                None,
            )?;
            let fence = device.create_fence(&vk::FenceCreateInfo::default(), None)?;
            let sampler = device.create_sampler(
                &vk::SamplerCreateInfo {
                    min_filter: vk::Filter::LINEAR,
                    mag_filter: vk::Filter::LINEAR,
                    mipmap_mode: vk::SamplerMipmapMode::NEAREST,
                    address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
                    address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
                    address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
                    ..Default::default()
                },
                None,
            )?;
            let descriptor_pool = device.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::builder()
                    .max_sets(1)
                    .pool_sizes(&[
                        vk::DescriptorPoolSize {
                            ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                            descriptor_count: 1,
                        },
                        vk::DescriptorPoolSize {
                            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                            descriptor_count: MAX_SAMPLERS,
                        },
                    ]),
                None,
            )?;
            let render_pass = device.create_render_pass(
                &vk::RenderPassCreateInfo::builder()
                    .attachments(&[vk::AttachmentDescription {
                        format: TARGET_FORMAT,
                        samples: vk::SampleCountFlags::TYPE_1,
                        load_op: vk::AttachmentLoadOp::LOAD,
                        store_op: vk::AttachmentStoreOp::STORE,
                        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                        initial_layout: vk::ImageLayout::GENERAL,
                        final_layout: vk::ImageLayout::GENERAL,
                        ..Default::default()
                    }])
                    .subpasses(&[vk::SubpassDescription::builder()
                        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                        .color_attachments(&[vk::AttachmentReference {
                            attachment: 0,
                            layout: vk::ImageLayout::GENERAL,
                        }])
                        .build()]),
                None,
            )?;
            let fullscreen = device.create_shader_module(
                &vk::ShaderModuleCreateInfo::builder().code(FULLSCREEN),
                None,
            )?;
            Ok(Self {
                device,
                memory_props,
                uniform_alignment: limits.min_uniform_buffer_offset_alignment.max(16) as u32,
                queue,
                cmd_pool,
                fence,
                sampler,
                descriptor_pool,
                render_pass,
                fullscreen,
                compiler,
                targets: None,
            })
        }
    }

    fn spirv(
        &mut self,
        name: &str,
        source: &str,
        kind: shaderc::ShaderKind,
    ) -> Result<shaderc::CompilationArtifact, GpuError> {
        let options = shaderc::CompileOptions::new()
            .ok_or_else(|| GpuError::Unsupported("failed to initialize shaderc".into()))?;
        let artifact = self
            .compiler
            .compile_into_spirv(source, kind, name, "main", Some(&options))
            .map_err(|e| GpuError::Compile {
                name: name.into(),
                log: e.to_string(),
            })?;
        if artifact.get_num_warnings() > 0 {
            log::debug!("{}: {}", name, artifact.get_warning_messages());
        }
        Ok(artifact)
    }

    fn compile(
        &mut self,
        name: &str,
        source: &str,
        kind: shaderc::ShaderKind,
    ) -> Result<vk::ShaderModule, GpuError> {
        let artifact = self.spirv(name, source, kind)?;
        unsafe {
            Ok(self.device.create_shader_module(
                &vk::ShaderModuleCreateInfo::builder().code(artifact.as_binary()),
                None,
            )?)
        }
    }

    /// Preludes for the stages of `desc`: fragment, then the host vertex stage if any
    fn stage_sources(&self, desc: &ProgramDesc) -> Result<(String, Option<String>), GpuError> {
        if desc.samplers.len() > MAX_SAMPLERS as usize {
            return Err(GpuError::Unsupported(format!(
                "{} uses {} samplers",
                desc.name,
                desc.samplers.len()
            )));
        }
        let mut fragment = fragment_prelude(&desc.uniforms, &desc.samplers);
        fragment.push_str(&desc.fragment_source);
        let vertex = match desc.vertex {
            VertexStage::Fullscreen => None,
            VertexStage::Host {
                ref source,
                ref attributes,
            } => {
                let mut vertex = vertex_prelude(&desc.uniforms, &desc.samplers, attributes);
                vertex.push_str(source);
                Some(vertex)
            }
        };
        Ok((fragment, vertex))
    }

    unsafe fn alloc_image(&self, info: &vk::ImageCreateInfo) -> Result<Image, GpuError> {
        let handle = self.device.create_image(info, None)?;
        let reqs = self.device.get_image_memory_requirements(handle);
        let memory = match allocate(
            &self.device,
            &self.memory_props,
            reqs,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            "image",
        ) {
            Ok(x) => x,
            Err(e) => {
                self.device.destroy_image(handle, None);
                return Err(e);
            }
        };
        self.device.bind_image_memory(handle, memory, 0)?;
        let view = self.device.create_image_view(
            &vk::ImageViewCreateInfo {
                image: handle,
                view_type: match info.image_type {
                    vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
                    vk::ImageType::TYPE_2D => vk::ImageViewType::TYPE_2D,
                    _ => vk::ImageViewType::TYPE_3D,
                },
                format: info.format,
                components: vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                },
                subresource_range: color_range(),
                ..Default::default()
            },
            None,
        )?;
        Ok(Image {
            handle,
            memory,
            view,
        })
    }

    unsafe fn host_buffer(
        &self,
        size: usize,
        usage: vk::BufferUsageFlags,
    ) -> Result<HostBuffer, GpuError> {
        let size = size.max(16) as vk::DeviceSize;
        let handle = self.device.create_buffer(
            &vk::BufferCreateInfo {
                size,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                ..Default::default()
            },
            None,
        )?;
        let reqs = self.device.get_buffer_memory_requirements(handle);
        let memory = match allocate(
            &self.device,
            &self.memory_props,
            reqs,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            "host buffer",
        ) {
            Ok(x) => x,
            Err(e) => {
                self.device.destroy_buffer(handle, None);
                return Err(e);
            }
        };
        let buffer = HostBuffer {
            device: self.device.clone(),
            handle,
            memory,
            size,
        };
        self.device.bind_buffer_memory(handle, memory, 0)?;
        Ok(buffer)
    }

    /// Record into a fresh command buffer, submit, and wait for completion
    fn one_shot(&self, record: impl FnOnce(vk::CommandBuffer)) -> Result<(), GpuError> {
        unsafe {
            let cmd = self.device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_buffer_count(1)
                    .command_pool(self.cmd_pool)
                    .level(vk::CommandBufferLevel::PRIMARY),
            )?[0];
            let result = (|| {
                self.device.begin_command_buffer(
                    cmd,
                    &vk::CommandBufferBeginInfo::builder()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
                )?;
                self.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::DependencyFlags::default(),
                    &[vk::MemoryBarrier::builder()
                        .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
                        .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
                        .build()],
                    &[],
                    &[],
                );
                record(cmd);
                self.device.end_command_buffer(cmd)?;
                self.device.queue_submit(
                    self.queue,
                    &[vk::SubmitInfo::builder().command_buffers(&[cmd]).build()],
                    self.fence,
                )?;
                self.device.wait_for_fences(&[self.fence], true, u64::max_value())?;
                self.device.reset_fences(&[self.fence])
            })();
            self.device.free_command_buffers(self.cmd_pool, &[cmd]);
            Ok(result?)
        }
    }

    unsafe fn host_read_barrier(&self, cmd: vk::CommandBuffer) {
        self.device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::HOST,
            vk::DependencyFlags::default(),
            &[vk::MemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::HOST_READ)
                .build()],
            &[],
            &[],
        );
    }

    fn create_target(&self, width: u32, height: u32) -> Result<RenderTarget, GpuError> {
        unsafe {
            let image = self.alloc_image(&vk::ImageCreateInfo {
                image_type: vk::ImageType::TYPE_2D,
                format: TARGET_FORMAT,
                extent: vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                },
                mip_levels: 1,
                array_layers: 1,
                samples: vk::SampleCountFlags::TYPE_1,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                ..Default::default()
            })?;
            let framebuffer = match self.device.create_framebuffer(
                &vk::FramebufferCreateInfo::builder()
                    .render_pass(self.render_pass)
                    .attachments(&[image.view])
                    .width(width)
                    .height(height)
                    .layers(1),
                None,
            ) {
                Ok(x) => x,
                Err(e) => {
                    self.device.destroy_image_view(image.view, None);
                    self.device.destroy_image(image.handle, None);
                    self.device.free_memory(image.memory, None);
                    return Err(GpuError::IncompleteFramebuffer(e.to_string()));
                }
            };
            let target = RenderTarget {
                device: self.device.clone(),
                framebuffer,
                extent: vk::Extent2D { width, height },
                image,
            };
            let handle = target.image.handle;
            self.one_shot(|cmd| {
                self.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::default(),
                    &[],
                    &[],
                    &[vk::ImageMemoryBarrier::builder()
                        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                        .old_layout(vk::ImageLayout::UNDEFINED)
                        .new_layout(vk::ImageLayout::GENERAL)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(handle)
                        .subresource_range(color_range())
                        .build()],
                );
                self.record_clear(cmd, handle);
            })?;
            Ok(target)
        }
    }

    unsafe fn record_clear(&self, cmd: vk::CommandBuffer, image: vk::Image) {
        self.device.cmd_clear_color_image(
            cmd,
            image,
            vk::ImageLayout::GENERAL,
            &vk::ClearColorValue {
                float32: [0.0; 4],
            },
            &[color_range()],
        );
    }

    fn create_pipeline(
        &self,
        vert: vk::ShaderModule,
        frag: vk::ShaderModule,
        layout: vk::PipelineLayout,
        attributes: &[VertexAttribute],
    ) -> Result<vk::Pipeline, GpuError> {
        let stride: u32 = attributes.iter().map(|a| a.components).sum();
        let mut offset = 0;
        let attribute_descs = attributes
            .iter()
            .map(|a| {
                let desc = vk::VertexInputAttributeDescription {
                    location: a.location,
                    binding: 0,
                    format: vertex_format(a.components),
                    offset: offset * mem::size_of::<f32>() as u32,
                };
                offset += a.components;
                desc
            })
            .collect::<Vec<_>>();
        let bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: stride * mem::size_of::<f32>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let vertex_input = if attributes.is_empty() {
            vk::PipelineVertexInputStateCreateInfo::default()
        } else {
            vk::PipelineVertexInputStateCreateInfo::builder()
                .vertex_binding_descriptions(&bindings)
                .vertex_attribute_descriptions(&attribute_descs)
                .build()
        };

        let entry_point = b"main\0".as_ptr() as *const c_char;
        let noop_stencil_state = vk::StencilOpState {
            fail_op: vk::StencilOp::KEEP,
            pass_op: vk::StencilOp::KEEP,
            depth_fail_op: vk::StencilOp::KEEP,
            compare_op: vk::CompareOp::ALWAYS,
            compare_mask: 0,
            write_mask: 0,
            reference: 0,
        };
        unsafe {
            let mut pipelines = self
                .device
                .create_graphics_pipelines(
                    vk::PipelineCache::null(),
                    &[vk::GraphicsPipelineCreateInfo::builder()
                        .stages(&[
                            vk::PipelineShaderStageCreateInfo {
                                stage: vk::ShaderStageFlags::VERTEX,
                                module: vert,
                                p_name: entry_point,
                                ..Default::default()
                            },
                            vk::PipelineShaderStageCreateInfo {
                                stage: vk::ShaderStageFlags::FRAGMENT,
                                module: frag,
                                p_name: entry_point,
                                ..Default::default()
                            },
                        ])
                        .vertex_input_state(&vertex_input)
                        .input_assembly_state(
                            &vk::PipelineInputAssemblyStateCreateInfo::builder()
                                .topology(vk::PrimitiveTopology::TRIANGLE_LIST),
                        )
                        .viewport_state(
                            &vk::PipelineViewportStateCreateInfo::builder()
                                .scissor_count(1)
                                .viewport_count(1),
                        )
                        .rasterization_state(
                            &vk::PipelineRasterizationStateCreateInfo::builder()
                                .cull_mode(vk::CullModeFlags::NONE)
                                .polygon_mode(vk::PolygonMode::FILL)
                                .line_width(1.0),
                        )
                        .multisample_state(
                            &vk::PipelineMultisampleStateCreateInfo::builder()
                                .rasterization_samples(vk::SampleCountFlags::TYPE_1),
                        )
                        .depth_stencil_state(
                            &vk::PipelineDepthStencilStateCreateInfo::builder()
                                .depth_test_enable(false)
                                .front(noop_stencil_state)
                                .back(noop_stencil_state),
                        )
                        .color_blend_state(
                            &vk::PipelineColorBlendStateCreateInfo::builder().attachments(&[
                                vk::PipelineColorBlendAttachmentState {
                                    blend_enable: vk::TRUE,
                                    src_color_blend_factor: vk::BlendFactor::ONE,
                                    dst_color_blend_factor: vk::BlendFactor::ONE,
                                    color_blend_op: vk::BlendOp::ADD,
                                    src_alpha_blend_factor: vk::BlendFactor::ONE,
                                    dst_alpha_blend_factor: vk::BlendFactor::ONE,
                                    alpha_blend_op: vk::BlendOp::ADD,
                                    color_write_mask: vk::ColorComponentFlags::all(),
                                },
                            ]),
                        )
                        .dynamic_state(
                            &vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&[
                                vk::DynamicState::VIEWPORT,
                                vk::DynamicState::SCISSOR,
                            ]),
                        )
                        .layout(layout)
                        .render_pass(self.render_pass)
                        .subpass(0)
                        .build()],
                    None,
                )
                .map_err(|(_, e)| e)?
                .into_iter();
            pipelines
                .next()
                .ok_or_else(|| GpuError::Unsupported("no pipeline created".into()))
        }
    }

    /// Record one pass into `target`, issuing a draw per batch
    #[allow(clippy::too_many_arguments)]
    unsafe fn record_pass(
        &self,
        cmd: vk::CommandBuffer,
        program: &VulkanProgram,
        target: &RenderTarget,
        descriptor_set: vk::DescriptorSet,
        vertex_buffer: Option<vk::Buffer>,
        batches: &[(u32, u32, u32)],
        scissor: Option<(u32, u32)>,
    ) {
        let full = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: target.extent,
        };
        self.device.cmd_begin_render_pass(
            cmd,
            &vk::RenderPassBeginInfo::builder()
                .render_pass(self.render_pass)
                .framebuffer(target.framebuffer)
                .render_area(full),
            vk::SubpassContents::INLINE,
        );
        self.device.cmd_set_viewport(
            cmd,
            0,
            &[vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: target.extent.width as f32,
                height: target.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            }],
        );
        let scissor = match scissor {
            Some((x, y)) => vk::Rect2D {
                offset: vk::Offset2D {
                    x: x as i32,
                    y: y as i32,
                },
                extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
            },
            None => full,
        };
        self.device.cmd_set_scissor(cmd, 0, &[scissor]);
        self.device
            .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, program.pipeline);
        if let Some(buffer) = vertex_buffer {
            self.device.cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]);
        }
        for &(uniform_offset, first, count) in batches {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                program.layout,
                0,
                &[descriptor_set],
                &[uniform_offset],
            );
            self.device.cmd_draw(cmd, count, 1, first, 0);
        }
        self.device.cmd_end_render_pass(cmd);
    }

    /// Reset the descriptor pool and fill its one set for `program`
    unsafe fn prepare_descriptors(
        &self,
        program: &VulkanProgram,
        uniforms: &HostBuffer,
        views: &[vk::ImageView],
    ) -> Result<vk::DescriptorSet, GpuError> {
        self.device
            .reset_descriptor_pool(self.descriptor_pool, vk::DescriptorPoolResetFlags::default())?;
        let ds = self.device.allocate_descriptor_sets(
            &vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(self.descriptor_pool)
                .set_layouts(&[program.ds_layout]),
        )?[0];
        let buffer_info = vk::DescriptorBufferInfo {
            buffer: uniforms.handle,
            offset: 0,
            range: vk::DeviceSize::from(program.uniform_size),
        };
        let image_infos = views
            .iter()
            .map(|&view| vk::DescriptorImageInfo {
                sampler: vk::Sampler::null(),
                image_view: view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            })
            .collect::<Vec<_>>();
        let mut writes = vec![vk::WriteDescriptorSet {
            dst_set: ds,
            dst_binding: 0,
            dst_array_element: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            p_buffer_info: &buffer_info,
            ..Default::default()
        }];
        for (i, info) in image_infos.iter().enumerate() {
            writes.push(vk::WriteDescriptorSet {
                dst_set: ds,
                dst_binding: i as u32 + 1,
                dst_array_element: 0,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                p_image_info: info,
                ..Default::default()
            });
        }
        self.device.update_descriptor_sets(&writes, &[]);
        Ok(ds)
    }

    /// Upload uniform snapshots back to back, returning their dynamic offsets
    unsafe fn upload_uniforms(
        &self,
        snapshots: &[&[u8]],
    ) -> Result<(HostBuffer, Vec<u32>), GpuError> {
        let stride = align_up(
            snapshots.first().map_or(16, |s| s.len() as u32),
            self.uniform_alignment,
        );
        let buffer = self.host_buffer(
            stride as usize * snapshots.len(),
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?;
        let mut offsets = Vec::with_capacity(snapshots.len());
        for (i, snapshot) in snapshots.iter().enumerate() {
            let offset = stride * i as u32;
            buffer.write(offset as usize, snapshot)?;
            offsets.push(offset);
        }
        Ok((buffer, offsets))
    }

    fn read_back(
        &self,
        image: vk::Image,
        offset: (u32, u32),
        extent: (u32, u32),
    ) -> Result<Vec<[f32; 4]>, GpuError> {
        let count = extent.0 as usize * extent.1 as usize;
        unsafe {
            let buffer = self.host_buffer(
                count * mem::size_of::<[f32; 4]>(),
                vk::BufferUsageFlags::TRANSFER_DST,
            )?;
            self.one_shot(|cmd| {
                self.device.cmd_copy_image_to_buffer(
                    cmd,
                    image,
                    vk::ImageLayout::GENERAL,
                    buffer.handle,
                    &[vk::BufferImageCopy {
                        buffer_offset: 0,
                        buffer_row_length: 0,
                        buffer_image_height: 0,
                        image_subresource: color_layers(),
                        image_offset: vk::Offset3D {
                            x: offset.0 as i32,
                            y: offset.1 as i32,
                            z: 0,
                        },
                        image_extent: vk::Extent3D {
                            width: extent.0,
                            height: extent.1,
                            depth: 1,
                        },
                    }],
                );
                self.host_read_barrier(cmd);
            })?;
            buffer.read_texels(count)
        }
    }
}

impl Gpu for VulkanGpu {
    type Texture = VulkanTexture;
    type Program = VulkanProgram;

    fn compile_program(&mut self, desc: &ProgramDesc) -> Result<VulkanProgram, GpuError> {
        let (fragment, vertex) = self.stage_sources(desc)?;
        let frag = self.compile(&desc.name, &fragment, shaderc::ShaderKind::Fragment)?;
        let (vert, attributes) = match (vertex, &desc.vertex) {
            (Some(vertex), VertexStage::Host { attributes, .. }) => {
                match self.compile(&desc.name, &vertex, shaderc::ShaderKind::Vertex) {
                    Ok(x) => (Some(x), &attributes[..]),
                    Err(e) => {
                        unsafe {
                            self.device.destroy_shader_module(frag, None);
                        }
                        return Err(e);
                    }
                }
            }
            _ => (None, &[][..]),
        };

        let vertex_module = vert.unwrap_or(self.fullscreen);
        let result = unsafe { self.build_program(desc, vertex_module, frag, attributes) };
        unsafe {
            self.device.destroy_shader_module(frag, None);
            if let Some(vert) = vert {
                self.device.destroy_shader_module(vert, None);
            }
        }
        if result.is_ok() {
            log::trace!("compiled {}", desc.name);
        }
        result
    }

    fn check_program(&mut self, desc: &ProgramDesc) -> Result<(), GpuError> {
        let (fragment, vertex) = self.stage_sources(desc)?;
        self.spirv(&desc.name, &fragment, shaderc::ShaderKind::Fragment)?;
        if let Some(vertex) = vertex {
            self.spirv(&desc.name, &vertex, shaderc::ShaderKind::Vertex)?;
        }
        Ok(())
    }

    fn upload_texture(
        &mut self,
        desc: &TextureDesc,
        texels: &[[f32; 4]],
    ) -> Result<VulkanTexture, GpuError> {
        if texels.len() != desc.texel_count() {
            return Err(GpuError::Unsupported(format!(
                "{} texels for extent {:?}",
                texels.len(),
                desc.extent
            )));
        }
        let halves = texels
            .iter()
            .flat_map(|t| t.iter())
            .map(|&x| half::f16::from_f32(x).to_bits())
            .collect::<Vec<u16>>();
        unsafe {
            let staging = self.host_buffer(
                halves.len() * mem::size_of::<u16>(),
                vk::BufferUsageFlags::TRANSFER_SRC,
            )?;
            staging.write(0, bytemuck::cast_slice(&halves))?;
            let image = self.alloc_image(&vk::ImageCreateInfo {
                image_type: match desc.dim {
                    TextureDim::D1 => vk::ImageType::TYPE_1D,
                    TextureDim::D2 => vk::ImageType::TYPE_2D,
                    TextureDim::D3 => vk::ImageType::TYPE_3D,
                },
                format: TABLE_FORMAT,
                extent: vk::Extent3D {
                    width: desc.extent[0],
                    height: desc.extent[1],
                    depth: desc.extent[2],
                },
                mip_levels: 1,
                array_layers: 1,
                samples: vk::SampleCountFlags::TYPE_1,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                ..Default::default()
            })?;
            let texture = VulkanTexture {
                device: self.device.clone(),
                image,
            };
            let handle = texture.image.handle;
            self.one_shot(|cmd| {
                self.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::default(),
                    &[],
                    &[],
                    &[vk::ImageMemoryBarrier::builder()
                        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                        .old_layout(vk::ImageLayout::UNDEFINED)
                        .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(handle)
                        .subresource_range(color_range())
                        .build()],
                );
                self.device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.handle,
                    handle,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[vk::BufferImageCopy {
                        buffer_offset: 0,
                        buffer_row_length: 0,
                        buffer_image_height: 0,
                        image_subresource: color_layers(),
                        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                        image_extent: vk::Extent3D {
                            width: desc.extent[0],
                            height: desc.extent[1],
                            depth: desc.extent[2],
                        },
                    }],
                );
                self.device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::default(),
                    &[],
                    &[],
                    &[vk::ImageMemoryBarrier::builder()
                        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                        .dst_access_mask(vk::AccessFlags::SHADER_READ)
                        .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                        .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(handle)
                        .subresource_range(color_range())
                        .build()],
                );
            })?;
            Ok(texture)
        }
    }

    fn resize_targets(
        &mut self,
        width: u32,
        height: u32,
        radiance_layers: u32,
    ) -> Result<(), GpuError> {
        self.targets = None;
        let luminance = self.create_target(width, height)?;
        let probe = self.create_target(width, height)?;
        let radiance = (0..radiance_layers)
            .map(|_| self.create_target(width, height))
            .collect::<Result<Vec<_>, _>>()?;
        self.targets = Some(Targets {
            luminance,
            probe,
            radiance,
        });
        Ok(())
    }

    fn clear_target(&mut self, target: Target) -> Result<(), GpuError> {
        let targets = self.targets()?;
        let image = targets.get(target)?.image.handle;
        self.one_shot(|cmd| unsafe { self.record_clear(cmd, image) })
    }

    fn draw(
        &mut self,
        call: &DrawCall<'_, Self>,
        surface: &mut dyn FnMut(&mut dyn SurfaceDraw),
    ) -> Result<(), GpuError> {
        let program = call.program;
        let mut block = vec![0; program.uniform_size as usize];
        for (name, value) in &call.uniforms {
            program.write_uniform(&mut block, name, value)?;
        }
        let views = program.bind_textures(&call.textures)?;

        let mut recorder = SurfaceRecorder {
            program,
            uniforms: block,
            batches: Vec::new(),
            vertices: Vec::new(),
            error: None,
        };
        if program.vertex_stride == 0 {
            recorder.batches.push((recorder.uniforms.clone(), 0, 3));
        } else {
            surface(&mut recorder);
        }
        if let Some(e) = recorder.error {
            return Err(e);
        }
        if recorder.batches.is_empty() {
            return Ok(());
        }

        let target = self.targets()?.get(call.target)?;
        unsafe {
            let snapshots = recorder
                .batches
                .iter()
                .map(|b| &b.0[..])
                .collect::<Vec<_>>();
            let (uniforms, offsets) = self.upload_uniforms(&snapshots)?;
            let vertices = if recorder.vertices.is_empty() {
                None
            } else {
                let buffer = self.host_buffer(
                    recorder.vertices.len() * mem::size_of::<f32>(),
                    vk::BufferUsageFlags::VERTEX_BUFFER,
                )?;
                buffer.write(0, bytemuck::cast_slice(&recorder.vertices))?;
                Some(buffer)
            };
            let ds = self.prepare_descriptors(program, &uniforms, &views)?;
            let batches = recorder
                .batches
                .iter()
                .zip(offsets)
                .map(|(b, offset)| (offset, b.1, b.2))
                .collect::<Vec<_>>();
            self.one_shot(|cmd| {
                self.record_pass(
                    cmd,
                    program,
                    target,
                    ds,
                    vertices.as_ref().map(|b| b.handle),
                    &batches,
                    call.scissor,
                )
            })
        }
    }

    fn read_target_pixel(&mut self, target: Target, x: u32, y: u32) -> Result<[f32; 4], GpuError> {
        let target = self.targets()?.get(target)?;
        if x >= target.extent.width || y >= target.extent.height {
            return Err(GpuError::Unsupported(format!(
                "pixel ({}, {}) outside target",
                x, y
            )));
        }
        let texels = self.read_back(target.image.handle, (x, y), (1, 1))?;
        texels
            .first()
            .copied()
            .ok_or_else(|| GpuError::Unsupported("empty read-back".into()))
    }

    fn render_offscreen(
        &mut self,
        call: &OffscreenCall<'_, Self>,
    ) -> Result<Vec<[f32; 4]>, GpuError> {
        let program = call.program;
        if program.vertex_stride != 0 {
            return Err(GpuError::Unsupported(format!(
                "{} does not use the fullscreen vertex stage",
                program.name
            )));
        }
        let mut block = vec![0; program.uniform_size as usize];
        for (name, value) in &call.uniforms {
            program.write_uniform(&mut block, name, value)?;
        }
        let views = program.bind_textures(&call.textures)?;
        let target = self.create_target(call.width, call.height)?;
        unsafe {
            let (uniforms, offsets) = self.upload_uniforms(&[&block[..]])?;
            let ds = self.prepare_descriptors(program, &uniforms, &views)?;
            self.one_shot(|cmd| {
                self.record_pass(cmd, program, &target, ds, None, &[(offsets[0], 0, 3)], None)
            })?;
        }
        self.read_back(target.image.handle, (0, 0), (call.width, call.height))
    }
}

impl VulkanGpu {
    fn targets(&self) -> Result<&Targets, GpuError> {
        self.targets
            .as_ref()
            .ok_or_else(|| GpuError::Unsupported("render targets not allocated".into()))
    }

    unsafe fn build_program(
        &self,
        desc: &ProgramDesc,
        vert: vk::ShaderModule,
        frag: vk::ShaderModule,
        attributes: &[VertexAttribute],
    ) -> Result<VulkanProgram, GpuError> {
        let mut bindings = vec![vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            p_immutable_samplers: ptr::null(),
        }];
        for i in 0..desc.samplers.len() {
            bindings.push(vk::DescriptorSetLayoutBinding {
                binding: i as u32 + 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                p_immutable_samplers: &self.sampler,
            });
        }
        let ds_layout = self.device.create_descriptor_set_layout(
            &vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings),
            None,
        )?;
        let layout = match self.device.create_pipeline_layout(
            &vk::PipelineLayoutCreateInfo::builder().set_layouts(&[ds_layout]),
            None,
        ) {
            Ok(x) => x,
            Err(e) => {
                self.device.destroy_descriptor_set_layout(ds_layout, None);
                return Err(e.into());
            }
        };
        let pipeline = match self.create_pipeline(vert, frag, layout, attributes) {
            Ok(x) => x,
            Err(e) => {
                self.device.destroy_pipeline_layout(layout, None);
                self.device.destroy_descriptor_set_layout(ds_layout, None);
                return Err(e);
            }
        };
        let (uniforms, uniform_size) = std140_layout(&desc.uniforms);
        Ok(VulkanProgram {
            device: self.device.clone(),
            name: desc.name.clone(),
            ds_layout,
            layout,
            pipeline,
            uniforms,
            uniform_size,
            samplers: desc.samplers.clone(),
            vertex_stride: attributes.iter().map(|a| a.components).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std140_offsets() {
        let (slots, size) = std140_layout(&[
            UniformDecl::new("a", UniformType::Float),
            UniformDecl::new("b", UniformType::Vec3),
            UniformDecl::new("c", UniformType::Float),
            UniformDecl::new("d", UniformType::Mat4),
            UniformDecl::new("e", UniformType::FloatArray(3)),
            UniformDecl::new("f", UniformType::Int),
        ]);
        let offsets: Vec<u32> = slots.iter().map(|s| s.offset).collect();
        // A float may pack into the tail of a vec3
        assert_eq!(offsets, vec![0, 16, 28, 32, 96, 144]);
        assert_eq!(size, 160);
    }

    #[test]
    fn empty_block_is_nonzero() {
        assert_eq!(std140_layout(&[]).1, 16);
        assert!(interface_prelude(&[], &[]).contains("unusedUniform"));
    }

    #[test]
    fn prelude_declares_interface() {
        let prelude = fragment_prelude(
            &[
                UniformDecl::new("radianceToLuminance", UniformType::Mat4),
                UniformDecl::new("elevations", UniformType::FloatArray(8)),
            ],
            &[
                SamplerDecl::new("transmittanceTexture", TextureDim::D2),
                SamplerDecl::new("scatteringTextureLower", TextureDim::D3),
            ],
        );
        assert!(prelude.starts_with("#version 450\n"));
        assert!(prelude.contains("    mat4 radianceToLuminance;\n"));
        assert!(prelude.contains("    float elevations[8];\n"));
        assert!(prelude.contains("binding = 1) uniform sampler2D transmittanceTexture;"));
        assert!(prelude.contains("binding = 2) uniform sampler3D scatteringTextureLower;"));
        assert!(prelude.ends_with("layout(location = 0) out vec4 luminance;\n"));
    }

    #[test]
    fn vertex_prelude_declares_attributes() {
        let prelude = vertex_prelude(
            &[],
            &[],
            &[VertexAttribute {
                name: "vertex".into(),
                location: 0,
                components: 2,
            }],
        );
        assert!(prelude.contains("layout(location = 0) in vec2 vertex;\n"));
        assert!(!prelude.contains("out vec4 luminance"));
    }
}
