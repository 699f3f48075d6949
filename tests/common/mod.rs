#![allow(dead_code)]

//! Recording GPU backend and on-disk model fixtures

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use skyglow::colorimetry::{self, Mat4};
use skyglow::gpu::{
    DrawCall, Gpu, OffscreenCall, ProgramDesc, SurfaceDraw, Target, TextureDesc, UniformValue,
    VertexAttribute, VertexStage, ViewRayShader,
};
use skyglow::programs::ScatteringRenderProgramSet;
use skyglow::table::{write_table, TablePaths};
use skyglow::{AtmosphereModel, GpuError, PhaseFunctionType, Scatterer};

/// Radiance the mock coarse-grid pass returns for `(elevation, azimuth, sun zenith angle)`
pub type Field = dyn Fn(f64, f64, f64) -> [f32; 4];

pub fn linear_field(elevation: f64, azimuth: f64, sza: f64) -> [f32; 4] {
    let a = 2.0 + azimuth.cos();
    let e = 1.0 + 0.5 * elevation;
    [
        (e * a * (1.0 + sza)) as f32,
        (e * a) as f32,
        (2.0 * e * a) as f32,
        (a + sza) as f32,
    ]
}

#[derive(Debug, Clone)]
pub struct DrawRecord {
    pub program: String,
    pub target: Target,
    pub uniforms: Vec<(&'static str, UniformValue)>,
    pub textures: Vec<(&'static str, u32)>,
    pub scissor: Option<(u32, u32)>,
    pub host_uniforms: Vec<String>,
    pub vertices: usize,
}

#[derive(Default)]
pub struct Log {
    pub compiled: Vec<String>,
    /// Programs whose stages were compiled and discarded
    pub checked: Vec<String>,
    pub uploads: Vec<TextureDesc>,
    pub draws: Vec<DrawRecord>,
    pub offscreen: Vec<Vec<(&'static str, UniformValue)>>,
    pub clears: Vec<Target>,
    pub live_textures: i64,
    pub live_programs: i64,
    /// Compiling a program whose name contains this fails
    pub fail_compile: Option<String>,
    /// Like `fail_compile`, but the stages themselves compile and only the pipeline fails
    pub fail_link: Option<String>,
}

fn injected(pattern: &Option<String>, name: &str) -> Result<(), GpuError> {
    match pattern {
        Some(pattern) if name.contains(pattern.as_str()) => Err(GpuError::Compile {
            name: name.into(),
            log: "injected failure".into(),
        }),
        _ => Ok(()),
    }
}

pub struct MockTexture {
    pub id: u32,
    pub desc: TextureDesc,
    log: Rc<RefCell<Log>>,
}

impl Drop for MockTexture {
    fn drop(&mut self) {
        self.log.borrow_mut().live_textures -= 1;
    }
}

pub struct MockProgram {
    pub desc: ProgramDesc,
    log: Rc<RefCell<Log>>,
}

impl Drop for MockProgram {
    fn drop(&mut self) {
        self.log.borrow_mut().live_programs -= 1;
    }
}

/// Evaluates every pass as unit radiance transformed by its `radianceToLuminance`
pub struct MockGpu {
    pub log: Rc<RefCell<Log>>,
    field: Rc<Field>,
    next_id: u32,
    width: u32,
    height: u32,
    targets: HashMap<Target, Vec<[f32; 4]>>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self::with_field(Rc::new(linear_field))
    }

    pub fn with_field(field: Rc<Field>) -> Self {
        Self {
            log: Rc::new(RefCell::new(Log::default())),
            field,
            next_id: 0,
            width: 0,
            height: 0,
            targets: HashMap::new(),
        }
    }

    fn target(&mut self, target: Target) -> Result<&mut Vec<[f32; 4]>, GpuError> {
        self.targets
            .get_mut(&target)
            .ok_or_else(|| GpuError::Unsupported(format!("no target {:?}", target)))
    }
}

fn check_interface(
    desc: &ProgramDesc,
    uniforms: &[(&'static str, UniformValue)],
    textures: &[&'static str],
) -> Result<(), GpuError> {
    for (name, value) in uniforms {
        match desc.uniforms.iter().find(|u| u.name == *name) {
            Some(decl) if decl.ty == value.ty() => {}
            _ => return Err(GpuError::UnknownUniform((*name).into())),
        }
    }
    for name in textures {
        if !desc.samplers.iter().any(|s| s.name == *name) {
            return Err(GpuError::UnknownSampler((*name).into()));
        }
    }
    for sampler in &desc.samplers {
        if !textures.iter().any(|t| *t == sampler.name) {
            return Err(GpuError::Unsupported(format!("unbound {}", sampler.name)));
        }
    }
    Ok(())
}

struct Recorder<'a> {
    desc: &'a ProgramDesc,
    uniforms: Vec<String>,
    vertices: usize,
    error: Option<GpuError>,
}

impl SurfaceDraw for Recorder<'_> {
    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        match self.desc.uniforms.iter().find(|u| u.name == name) {
            Some(decl) if decl.ty == value.ty() => self.uniforms.push(name.into()),
            _ => self.error = Some(GpuError::UnknownUniform(name.into())),
        }
    }

    fn draw_triangles(&mut self, vertices: &[f32]) {
        self.vertices += vertices.len();
    }
}

/// The mock view ray: a pinhole looking down +z with a 90° horizontal field of view
fn view_direction(x: u32, y: u32, width: u32, height: u32) -> [f32; 4] {
    let d = [
        x as f32 + 0.5 - width as f32 / 2.0,
        y as f32 + 0.5 - height as f32 / 2.0,
        width as f32 / 2.0,
    ];
    let len = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
    [d[0] / len, d[1] / len, d[2] / len, 0.0]
}

impl Gpu for MockGpu {
    type Texture = MockTexture;
    type Program = MockProgram;

    fn compile_program(&mut self, desc: &ProgramDesc) -> Result<MockProgram, GpuError> {
        let mut log = self.log.borrow_mut();
        injected(&log.fail_compile, &desc.name)?;
        injected(&log.fail_link, &desc.name)?;
        log.compiled.push(desc.name.clone());
        log.live_programs += 1;
        Ok(MockProgram {
            desc: desc.clone(),
            log: self.log.clone(),
        })
    }

    fn check_program(&mut self, desc: &ProgramDesc) -> Result<(), GpuError> {
        let mut log = self.log.borrow_mut();
        injected(&log.fail_compile, &desc.name)?;
        log.checked.push(desc.name.clone());
        Ok(())
    }

    fn upload_texture(
        &mut self,
        desc: &TextureDesc,
        texels: &[[f32; 4]],
    ) -> Result<MockTexture, GpuError> {
        if texels.len() != desc.texel_count() {
            return Err(GpuError::Unsupported(format!(
                "{} texels for {:?}",
                texels.len(),
                desc
            )));
        }
        let mut log = self.log.borrow_mut();
        log.uploads.push(*desc);
        log.live_textures += 1;
        self.next_id += 1;
        Ok(MockTexture {
            id: self.next_id,
            desc: *desc,
            log: self.log.clone(),
        })
    }

    fn resize_targets(&mut self, width: u32, height: u32, layers: u32) -> Result<(), GpuError> {
        self.width = width;
        self.height = height;
        let blank = vec![[0.0; 4]; (width * height) as usize];
        self.targets.clear();
        self.targets.insert(Target::Luminance, blank.clone());
        self.targets.insert(Target::Probe, blank.clone());
        for layer in 0..layers {
            self.targets.insert(Target::Radiance { layer }, blank.clone());
        }
        Ok(())
    }

    fn clear_target(&mut self, target: Target) -> Result<(), GpuError> {
        self.log.borrow_mut().clears.push(target);
        for texel in self.target(target)?.iter_mut() {
            *texel = [0.0; 4];
        }
        Ok(())
    }

    fn draw(
        &mut self,
        call: &DrawCall<'_, Self>,
        surface: &mut dyn FnMut(&mut dyn SurfaceDraw),
    ) -> Result<(), GpuError> {
        let desc = &call.program.desc;
        let names: Vec<&'static str> = call.textures.iter().map(|&(n, _)| n).collect();
        check_interface(desc, &call.uniforms, &names)?;
        if desc.vertex == VertexStage::Fullscreen {
            return Err(GpuError::Unsupported("surface pass without host vertex stage".into()));
        }

        let mut recorder = Recorder {
            desc,
            uniforms: Vec::new(),
            vertices: 0,
            error: None,
        };
        surface(&mut recorder);
        if let Some(e) = recorder.error {
            return Err(e);
        }

        let matrix = call.uniforms.iter().find_map(|(n, v)| match (n, v) {
            (&"radianceToLuminance", UniformValue::Mat4(m)) => Some(*m),
            _ => None,
        });
        let (width, height) = (self.width, self.height);
        let is_view_direction = desc.fragment_source.contains("calcViewDir(), 0.0)");
        let buffer = self.target(call.target)?;
        for y in 0..height {
            for x in 0..width {
                if call.scissor.map_or(false, |s| s != (x, y)) {
                    continue;
                }
                let value = if is_view_direction {
                    view_direction(x, y, width, height)
                } else {
                    colorimetry::transform(&matrix.unwrap_or(colorimetry::IDENTITY), [1.0; 4])
                };
                let texel = &mut buffer[(y * width + x) as usize];
                for c in 0..4 {
                    texel[c] += value[c];
                }
            }
        }

        self.log.borrow_mut().draws.push(DrawRecord {
            program: desc.name.clone(),
            target: call.target,
            uniforms: call.uniforms.clone(),
            textures: call.textures.iter().map(|&(n, t)| (n, t.id)).collect(),
            scissor: call.scissor,
            host_uniforms: recorder.uniforms,
            vertices: recorder.vertices,
        });
        Ok(())
    }

    fn read_target_pixel(&mut self, target: Target, x: u32, y: u32) -> Result<[f32; 4], GpuError> {
        let width = self.width;
        Ok(self.target(target)?[(y * width + x) as usize])
    }

    fn render_offscreen(&mut self, call: &OffscreenCall<'_, Self>) -> Result<Vec<[f32; 4]>, GpuError> {
        let desc = &call.program.desc;
        let names: Vec<&'static str> = call.textures.iter().map(|&(n, _)| n).collect();
        check_interface(desc, &call.uniforms, &names)?;
        let float = |name: &str| {
            call.uniforms.iter().find_map(|(n, v)| match v {
                UniformValue::Float(x) if *n == name => Some(*x),
                _ => None,
            })
        };
        let sza = float("sunZenithAngle").unwrap_or(0.0) as f64;
        let elevations = call
            .uniforms
            .iter()
            .find_map(|(n, v)| match v {
                UniformValue::FloatArray(x) if *n == "elevations" => Some(x.clone()),
                _ => None,
            })
            .unwrap_or_default();
        if elevations.len() != call.height as usize {
            return Err(GpuError::Unsupported("elevation rows mismatch".into()));
        }
        self.log.borrow_mut().offscreen.push(call.uniforms.clone());
        let mut out = Vec::with_capacity((call.width * call.height) as usize);
        for &elevation in &elevations {
            for k in 0..call.width {
                let azimuth = 2.0 * std::f64::consts::PI * f64::from(k) / f64::from(call.width);
                out.push((self.field)(f64::from(elevation), azimuth, sza));
            }
        }
        Ok(out)
    }
}

pub fn view_ray() -> ViewRayShader {
    ViewRayShader {
        fragment_source: "vec3 calcViewDir() { return normalize(viewDir); }".into(),
        vertex_source: "void main() { gl_Position = vec4(vertex, 1.0); }".into(),
        vertex_attributes: vec![VertexAttribute {
            name: "vertex".into(),
            location: 0,
            components: 3,
        }],
        uniforms: vec![skyglow::gpu::UniformDecl::new(
            "projection",
            skyglow::gpu::UniformType::Mat4,
        )],
    }
}

/// Surface callback drawing one fullscreen triangle through the mock view ray
pub fn quad(draw: &mut dyn SurfaceDraw) {
    let m: Mat4 = colorimetry::IDENTITY;
    draw.set_uniform("projection", UniformValue::Mat4(m));
    draw.draw_triangles(&[-1.0, -1.0, 0.0, 3.0, -1.0, 0.0, -1.0, 3.0, 0.0]);
}

/// Two wavelength-set-independent altitude axes with `levels` levels each
pub fn toy_model(root: &Path, levels: u32) -> AtmosphereModel {
    AtmosphereModel {
        wavelengths: vec![440.0, 500.0, 560.0, 620.0],
        solar_irradiance: vec![1.9, 1.95, 1.85, 1.7],
        scatterers: vec![Scatterer {
            name: "rayleigh".into(),
            phase_function: PhaseFunctionType::General,
            cross_section: vec![1e-30; 4],
        }],
        absorbers: Vec::new(),
        earth_radius: 6_371_000.0,
        atmosphere_height: 120_000.0,
        transmittance_texture_size: [8, 4],
        irradiance_texture_size: [4, levels],
        scattering_texture_size: [4, 4, 2, levels],
        light_pollution_texture_size: [4, levels],
        eclipsed_double_scattering_texture_size: [8, 8, 2, levels],
        eclipsed_double_scattering_azimuth_samples: 4,
        eclipsed_double_scattering_elevation_samples_per_side: 4,
        scattering_orders: 4,
        has_eclipsed_double_scattering_tables: true,
        tables_use_unit_solar_irradiance: true,
        texture_dir: root.join("textures"),
        shader_dir: root.join("shaders"),
    }
}

/// Altitude whose position along the altitude axis is `u` in `[0, 1]`
pub fn altitude_at(model: &AtmosphereModel, u: f64) -> f32 {
    if u <= 0.0 {
        return 0.0;
    }
    if u >= 1.0 {
        return model.atmosphere_height;
    }
    let r0 = f64::from(model.earth_radius);
    let rt = f64::from(model.top_radius());
    let rho = u * (rt * rt - r0 * r0).sqrt();
    ((rho * rho + r0 * r0).sqrt() - r0) as f32
}

fn constant(sizes: &[u32], value: f32) -> (Vec<u16>, Vec<[f32; 4]>) {
    let count: u32 = sizes.iter().product();
    (
        sizes.iter().map(|&x| x as u16).collect(),
        vec![[value; 4]; count as usize],
    )
}

/// Write every table and shader `model` refers to
pub fn write_fixture(model: &AtmosphereModel) {
    let paths = TablePaths {
        dir: &model.texture_dir,
    };
    let write = |path: &Path, sizes: &[u32]| {
        let (sizes, texels) = constant(sizes, 0.25);
        write_table(path, &sizes, &texels).unwrap();
    };
    for wl in 0..model.wavelength_set_count() {
        write(&paths.transmittance(wl), &model.transmittance_texture_size);
        write(&paths.irradiance(wl), &model.irradiance_texture_size);
        write(&paths.multiple_scattering(wl), &model.scattering_texture_size);
        write(&paths.light_pollution(wl), &model.light_pollution_texture_size);
        for s in &model.scatterers {
            if s.phase_function == PhaseFunctionType::General {
                write(&paths.single_scattering(&s.name, wl), &model.scattering_texture_size);
                write(&paths.interpolation_guides(&s.name, wl), &model.scattering_texture_size);
            }
        }
    }
    std::fs::create_dir_all(&model.shader_dir).unwrap();
    let set = ScatteringRenderProgramSet::<()>::new(model);
    for id in set.ids() {
        if let Some(path) = set.key(id).shader_path(model) {
            std::fs::write(&path, format!("// {}\nvoid main() {{}}\n", set.key(id).describe(model)))
                .unwrap();
        }
    }
}

/// Run a cycle to completion, returning the number of steps taken
pub fn run(mut step: impl FnMut() -> skyglow::LoadingProgress) -> i32 {
    let mut steps = 0;
    loop {
        let progress = step();
        assert!(!progress.is_failed(), "step {} failed", steps);
        steps += 1;
        if progress.is_complete() {
            return steps;
        }
        assert!(steps < 10_000);
    }
}

pub const EPSILON: f32 = 1e-4;

pub fn close(a: f32, b: f32) -> bool {
    (a - b).abs() <= EPSILON * (1.0 + a.abs().max(b.abs()))
}
