//! Resumable loading of programs and tables
//!
//! Loading is split into bounded units so that a host can interleave it with its own frame loop.
//! Each `begin_*` call enumerates the units of a cycle once and dry-runs them, validating every
//! input and compiling every shader stage without uploading anything; each `step_*` call then
//! performs exactly one unit, in the same order. The camera altitude and eclipse geometry are latched when a cycle begins and hold until
//! it completes.

use std::collections::HashMap;
use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;

use crate::colorimetry;
use crate::eclipse::{CoarseGridParams, EclipseDoubleScatteringEngine, GridSlot};
use crate::error::{GpuError, LoadError, ModelError};
use crate::gpu::{Gpu, ProgramDesc, TextureDesc, VertexStage, ViewRayShader};
use crate::loading::{Cycle, CycleKind, LoadState, LoadingProgress, StepMode};
use crate::model::{AtmosphereModel, PhaseFunctionType};
use crate::programs::{ProgramId, ScatteringRenderProgramSet, VIEW_DIRECTION_FRAGMENT};
use crate::settings::Settings;
use crate::shader_cache::ShaderCache;
use crate::table::{self, TableHeader, TablePaths};
use crate::textures::{
    level_altitude, AltitudeBracket, AltitudeSlicedTextureSet, SliceEnd, SliceSlot, TableKind,
};

/// Moon position relative to the sun, which the eclipse table is computed for
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EclipseGeometry {
    /// Moon zenith angle minus sun zenith angle
    pub moon_zenith_offset: f32,
    /// In `[0, 2π)`
    pub moon_azimuth_relative_to_sun: f32,
    pub earth_moon_distance: f32,
}

impl EclipseGeometry {
    pub fn from_settings(settings: &dyn Settings) -> Self {
        let relative = (settings.moon_azimuth() - settings.sun_azimuth()).rem_euclid(2.0 * PI);
        Self {
            moon_zenith_offset: settings.moon_zenith_angle() - settings.sun_zenith_angle(),
            moon_azimuth_relative_to_sun: relative,
            earth_moon_distance: settings.earth_moon_distance(),
        }
    }

    /// Moon zenith angle when the sun is at `sun_zenith_angle`
    pub fn moon_zenith_angle(&self, sun_zenith_angle: f32) -> f32 {
        (sun_zenith_angle + self.moon_zenith_offset).max(0.0).min(PI)
    }
}

/// Whether the eclipse table is populated for `settings`
pub fn eclipse_table_wanted(model: &AtmosphereModel, settings: &dyn Settings) -> bool {
    settings.eclipsed_double_scattering_precomputed() && model.has_eclipsed_double_scattering_tables
}

/// One bounded piece of loading work
#[derive(Debug, Copy, Clone, PartialEq)]
enum Unit {
    Compile(ProgramId),
    Transmittance(usize),
    /// A whole irradiance table, sampled by the coarse-grid programs
    EclipseData(usize),
    Slice {
        slot: SliceSlot,
        end: SliceEnd,
        bracket: AltitudeBracket,
    },
    /// Restore one altitude's coarse grids from the sample cache
    EclipseRestore {
        level: u32,
    },
    /// Render one wavelength set's coarse grids for every sun zenith angle
    EclipseCompute {
        level: u32,
        wavelength_set: usize,
    },
    /// Reconstruct and upload one altitude slice of the eclipse table
    EclipseUpload {
        level: u32,
        end: SliceEnd,
        bracket: AltitudeBracket,
    },
}

/// Coarse samples already computed for the current eclipse geometry, by altitude level
#[derive(Default)]
struct CoarseSampleCache {
    geometry: Option<EclipseGeometry>,
    levels: HashMap<u32, Vec<[f32; 4]>>,
}

impl CoarseSampleCache {
    /// Forget everything if `geometry` differs from what the cache was filled for
    fn retain_geometry(&mut self, geometry: EclipseGeometry) {
        if self.geometry != Some(geometry) {
            self.levels.clear();
            self.geometry = Some(geometry);
        }
    }
}

pub struct TextureStreamingController<G: Gpu> {
    gpu: G,
    model: Arc<AtmosphereModel>,
    state: LoadState,
    activity: String,
    last_error: Option<LoadError>,
    shader_cache: ShaderCache,
    view_ray: Option<ViewRayShader>,
    cycle: Option<Cycle<Unit>>,

    programs: ScatteringRenderProgramSet<G::Program>,
    transmittance: Vec<G::Texture>,
    eclipse_data: Vec<G::Texture>,
    slices: AltitudeSlicedTextureSet<G::Texture>,

    latched_altitude: f32,
    latched_geometry: EclipseGeometry,
    /// Geometry the resident eclipse table was computed for
    resident_geometry: Option<EclipseGeometry>,
    eclipse: EclipseDoubleScatteringEngine,
    scratch: EclipseDoubleScatteringEngine,
    coarse_cache: CoarseSampleCache,
}

/// Borrowed view of everything drawing needs
pub(crate) struct Resources<'a, G: Gpu> {
    pub model: &'a AtmosphereModel,
    pub programs: &'a ScatteringRenderProgramSet<G::Program>,
    pub transmittance: &'a [G::Texture],
    pub slices: &'a AltitudeSlicedTextureSet<G::Texture>,
}

impl<G: Gpu> TextureStreamingController<G> {
    pub fn new(gpu: G, model: Arc<AtmosphereModel>) -> Result<Self, ModelError> {
        model.validate()?;
        let params = CoarseGridParams::from_model(&model);
        Ok(Self {
            gpu,
            state: LoadState::NotReady,
            activity: String::new(),
            last_error: None,
            shader_cache: ShaderCache::new(),
            view_ray: None,
            cycle: None,
            programs: ScatteringRenderProgramSet::new(&model),
            transmittance: Vec::new(),
            eclipse_data: Vec::new(),
            slices: AltitudeSlicedTextureSet::new(),
            latched_altitude: 0.0,
            latched_geometry: EclipseGeometry {
                moon_zenith_offset: 0.0,
                moon_azimuth_relative_to_sun: 0.0,
                earth_moon_distance: 0.0,
            },
            resident_geometry: None,
            eclipse: EclipseDoubleScatteringEngine::new(params),
            scratch: EclipseDoubleScatteringEngine::new(params),
            coarse_cache: CoarseSampleCache::default(),
            model,
        })
    }

    pub fn model(&self) -> &Arc<AtmosphereModel> {
        &self.model
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Human-readable description of the unit being run, or of the last failure
    pub fn current_activity(&self) -> &str {
        &self.activity
    }

    pub fn last_error(&self) -> Option<&LoadError> {
        self.last_error.as_ref()
    }

    /// Altitude the resident or loading slices were chosen for
    pub fn latched_altitude(&self) -> f32 {
        self.latched_altitude
    }

    pub fn resident_bracket(&self, kind: TableKind) -> Option<AltitudeBracket> {
        self.slices.bracket(kind)
    }

    /// Geometry of the resident eclipse table, if any
    pub fn resident_eclipse_geometry(&self) -> Option<EclipseGeometry> {
        self.resident_geometry
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    pub(crate) fn view_ray(&self) -> Option<&ViewRayShader> {
        self.view_ray.as_ref()
    }

    pub(crate) fn split(&mut self) -> (&mut G, Resources<'_, G>) {
        (
            &mut self.gpu,
            Resources {
                model: &self.model,
                programs: &self.programs,
                transmittance: &self.transmittance,
                slices: &self.slices,
            },
        )
    }

    /// Whether a cycle other than `kind` has units left
    fn busy_with_other(&self, kind: CycleKind) -> bool {
        self.cycle
            .as_ref()
            .map_or(false, |c| c.kind != kind && c.is_running())
    }

    fn running(&self, kind: CycleKind) -> Option<&Cycle<Unit>> {
        self.cycle
            .as_ref()
            .filter(|c| c.kind == kind && c.is_running())
    }

    fn release_all(&mut self) {
        self.programs.release();
        self.transmittance.clear();
        self.eclipse_data.clear();
        self.slices.clear();
        self.resident_geometry = None;
        self.eclipse.clear();
        self.scratch.clear();
    }

    fn fail(&mut self, error: LoadError) {
        log::warn!("{}", error);
        self.release_all();
        self.activity = format!("Failed: {}", error);
        self.last_error = Some(error);
        self.state = LoadState::NotReady;
    }

    /// Dry-run `units` and make them the current cycle, returning the step count or -1
    fn begin(&mut self, kind: CycleKind, units: Vec<Unit>) -> i32 {
        for unit in &units {
            if let Err(e) = self.run_unit(unit, StepMode::CountStepsOnly) {
                self.cycle = None;
                self.fail(e);
                return -1;
            }
        }
        let count = units.len() as i32;
        log::info!("{:?} cycle: {} steps", kind, count);
        self.activity.clear();
        let cycle = Cycle::new(kind, units);
        self.state = if cycle.is_complete() {
            LoadState::ReadyToRender
        } else {
            kind.state()
        };
        self.cycle = Some(cycle);
        count
    }

    /// Run the next unit of a `kind` cycle
    fn step(&mut self, kind: CycleKind) -> LoadingProgress {
        let (unit, done) = match self.cycle {
            Some(ref c) if c.kind == kind => {
                if !c.is_running() {
                    return c.progress();
                }
                (c.units[c.done], c.done)
            }
            _ => return LoadingProgress::FAILED,
        };
        log::debug!("{:?} step {}: {:?}", kind, done, unit);
        if let Err(e) = self.run_unit(&unit, StepMode::Execute) {
            self.fail(e);
            if let Some(ref mut c) = self.cycle {
                c.failed = true;
            }
            return LoadingProgress {
                steps_done: done as i32,
                steps_to_do: -1,
            };
        }
        let cycle = match self.cycle {
            Some(ref mut c) => c,
            None => return LoadingProgress::FAILED,
        };
        cycle.done += 1;
        let progress = cycle.progress();
        if cycle.is_complete() {
            debug_assert!(kind == CycleKind::Textures || self.programs.is_complete());
            log::info!(
                "{:?} cycle complete, {} altitude slices resident",
                kind,
                self.slices
                    .iter()
                    .map(|(_, pair)| pair.resident_count())
                    .sum::<usize>()
            );
            self.activity.clear();
            self.state = LoadState::ReadyToRender;
        }
        progress
    }

    /// Free everything and enumerate a full load for `settings`
    ///
    /// Returns the number of steps, or -1 if inputs are missing or malformed.
    pub fn begin_data_load(&mut self, view_ray: ViewRayShader, settings: &dyn Settings) -> i32 {
        if self.busy_with_other(CycleKind::Data) {
            return -1;
        }
        self.cycle = None;
        self.release_all();
        self.last_error = None;
        self.shader_cache.clear();
        self.coarse_cache = CoarseSampleCache::default();
        self.view_ray = Some(view_ray);
        self.latch(settings);

        let mut units: Vec<Unit> = self.programs.ids().map(Unit::Compile).collect();
        let sets = self.model.wavelength_set_count();
        units.extend((0..sets).map(Unit::Transmittance));
        if self.model.has_eclipsed_double_scattering_tables {
            units.extend((0..sets).map(Unit::EclipseData));
        }
        units.extend(self.slice_units(eclipse_table_wanted(&self.model, settings)));
        self.begin(CycleKind::Data, units)
    }

    pub fn step_data_load(&mut self) -> LoadingProgress {
        self.step(CycleKind::Data)
    }

    /// Recompile every program from freshly read sources, leaving tables alone
    pub fn begin_shader_reload(&mut self) -> i32 {
        if let Some(c) = self.running(CycleKind::Shaders) {
            return c.units.len() as i32;
        }
        if self.state != LoadState::ReadyToRender || self.busy_with_other(CycleKind::Shaders) {
            return -1;
        }
        self.shader_cache.clear();
        let units = self.programs.ids().map(Unit::Compile).collect();
        self.begin(CycleKind::Shaders, units)
    }

    pub fn step_shader_reload(&mut self) -> LoadingProgress {
        self.step(CycleKind::Shaders)
    }

    /// Bring the resident slices in line with the current altitude and eclipse geometry
    ///
    /// Returns 0 without starting a cycle when nothing needs to change. While a cycle runs, its
    /// step count is returned and the altitude latched at its start is kept.
    pub fn begin_texture_prep(&mut self, settings: &dyn Settings) -> i32 {
        if let Some(c) = self.running(CycleKind::Textures) {
            return c.units.len() as i32;
        }
        if self.state != LoadState::ReadyToRender || self.busy_with_other(CycleKind::Textures) {
            return -1;
        }
        let eclipse = eclipse_table_wanted(&self.model, settings);
        if self.slices_current(settings.altitude(), eclipse, settings) {
            return 0;
        }
        let altitude = settings.altitude();
        let tables_current = self
            .slice_slots()
            .iter()
            .all(|slot| self.slot_current(slot, altitude));
        self.resident_geometry = None;
        self.latch(settings);
        let units = if tables_current {
            // Only the eclipse geometry moved
            self.slices.release(TableKind::is_eclipse);
            self.eclipse_units()
        } else {
            self.slices.clear();
            self.slice_units(eclipse)
        };
        self.begin(CycleKind::Textures, units)
    }

    pub fn step_texture_prep(&mut self) -> LoadingProgress {
        self.step(CycleKind::Textures)
    }

    fn latch(&mut self, settings: &dyn Settings) {
        self.latched_altitude = settings.altitude();
        self.latched_geometry = EclipseGeometry::from_settings(settings);
        self.coarse_cache.retain_geometry(self.latched_geometry);
    }

    /// Altitude levels of the tables of `kind`
    pub fn altitude_levels(&self, kind: TableKind) -> u32 {
        let m = &self.model;
        match kind {
            TableKind::Irradiance => m.irradiance_texture_size[1],
            TableKind::MultipleScattering
            | TableKind::SingleScattering
            | TableKind::InterpolationGuides => m.scattering_texture_size[3],
            TableKind::LightPollution => m.light_pollution_texture_size[1],
            TableKind::EclipsedDoubleScattering => m.eclipsed_double_scattering_texture_size[3],
        }
    }

    fn bracket(&self, kind: TableKind, altitude: f32) -> AltitudeBracket {
        AltitudeBracket::for_altitude(&self.model, altitude, self.altitude_levels(kind))
    }

    /// Table slots holding altitude slices, excluding the eclipse table
    fn slice_slots(&self) -> Vec<SliceSlot> {
        let mut slots = Vec::new();
        for wlset in 0..self.model.wavelength_set_count() {
            slots.push(SliceSlot::per_set(TableKind::Irradiance, wlset));
            slots.push(SliceSlot::per_set(TableKind::MultipleScattering, wlset));
            for (i, s) in self.model.scatterers.iter().enumerate() {
                if s.phase_function == PhaseFunctionType::General {
                    slots.push(SliceSlot::per_scatterer(TableKind::SingleScattering, i, wlset));
                    slots.push(SliceSlot::per_scatterer(
                        TableKind::InterpolationGuides,
                        i,
                        wlset,
                    ));
                }
            }
            slots.push(SliceSlot::per_set(TableKind::LightPollution, wlset));
        }
        slots
    }

    /// Whether `slot` holds a complete pair bracketing `altitude`
    fn slot_current(&self, slot: &SliceSlot, altitude: f32) -> bool {
        let wanted = self.bracket(slot.kind, altitude);
        self.slices
            .get(slot)
            .map_or(false, |p| p.is_complete() && p.bracket.same_levels(&wanted))
    }

    fn slices_current(&self, altitude: f32, eclipse: bool, settings: &dyn Settings) -> bool {
        if !self
            .slice_slots()
            .iter()
            .all(|s| self.slot_current(s, altitude))
        {
            return false;
        }
        if eclipse {
            if !self.slot_current(&SliceSlot::eclipse(), altitude) {
                return false;
            }
            if self.resident_geometry != Some(EclipseGeometry::from_settings(settings)) {
                return false;
            }
        }
        true
    }

    /// Units loading every slice for the latched altitude
    fn slice_units(&self, eclipse: bool) -> Vec<Unit> {
        let altitude = self.latched_altitude;
        let mut units = Vec::new();
        for slot in self.slice_slots() {
            let bracket = self.bracket(slot.kind, altitude);
            for end in ends(&bracket) {
                units.push(Unit::Slice { slot, end, bracket });
            }
        }
        if eclipse {
            units.extend(self.eclipse_units());
        }
        units
    }

    /// Units populating the eclipse table for the latched altitude and geometry
    fn eclipse_units(&self) -> Vec<Unit> {
        let bracket = self.bracket(TableKind::EclipsedDoubleScattering, self.latched_altitude);
        let mut units = Vec::new();
        for end in ends(&bracket) {
            let level = level_of(&bracket, end);
            if self.coarse_cache.levels.contains_key(&level) {
                units.push(Unit::EclipseRestore { level });
            } else {
                units.extend(
                    (0..self.model.wavelength_set_count()).map(|wavelength_set| {
                        Unit::EclipseCompute {
                            level,
                            wavelength_set,
                        }
                    }),
                );
            }
            units.push(Unit::EclipseUpload {
                level,
                end,
                bracket,
            });
        }
        units
    }

    fn table_path(&self, slot: &SliceSlot) -> PathBuf {
        let paths = TablePaths {
            dir: &self.model.texture_dir,
        };
        let wlset = slot.wavelength_set.unwrap_or(0);
        let scatterer = slot
            .scatterer
            .map_or("", |i| self.model.scatterers[i].name.as_str());
        match slot.kind {
            TableKind::Irradiance => paths.irradiance(wlset),
            TableKind::MultipleScattering => paths.multiple_scattering(wlset),
            TableKind::SingleScattering => paths.single_scattering(scatterer, wlset),
            TableKind::InterpolationGuides => paths.interpolation_guides(scatterer, wlset),
            TableKind::LightPollution => paths.light_pollution(wlset),
            // Populated at runtime rather than read
            TableKind::EclipsedDoubleScattering => PathBuf::new(),
        }
    }

    fn table_sizes(&self, kind: TableKind) -> Vec<u32> {
        let m = &self.model;
        match kind {
            TableKind::Irradiance => m.irradiance_texture_size.to_vec(),
            TableKind::MultipleScattering
            | TableKind::SingleScattering
            | TableKind::InterpolationGuides => m.scattering_texture_size.to_vec(),
            TableKind::LightPollution => m.light_pollution_texture_size.to_vec(),
            TableKind::EclipsedDoubleScattering => {
                m.eclipsed_double_scattering_texture_size.to_vec()
            }
        }
    }

    fn gpu_error(what: String) -> impl FnOnce(GpuError) -> LoadError {
        move |source| LoadError::Gpu { what, source }
    }

    fn run_unit(&mut self, unit: &Unit, mode: StepMode) -> Result<(), LoadError> {
        match *unit {
            Unit::Compile(id) => self.compile(id, mode),
            Unit::Transmittance(wlset) => {
                let path = TablePaths {
                    dir: &self.model.texture_dir,
                }
                .transmittance(wlset);
                let sizes = self.model.transmittance_texture_size;
                let texture = self.load_whole(&path, &sizes, mode)?;
                if let Some(t) = texture {
                    self.transmittance.push(t);
                }
                Ok(())
            }
            Unit::EclipseData(wlset) => {
                let path = TablePaths {
                    dir: &self.model.texture_dir,
                }
                .irradiance(wlset);
                let sizes = self.model.irradiance_texture_size;
                let texture = self.load_whole(&path, &sizes, mode)?;
                if let Some(t) = texture {
                    self.eclipse_data.push(t);
                }
                Ok(())
            }
            Unit::Slice { slot, end, bracket } => self.load_slice(slot, end, bracket, mode),
            Unit::EclipseRestore { level } => {
                if mode == StepMode::CountStepsOnly {
                    return Ok(());
                }
                self.activity = format!("Restoring eclipse coarse grid at altitude level {}", level);
                let altitude = self.level_altitude(level);
                let data = self.coarse_cache.levels.get(&level).map_or(&[][..], |x| &x[..]);
                self.eclipse
                    .load_coarse_grid_samples(level as usize, altitude, data)?;
                Ok(())
            }
            Unit::EclipseCompute {
                level,
                wavelength_set,
            } => {
                if mode == StepMode::CountStepsOnly {
                    return Ok(());
                }
                self.compute_coarse_grids(level, wavelength_set)
            }
            Unit::EclipseUpload {
                level,
                end,
                bracket,
            } => {
                if mode == StepMode::CountStepsOnly {
                    return Ok(());
                }
                self.activity = format!("Reconstructing eclipse table at altitude level {}", level);
                let altitude = self.level_altitude(level);
                let sizes = self.model.eclipsed_double_scattering_texture_size;
                let mut texels =
                    Vec::with_capacity(sizes[0] as usize * sizes[1] as usize * sizes[2] as usize);
                for sza in 0..sizes[2] as usize {
                    texels.extend(self.eclipse.generate_texture_from_coarse_grid_data(
                        level as usize,
                        sza,
                        altitude,
                    )?);
                }
                let desc = TextureDesc::from_sizes(&sizes[..3]);
                let texture = self
                    .gpu
                    .upload_texture(&desc, &texels)
                    .map_err(Self::gpu_error(self.activity.clone()))?;
                self.slices
                    .insert(SliceSlot::eclipse(), bracket, end, texture);
                if end == last_end(&bracket) {
                    self.resident_geometry = Some(self.latched_geometry);
                }
                Ok(())
            }
        }
    }

    fn level_altitude(&self, level: u32) -> f32 {
        level_altitude(
            &self.model,
            level,
            self.altitude_levels(TableKind::EclipsedDoubleScattering),
        )
    }

    /// Assemble the program `id` from its shader file and the host view-ray function
    fn program_desc(&mut self, id: ProgramId) -> Result<ProgramDesc, LoadError> {
        let key = *self.programs.key(id);
        let name = key.describe(&self.model);
        let view_ray = self.view_ray.as_ref().ok_or_else(|| LoadError::Gpu {
            what: name.clone(),
            source: GpuError::Unsupported("no view-ray shader".into()),
        })?;
        let body = match key.shader_path(&self.model) {
            Some(ref path) => self.shader_cache.source(path)?,
            None => VIEW_DIRECTION_FRAGMENT,
        };
        let (mut uniforms, samplers) = key.interface(&self.model);
        Ok(if key.uses_surface() {
            uniforms.extend(view_ray.uniforms.iter().cloned());
            ProgramDesc {
                name,
                fragment_source: format!("{}\n{}", view_ray.fragment_source, body),
                vertex: VertexStage::Host {
                    source: view_ray.vertex_source.clone(),
                    attributes: view_ray.vertex_attributes.clone(),
                },
                uniforms,
                samplers,
            }
        } else {
            ProgramDesc {
                name,
                fragment_source: body.to_owned(),
                vertex: VertexStage::Fullscreen,
                uniforms,
                samplers,
            }
        })
    }

    /// Compile one program; a dry run compiles its stages without keeping anything
    fn compile(&mut self, id: ProgramId, mode: StepMode) -> Result<(), LoadError> {
        let desc = self.program_desc(id)?;
        if mode == StepMode::CountStepsOnly {
            self.activity = format!("Checking {}", desc.name);
            return self
                .gpu
                .check_program(&desc)
                .map_err(Self::gpu_error(desc.name));
        }
        self.activity = format!("Compiling {}", desc.name);
        let program = self
            .gpu
            .compile_program(&desc)
            .map_err(Self::gpu_error(desc.name))?;
        self.programs.set(id, program);
        Ok(())
    }

    /// Validate a whole table, and upload it unless only counting
    fn load_whole(
        &mut self,
        path: &std::path::Path,
        sizes: &[u32],
        mode: StepMode,
    ) -> Result<Option<G::Texture>, LoadError> {
        let header = TableHeader::read(path)?;
        header.expect_sizes(path, sizes)?;
        if mode == StepMode::CountStepsOnly {
            return Ok(None);
        }
        self.activity = format!("Loading {}", path.display());
        let texels = table::read_whole(path, &header)?;
        let texture = self
            .gpu
            .upload_texture(&TextureDesc::from_sizes(sizes), &texels)
            .map_err(Self::gpu_error(self.activity.clone()))?;
        Ok(Some(texture))
    }

    fn load_slice(
        &mut self,
        slot: SliceSlot,
        end: SliceEnd,
        bracket: AltitudeBracket,
        mode: StepMode,
    ) -> Result<(), LoadError> {
        let path = self.table_path(&slot);
        let sizes = self.table_sizes(slot.kind);
        let header = TableHeader::read(&path)?;
        header.expect_sizes(&path, &sizes)?;
        if mode == StepMode::CountStepsOnly {
            return Ok(());
        }
        let level = level_of(&bracket, end);
        self.activity = format!(
            "Loading altitude slice {} of {}",
            level,
            path.display()
        );
        let texels = table::read_altitude_slice(&path, &header, level)?;
        let desc = TextureDesc::from_sizes(&sizes[..sizes.len() - 1]);
        let texture = self
            .gpu
            .upload_texture(&desc, &texels)
            .map_err(Self::gpu_error(self.activity.clone()))?;
        self.slices.insert(slot, bracket, end, texture);
        Ok(())
    }

    /// Render the coarse grids of one wavelength set at `level` and fold them into the total
    fn compute_coarse_grids(&mut self, level: u32, wlset: usize) -> Result<(), LoadError> {
        self.activity = format!(
            "Computing eclipse coarse grid for wavelength set {} at altitude level {}",
            wlset, level
        );
        let altitude = self.level_altitude(level);
        let geometry = self.latched_geometry;
        let program_id = self.programs.resolved().coarse_grid[wlset];
        let program = self.programs.get(program_id).ok_or_else(|| LoadError::Gpu {
            what: self.activity.clone(),
            source: GpuError::Unsupported("coarse grid program not compiled".into()),
        })?;
        let data = match (self.transmittance.get(wlset), self.eclipse_data.get(wlset)) {
            (Some(t), Some(i)) => [t, i],
            _ => {
                return Err(LoadError::Gpu {
                    what: self.activity.clone(),
                    source: GpuError::Unsupported("data textures not loaded".into()),
                })
            }
        };
        let engine = if wlset == 0 {
            &mut self.eclipse
        } else {
            &mut self.scratch
        };
        let sza_count = engine.params().sza_count;
        for sza_index in 0..sza_count {
            let sun = engine.params().sza(sza_index) as f32;
            engine.compute_radiance_on_coarse_grid(
                &mut self.gpu,
                program,
                &data,
                GridSlot {
                    altitude_index: level as usize,
                    sza_index: sza_index as usize,
                },
                altitude,
                sun,
                geometry.moon_zenith_angle(sun),
                geometry.moon_azimuth_relative_to_sun,
                geometry.earth_moon_distance,
            )?;
        }
        let matrix = colorimetry::radiance_to_luminance(&self.model, wlset);
        if wlset == 0 {
            self.eclipse.convert_radiance_to_luminance(&matrix);
        } else {
            self.eclipse.accumulate_luminance(&self.scratch, &matrix)?;
        }
        if wlset + 1 == self.eclipse.num_data_textures() {
            let mut samples = Vec::with_capacity(self.eclipse.params().altitude_block_len());
            self.eclipse.append_coarse_grid_samples_to(&mut samples)?;
            self.coarse_cache.levels.insert(level, samples);
        }
        Ok(())
    }
}

/// Slice ends a bracket needs loaded
fn ends(bracket: &AltitudeBracket) -> Vec<SliceEnd> {
    if bracket.is_single() {
        vec![SliceEnd::Lower]
    } else {
        vec![SliceEnd::Lower, SliceEnd::Upper]
    }
}

fn last_end(bracket: &AltitudeBracket) -> SliceEnd {
    if bracket.is_single() {
        SliceEnd::Lower
    } else {
        SliceEnd::Upper
    }
}

fn level_of(bracket: &AltitudeBracket, end: SliceEnd) -> u32 {
    match end {
        SliceEnd::Lower => bracket.lower,
        SliceEnd::Upper => bracket.upper,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RenderSettings;

    #[test]
    fn moon_follows_sun() {
        let settings = RenderSettings {
            sun_zenith_angle: 1.0,
            moon_zenith_angle: 1.25,
            sun_azimuth: 6.0,
            moon_azimuth: 0.5,
            ..RenderSettings::default()
        };
        let geometry = EclipseGeometry::from_settings(&settings);
        assert!((geometry.moon_zenith_offset - 0.25).abs() < 1e-6);
        assert!((geometry.moon_azimuth_relative_to_sun - (0.5 + 2.0 * PI - 6.0)).abs() < 1e-5);
        assert_eq!(geometry.moon_zenith_angle(0.0), 0.25);
        assert_eq!(geometry.moon_zenith_angle(PI), PI);
    }

    #[test]
    fn boundary_bracket_has_one_end() {
        let single = AltitudeBracket {
            lower: 3,
            upper: 3,
            weight: 0.0,
        };
        assert_eq!(ends(&single), vec![SliceEnd::Lower]);
        assert_eq!(last_end(&single), SliceEnd::Lower);
        let pair = AltitudeBracket {
            lower: 1,
            upper: 2,
            weight: 0.5,
        };
        assert_eq!(ends(&pair), vec![SliceEnd::Lower, SliceEnd::Upper]);
        assert_eq!(level_of(&pair, SliceEnd::Upper), 2);
    }
}
