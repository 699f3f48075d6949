use std::sync::Arc;

use crate::controller::{EclipseGeometry, TextureStreamingController};
use crate::error::{LoadError, ModelError, RenderError};
use crate::gpu::{Gpu, ViewRayShader};
use crate::loading::{LoadState, LoadingProgress};
use crate::model::AtmosphereModel;
use crate::pipeline::{Luminance, ScatteringRenderPipeline, SpectralRadiance, Surface};
use crate::settings::Settings;
use crate::textures::{AltitudeBracket, TableKind};

/// Host-facing renderer: loads a model's programs and tables, then draws the sky
///
/// A typical frame loop calls `begin_texture_prep` and, while it reports work, one
/// `step_texture_prep` per frame, then `draw`.
pub struct AtmosphereRenderer<G: Gpu> {
    controller: TextureStreamingController<G>,
    pipeline: ScatteringRenderPipeline,
}

impl<G: Gpu> AtmosphereRenderer<G> {
    pub fn new(gpu: G, model: Arc<AtmosphereModel>) -> Result<Self, ModelError> {
        let pipeline = ScatteringRenderPipeline::new(&model);
        Ok(Self {
            controller: TextureStreamingController::new(gpu, model)?,
            pipeline,
        })
    }

    pub fn model(&self) -> &AtmosphereModel {
        self.controller.model()
    }

    pub fn gpu(&self) -> &G {
        self.controller.gpu()
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        self.controller.gpu_mut()
    }

    pub fn controller(&self) -> &TextureStreamingController<G> {
        &self.controller
    }

    pub fn state(&self) -> LoadState {
        self.controller.state()
    }

    pub fn current_activity(&self) -> &str {
        self.controller.current_activity()
    }

    pub fn last_error(&self) -> Option<&LoadError> {
        self.controller.last_error()
    }

    pub fn latched_altitude(&self) -> f32 {
        self.controller.latched_altitude()
    }

    pub fn resident_bracket(&self, kind: TableKind) -> Option<AltitudeBracket> {
        self.controller.resident_bracket(kind)
    }

    pub fn resident_eclipse_geometry(&self) -> Option<EclipseGeometry> {
        self.controller.resident_eclipse_geometry()
    }

    pub fn begin_data_load(&mut self, view_ray: ViewRayShader, settings: &dyn Settings) -> i32 {
        self.controller.begin_data_load(view_ray, settings)
    }

    pub fn step_data_load(&mut self) -> LoadingProgress {
        self.controller.step_data_load()
    }

    pub fn begin_shader_reload(&mut self) -> i32 {
        self.controller.begin_shader_reload()
    }

    pub fn step_shader_reload(&mut self) -> LoadingProgress {
        self.controller.step_shader_reload()
    }

    pub fn begin_texture_prep(&mut self, settings: &dyn Settings) -> i32 {
        self.controller.begin_texture_prep(settings)
    }

    pub fn step_texture_prep(&mut self) -> LoadingProgress {
        self.controller.step_texture_prep()
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        self.pipeline
            .resize(self.controller.gpu_mut(), width, height)
    }

    pub fn set_radiance_capture(&mut self, enabled: bool) -> Result<(), RenderError> {
        self.pipeline
            .set_radiance_capture(self.controller.gpu_mut(), enabled)
    }

    pub fn draw(
        &mut self,
        settings: &dyn Settings,
        brightness: f32,
        clear: bool,
        surface: &mut Surface<'_>,
    ) -> Result<(), RenderError> {
        self.pipeline
            .draw(&mut self.controller, settings, brightness, clear, surface)
    }

    pub fn get_pixel_luminance(&mut self, x: u32, y: u32) -> Result<Luminance, RenderError> {
        self.pipeline
            .get_pixel_luminance(self.controller.gpu_mut(), x, y)
    }

    pub fn get_pixel_spectral_radiance(
        &mut self,
        x: u32,
        y: u32,
    ) -> Result<SpectralRadiance, RenderError> {
        let model = self.controller.model().clone();
        self.pipeline
            .get_pixel_spectral_radiance(self.controller.gpu_mut(), &model, x, y)
    }

    pub fn get_view_direction(
        &mut self,
        x: u32,
        y: u32,
        surface: &mut Surface<'_>,
    ) -> Result<[f32; 3], RenderError> {
        self.pipeline
            .get_view_direction(&mut self.controller, x, y, surface)
    }

    pub fn can_grab_radiance(&self, settings: &dyn Settings) -> bool {
        ScatteringRenderPipeline::can_grab_radiance(self.model(), settings)
    }

    pub fn can_set_solar_spectrum(&self) -> bool {
        ScatteringRenderPipeline::can_set_solar_spectrum(self.model())
    }

    pub fn can_render_precomputed_eclipsed_double_scattering(&self) -> bool {
        ScatteringRenderPipeline::can_render_precomputed_eclipsed_double_scattering(self.model())
    }

    pub fn set_solar_spectrum(&mut self, spectrum: &[f32]) -> Result<(), RenderError> {
        let model = self.controller.model().clone();
        self.pipeline.set_solar_spectrum(&model, spectrum)
    }

    pub fn reset_solar_spectrum(&mut self) -> Result<(), RenderError> {
        let model = self.controller.model().clone();
        self.pipeline.reset_solar_spectrum(&model)
    }
}
