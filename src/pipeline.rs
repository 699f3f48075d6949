//! Drawing the sky from resident programs and tables
//!
//! Every pass blends additively into the luminance target. When radiance capture is on, passes
//! producing spectral radiance are drawn a second time into the radiance layer of their wavelength
//! set.

use crate::colorimetry::{self, Mat4, IDENTITY};
use crate::controller::{eclipse_table_wanted, Resources, TextureStreamingController};
use crate::error::RenderError;
use crate::gpu::{DrawCall, Gpu, SurfaceDraw, Target, UniformValue};
use crate::loading::LoadState;
use crate::model::AtmosphereModel;
use crate::programs::ProgramId;
use crate::settings::Settings;
use crate::textures::{SliceSlot, TableKind};

/// Mean radius of the Moon (m)
pub const MOON_RADIUS: f32 = 1_737_100.0;

/// Photopic tristimulus and scotopic luminance of one pixel
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Luminance {
    /// CIE XYZ (cd/m^2)
    pub photopic: [f32; 3],
    /// cd/m^2
    pub scotopic: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpectralRadiance {
    pub wavelengths: Vec<f32>,
    /// One value per wavelength (W/m^2/sr/nm)
    pub radiance: Vec<f32>,
}

pub type Surface<'a> = dyn FnMut(&mut dyn SurfaceDraw) + 'a;

/// Unit vector for a zenith angle and azimuth, z up
pub fn direction(zenith_angle: f32, azimuth: f32) -> [f32; 3] {
    let (sin_z, cos_z) = zenith_angle.sin_cos();
    let (sin_a, cos_a) = azimuth.sin_cos();
    [cos_a * sin_z, sin_a * sin_z, cos_z]
}

pub struct ScatteringRenderPipeline {
    width: u32,
    height: u32,
    drawn: bool,
    radiance_capture: bool,
    wavelength_sets: usize,
    luminance_matrices: Vec<Mat4>,
    solar_irradiance_fixup: Vec<[f32; 4]>,
}

/// Values shared by every pass of one frame
struct Frame {
    altitude: f32,
    sun_direction: [f32; 3],
    sun_zenith_angle: f32,
    moon_position: [f32; 3],
    moon_angular_radius: f32,
    brightness: f32,
}

/// What one pass draws with, beyond the shared uniforms
struct Pass<'a, G: Gpu> {
    program: ProgramId,
    wavelength_set: usize,
    eclipsed: bool,
    /// The tables already hold luminance, so the pass has no radiance counterpart
    luminance_only: bool,
    slice_weight: f32,
    extra: Vec<(&'static str, UniformValue)>,
    textures: Vec<(&'static str, &'a G::Texture)>,
}

impl ScatteringRenderPipeline {
    pub fn new(model: &AtmosphereModel) -> Self {
        let sets = model.wavelength_set_count();
        Self {
            width: 0,
            height: 0,
            drawn: false,
            radiance_capture: false,
            wavelength_sets: sets,
            luminance_matrices: (0..sets)
                .map(|wl| colorimetry::radiance_to_luminance(model, wl))
                .collect(),
            solar_irradiance_fixup: default_fixup(model),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn has_drawn(&self) -> bool {
        self.drawn
    }

    pub fn radiance_capture(&self) -> bool {
        self.radiance_capture
    }

    pub fn solar_irradiance_fixup(&self) -> &[[f32; 4]] {
        &self.solar_irradiance_fixup
    }

    fn radiance_layers(&self) -> u32 {
        if self.radiance_capture {
            self.wavelength_sets as u32
        } else {
            0
        }
    }

    /// Reallocate targets, discarding what was drawn
    pub fn resize<G: Gpu>(&mut self, gpu: &mut G, width: u32, height: u32) -> Result<(), RenderError> {
        self.drawn = false;
        gpu.resize_targets(width, height, self.radiance_layers())?;
        self.width = width;
        self.height = height;
        log::debug!("render targets resized to {}x{}", width, height);
        Ok(())
    }

    /// Toggle drawing spectral radiance alongside luminance; reallocates sized targets
    pub fn set_radiance_capture<G: Gpu>(
        &mut self,
        gpu: &mut G,
        enabled: bool,
    ) -> Result<(), RenderError> {
        if enabled == self.radiance_capture {
            return Ok(());
        }
        self.radiance_capture = enabled;
        if self.width != 0 && self.height != 0 {
            let (w, h) = (self.width, self.height);
            self.resize(gpu, w, h)?;
        }
        Ok(())
    }

    /// Whether per-pixel spectral radiance is meaningful under `settings`
    pub fn can_grab_radiance(model: &AtmosphereModel, settings: &dyn Settings) -> bool {
        !uses_precomputed_eclipse(model, settings)
    }

    pub fn can_set_solar_spectrum(model: &AtmosphereModel) -> bool {
        model.tables_use_unit_solar_irradiance
    }

    pub fn can_render_precomputed_eclipsed_double_scattering(model: &AtmosphereModel) -> bool {
        model.has_eclipsed_double_scattering_tables
    }

    /// Override the solar spectral irradiance, one value per model wavelength
    pub fn set_solar_spectrum(
        &mut self,
        model: &AtmosphereModel,
        spectrum: &[f32],
    ) -> Result<(), RenderError> {
        if !Self::can_set_solar_spectrum(model) {
            return Err(RenderError::SolarSpectrumFixed);
        }
        if spectrum.len() != model.wavelengths.len() {
            return Err(RenderError::SpectrumLength {
                expected: model.wavelengths.len(),
                got: spectrum.len(),
            });
        }
        self.solar_irradiance_fixup = spectrum
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();
        Ok(())
    }

    pub fn reset_solar_spectrum(&mut self, model: &AtmosphereModel) -> Result<(), RenderError> {
        if !Self::can_set_solar_spectrum(model) {
            return Err(RenderError::SolarSpectrumFixed);
        }
        self.solar_irradiance_fixup = default_fixup(model);
        Ok(())
    }

    /// Draw every enabled pass for `settings`
    ///
    /// `surface` supplies the host's geometry once per pass. A brightness that is not a positive
    /// finite number draws nothing beyond the optional clear.
    pub fn draw<G: Gpu>(
        &mut self,
        controller: &mut TextureStreamingController<G>,
        settings: &dyn Settings,
        brightness: f32,
        clear: bool,
        surface: &mut Surface<'_>,
    ) -> Result<(), RenderError> {
        let state = controller.state();
        if state != LoadState::ReadyToRender {
            return Err(RenderError::NotReady(state));
        }
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::NoTargets);
        }
        let weight = |kind| {
            controller.resident_bracket(kind).map(|b| {
                b.weight_at(
                    controller.model(),
                    settings.altitude(),
                    controller.altitude_levels(kind),
                )
            })
        };
        let weights = SliceWeights {
            irradiance: weight(TableKind::Irradiance),
            scattering: weight(TableKind::MultipleScattering),
            light_pollution: weight(TableKind::LightPollution),
            eclipse: weight(TableKind::EclipsedDoubleScattering),
        };
        let frame = Frame {
            altitude: settings.altitude(),
            sun_direction: direction(settings.sun_zenith_angle(), settings.sun_azimuth()),
            sun_zenith_angle: settings.sun_zenith_angle(),
            moon_position: {
                let d = direction(settings.moon_zenith_angle(), settings.moon_azimuth());
                let r = settings.earth_moon_distance();
                [d[0] * r, d[1] * r, d[2] * r]
            },
            moon_angular_radius: (MOON_RADIUS / settings.earth_moon_distance())
                .max(-1.0)
                .min(1.0)
                .asin(),
            brightness,
        };

        let (gpu, res) = controller.split();
        if clear {
            gpu.clear_target(Target::Luminance)?;
            for layer in 0..self.radiance_layers() {
                gpu.clear_target(Target::Radiance { layer })?;
            }
        }
        if !(brightness.is_finite() && brightness > 0.0) {
            log::trace!("skipping passes for brightness {}", brightness);
            self.drawn = true;
            return Ok(());
        }

        let passes = self.collect_passes(&res, settings, &weights)?;
        for pass in &passes {
            if pass.luminance_only {
                self.draw_luminance_only(gpu, &res, &frame, pass, surface)?;
            } else {
                self.draw_pass(gpu, &res, &frame, pass, surface)?;
            }
        }
        self.drawn = true;
        Ok(())
    }

    /// Passes in drawing order
    fn collect_passes<'a, G: Gpu>(
        &self,
        res: &Resources<'a, G>,
        settings: &dyn Settings,
        weights: &SliceWeights,
    ) -> Result<Vec<Pass<'a, G>>, RenderError> {
        let model = res.model;
        let programs = res.programs.resolved();
        let eclipse = settings.use_eclipse_shaders();
        let sets = model.wavelength_set_count();
        let mut passes = Vec::new();

        if settings.zero_order_scattering_enabled() {
            let ids = if eclipse {
                &programs.eclipsed_zero_order
            } else {
                &programs.zero_order
            };
            for wl in 0..sets {
                passes.push(Pass {
                    program: ids[wl],
                    wavelength_set: wl,
                    eclipsed: eclipse,
                    luminance_only: false,
                    slice_weight: 0.0,
                    extra: Vec::new(),
                    textures: vec![("transmittanceTexture", transmittance(res, wl)?)],
                });
            }
        }

        if settings.single_scattering_enabled() {
            let on_the_fly = settings.single_scattering_on_the_fly();
            for sp in &programs.single {
                if !settings.scatterer_enabled(&model.scatterers[sp.scatterer].name) {
                    continue;
                }
                for wl in 0..sets {
                    if eclipse {
                        passes.push(Pass {
                            program: sp.eclipsed[wl],
                            wavelength_set: wl,
                            eclipsed: true,
                            luminance_only: false,
                            slice_weight: 0.0,
                            extra: Vec::new(),
                            textures: vec![("transmittanceTexture", transmittance(res, wl)?)],
                        });
                    } else if on_the_fly {
                        passes.push(Pass {
                            program: sp.on_the_fly[wl],
                            wavelength_set: wl,
                            eclipsed: false,
                            luminance_only: false,
                            slice_weight: 0.0,
                            extra: Vec::new(),
                            textures: vec![("transmittanceTexture", transmittance(res, wl)?)],
                        });
                    } else if let Some(ref precomputed) = sp.precomputed {
                        let (sl, su) = slices(
                            res,
                            SliceSlot::per_scatterer(TableKind::SingleScattering, sp.scatterer, wl),
                        )?;
                        let (gl, gu) = slices(
                            res,
                            SliceSlot::per_scatterer(
                                TableKind::InterpolationGuides,
                                sp.scatterer,
                                wl,
                            ),
                        )?;
                        passes.push(Pass {
                            program: precomputed[wl],
                            wavelength_set: wl,
                            eclipsed: false,
                            luminance_only: false,
                            slice_weight: weights.scattering.unwrap_or(0.0),
                            extra: Vec::new(),
                            textures: vec![
                                ("scatteringTextureLower", sl),
                                ("scatteringTextureUpper", su),
                                ("scatteringInterpolationGuidesLower", gl),
                                ("scatteringInterpolationGuidesUpper", gu),
                            ],
                        });
                    }
                }
            }
        }

        if settings.multiple_scattering_enabled() {
            if !eclipse {
                for wl in 0..sets {
                    let (lower, upper) =
                        slices(res, SliceSlot::per_set(TableKind::MultipleScattering, wl))?;
                    passes.push(Pass {
                        program: programs.multiple[wl],
                        wavelength_set: wl,
                        eclipsed: false,
                        luminance_only: false,
                        slice_weight: weights.scattering.unwrap_or(0.0),
                        extra: Vec::new(),
                        textures: vec![
                            ("scatteringTextureLower", lower),
                            ("scatteringTextureUpper", upper),
                        ],
                    });
                }
            } else if let Some(pass) = self.precomputed_eclipse_pass(res, settings, weights)? {
                passes.push(pass);
            } else {
                for wl in 0..sets {
                    let (lower, upper) =
                        slices(res, SliceSlot::per_set(TableKind::Irradiance, wl))?;
                    passes.push(Pass {
                        program: programs.eclipsed_double_on_the_fly[wl],
                        wavelength_set: wl,
                        eclipsed: true,
                        luminance_only: false,
                        slice_weight: weights.irradiance.unwrap_or(0.0),
                        extra: Vec::new(),
                        textures: vec![
                            ("transmittanceTexture", transmittance(res, wl)?),
                            ("irradianceTextureLower", lower),
                            ("irradianceTextureUpper", upper),
                        ],
                    });
                }
            }
        }

        let scale = settings.light_pollution_radiance_scale();
        if scale > 0.0 {
            for wl in 0..sets {
                let (lower, upper) = slices(res, SliceSlot::per_set(TableKind::LightPollution, wl))?;
                passes.push(Pass {
                    program: programs.light_pollution[wl],
                    wavelength_set: wl,
                    eclipsed: false,
                    luminance_only: false,
                    slice_weight: weights.light_pollution.unwrap_or(0.0),
                    extra: vec![("lightPollutionRadianceScale", UniformValue::Float(scale))],
                    textures: vec![
                        ("lightPollutionTextureLower", lower),
                        ("lightPollutionTextureUpper", upper),
                    ],
                });
            }
        }
        Ok(passes)
    }

    fn precomputed_eclipse_pass<'a, G: Gpu>(
        &self,
        res: &Resources<'a, G>,
        settings: &dyn Settings,
        weights: &SliceWeights,
    ) -> Result<Option<Pass<'a, G>>, RenderError> {
        if !uses_precomputed_eclipse(res.model, settings) {
            return Ok(None);
        }
        let program = match res.programs.resolved().eclipsed_double_precomputed {
            Some(id) => id,
            None => return Ok(None),
        };
        let (lower, upper) = slices(res, SliceSlot::eclipse())?;
        let weight = weights.eclipse.unwrap_or(0.0);
        Ok(Some(Pass {
            program,
            wavelength_set: 0,
            eclipsed: true,
            luminance_only: true,
            slice_weight: weight,
            extra: vec![("eclipseSliceWeight", UniformValue::Float(weight))],
            textures: vec![
                ("eclipsedDoubleScatteringTextureLower", lower),
                ("eclipsedDoubleScatteringTextureUpper", upper),
            ],
        }))
    }

    fn uniforms(
        &self,
        frame: &Frame,
        pass: &Pass<'_, impl Gpu>,
        matrix: Mat4,
        fixup: [f32; 4],
    ) -> Vec<(&'static str, UniformValue)> {
        let mut uniforms = vec![
            ("cameraAltitude", UniformValue::Float(frame.altitude)),
            ("sunDirection", UniformValue::Vec3(frame.sun_direction)),
            ("sunZenithAngle", UniformValue::Float(frame.sun_zenith_angle)),
            ("altitudeSliceWeight", UniformValue::Float(pass.slice_weight)),
            ("radianceToLuminance", UniformValue::Mat4(matrix)),
            ("solarIrradianceFixup", UniformValue::Vec4(fixup)),
        ];
        if pass.eclipsed {
            uniforms.push(("moonPosition", UniformValue::Vec3(frame.moon_position)));
            uniforms.push((
                "moonAngularRadius",
                UniformValue::Float(frame.moon_angular_radius),
            ));
        }
        uniforms.extend(pass.extra.iter().cloned());
        uniforms
    }

    fn draw_pass<G: Gpu>(
        &self,
        gpu: &mut G,
        res: &Resources<'_, G>,
        frame: &Frame,
        pass: &Pass<'_, G>,
        surface: &mut Surface<'_>,
    ) -> Result<(), RenderError> {
        let program = program(res, pass.program)?;
        let wl = pass.wavelength_set;
        let fixup = self.solar_irradiance_fixup[wl];
        let matrix = colorimetry::scale(&self.luminance_matrices[wl], frame.brightness);
        let call = DrawCall {
            program,
            target: Target::Luminance,
            uniforms: self.uniforms(frame, pass, matrix, fixup),
            textures: pass.textures.clone(),
            scissor: None,
        };
        gpu.draw(&call, surface)?;
        if self.radiance_capture {
            let call = DrawCall {
                program,
                target: Target::Radiance { layer: wl as u32 },
                uniforms: self.uniforms(frame, pass, IDENTITY, fixup),
                textures: pass.textures.clone(),
                scissor: None,
            };
            gpu.draw(&call, surface)?;
        }
        Ok(())
    }

    /// Passes whose tables already hold luminance
    fn draw_luminance_only<G: Gpu>(
        &self,
        gpu: &mut G,
        res: &Resources<'_, G>,
        frame: &Frame,
        pass: &Pass<'_, G>,
        surface: &mut Surface<'_>,
    ) -> Result<(), RenderError> {
        let call = DrawCall {
            program: program(res, pass.program)?,
            target: Target::Luminance,
            uniforms: self.uniforms(
                frame,
                pass,
                colorimetry::scale(&IDENTITY, frame.brightness),
                [1.0; 4],
            ),
            textures: pass.textures.clone(),
            scissor: None,
        };
        gpu.draw(&call, surface)?;
        Ok(())
    }

    fn check_pixel(&self, x: u32, y: u32) -> Result<(), RenderError> {
        if x >= self.width || y >= self.height {
            return Err(RenderError::OutOfBounds {
                x,
                y,
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    pub fn get_pixel_luminance<G: Gpu>(
        &self,
        gpu: &mut G,
        x: u32,
        y: u32,
    ) -> Result<Luminance, RenderError> {
        if !self.drawn {
            return Err(RenderError::NothingDrawn);
        }
        self.check_pixel(x, y)?;
        let v = gpu.read_target_pixel(Target::Luminance, x, y)?;
        Ok(Luminance {
            photopic: [v[0], v[1], v[2]],
            scotopic: v[3],
        })
    }

    pub fn get_pixel_spectral_radiance<G: Gpu>(
        &self,
        gpu: &mut G,
        model: &AtmosphereModel,
        x: u32,
        y: u32,
    ) -> Result<SpectralRadiance, RenderError> {
        if !self.radiance_capture {
            return Err(RenderError::RadianceCaptureDisabled);
        }
        if !self.drawn {
            return Err(RenderError::NothingDrawn);
        }
        self.check_pixel(x, y)?;
        let mut radiance = Vec::with_capacity(model.wavelengths.len());
        for layer in 0..self.radiance_layers() {
            radiance.extend_from_slice(&gpu.read_target_pixel(Target::Radiance { layer }, x, y)?);
        }
        Ok(SpectralRadiance {
            wavelengths: model.wavelengths.clone(),
            radiance,
        })
    }

    /// Unit view direction of pixel `(x, y)`, as computed by the host's view-ray function
    pub fn get_view_direction<G: Gpu>(
        &self,
        controller: &mut TextureStreamingController<G>,
        x: u32,
        y: u32,
        surface: &mut Surface<'_>,
    ) -> Result<[f32; 3], RenderError> {
        let state = controller.state();
        if state != LoadState::ReadyToRender {
            return Err(RenderError::NotReady(state));
        }
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::NoTargets);
        }
        self.check_pixel(x, y)?;
        let (gpu, res) = controller.split();
        let call = DrawCall {
            program: program(&res, res.programs.resolved().view_direction)?,
            target: Target::Probe,
            uniforms: Vec::new(),
            textures: Vec::new(),
            scissor: Some((x, y)),
        };
        gpu.clear_target(Target::Probe)?;
        gpu.draw(&call, surface)?;
        let v = gpu.read_target_pixel(Target::Probe, x, y)?;
        Ok([v[0], v[1], v[2]])
    }
}

/// Interpolation weights of the resident brackets at the frame altitude
struct SliceWeights {
    irradiance: Option<f32>,
    scattering: Option<f32>,
    light_pollution: Option<f32>,
    eclipse: Option<f32>,
}

fn uses_precomputed_eclipse(model: &AtmosphereModel, settings: &dyn Settings) -> bool {
    settings.use_eclipse_shaders() && eclipse_table_wanted(model, settings)
}

fn default_fixup(model: &AtmosphereModel) -> Vec<[f32; 4]> {
    (0..model.wavelength_set_count())
        .map(|wl| {
            if model.tables_use_unit_solar_irradiance {
                model.solar_irradiance_set(wl)
            } else {
                [1.0; 4]
            }
        })
        .collect()
}

fn program<'a, G: Gpu>(res: &Resources<'a, G>, id: ProgramId) -> Result<&'a G::Program, RenderError> {
    res.programs
        .get(id)
        .ok_or(RenderError::NotReady(LoadState::NotReady))
}

fn transmittance<'a, G: Gpu>(res: &Resources<'a, G>, wl: usize) -> Result<&'a G::Texture, RenderError> {
    res.transmittance
        .get(wl)
        .ok_or(RenderError::NotReady(LoadState::NotReady))
}

fn slices<'a, G: Gpu>(
    res: &Resources<'a, G>,
    slot: SliceSlot,
) -> Result<(&'a G::Texture, &'a G::Texture), RenderError> {
    res.slices
        .get(&slot)
        .and_then(|pair| pair.bindings())
        .ok_or(RenderError::NotReady(LoadState::ReloadingTextures))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::toy_model;
    use crate::settings::RenderSettings;

    #[test]
    fn directions() {
        let up = direction(0.0, 1.0);
        assert!((up[2] - 1.0).abs() < 1e-6);
        let east = direction(std::f32::consts::FRAC_PI_2, std::f32::consts::FRAC_PI_2);
        assert!(east[0].abs() < 1e-6 && (east[1] - 1.0).abs() < 1e-6 && east[2].abs() < 1e-6);
    }

    #[test]
    fn solar_spectrum_override() {
        let model = toy_model();
        let mut pipeline = ScatteringRenderPipeline::new(&model);
        assert_eq!(pipeline.solar_irradiance_fixup(), &[model.solar_irradiance_set(0)]);
        pipeline.set_solar_spectrum(&model, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(pipeline.solar_irradiance_fixup(), &[[1.0, 2.0, 3.0, 4.0]]);
        assert!(matches!(
            pipeline.set_solar_spectrum(&model, &[1.0]),
            Err(RenderError::SpectrumLength { expected: 4, got: 1 })
        ));
        pipeline.reset_solar_spectrum(&model).unwrap();
        assert_eq!(pipeline.solar_irradiance_fixup(), &[model.solar_irradiance_set(0)]);
    }

    #[test]
    fn fixed_solar_spectrum() {
        let mut model = toy_model();
        model.tables_use_unit_solar_irradiance = false;
        let mut pipeline = ScatteringRenderPipeline::new(&model);
        assert_eq!(pipeline.solar_irradiance_fixup(), &[[1.0; 4]]);
        assert!(matches!(
            pipeline.set_solar_spectrum(&model, &[1.0; 4]),
            Err(RenderError::SolarSpectrumFixed)
        ));
    }

    #[test]
    fn capabilities() {
        let model = toy_model();
        let mut settings = RenderSettings::default();
        assert!(ScatteringRenderPipeline::can_grab_radiance(&model, &settings));
        settings.use_eclipse_shaders = true;
        assert!(!ScatteringRenderPipeline::can_grab_radiance(&model, &settings));
        settings.eclipsed_double_scattering_precomputed = false;
        assert!(ScatteringRenderPipeline::can_grab_radiance(&model, &settings));
        assert!(ScatteringRenderPipeline::can_render_precomputed_eclipsed_double_scattering(&model));
    }
}
