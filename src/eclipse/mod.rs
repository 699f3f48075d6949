//! Double scattering during solar eclipses
//!
//! The moon's shadow breaks the azimuthal symmetry the ordinary tables rely on, so eclipsed double
//! scattering is evaluated directly on a coarse angular grid and reconstructed into a dense
//! table. Reconstruction runs a Fourier series along azimuth for every coarse elevation, then a
//! natural cubic spline along elevation restricted to the texel's side of the horizon.

pub mod fourier;
pub mod grid;
pub mod spline;

use std::f64::consts::PI;

use crate::colorimetry::{self, Mat4};
use crate::error::EclipseError;
use crate::gpu::{Gpu, OffscreenCall, UniformValue};
use crate::model::AtmosphereModel;

use self::fourier::{harmonic_count, FourierSeries};
use self::spline::CubicSpline;

/// Names the coarse-grid program samples its data textures through, in order
pub const DATA_TEXTURE_SAMPLERS: [&str; 2] = ["transmittanceTexture", "irradianceTexture"];

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CoarseGridParams {
    pub earth_radius: f32,
    pub azimuth_samples: u32,
    pub elevation_samples_per_side: u32,
    pub output_azimuth_texels: u32,
    pub output_elevation_texels: u32,
    pub sza_count: u32,
    pub wavelength_sets: usize,
}

impl CoarseGridParams {
    pub fn from_model(model: &AtmosphereModel) -> Self {
        let size = model.eclipsed_double_scattering_texture_size;
        Self {
            earth_radius: model.earth_radius,
            azimuth_samples: model.eclipsed_double_scattering_azimuth_samples,
            elevation_samples_per_side: model.eclipsed_double_scattering_elevation_samples_per_side,
            output_azimuth_texels: size[0],
            output_elevation_texels: size[1],
            sza_count: size[2],
            wavelength_sets: model.wavelength_set_count(),
        }
    }

    /// Samples in one coarse grid
    pub fn grid_len(&self) -> usize {
        self.azimuth_samples as usize * 2 * self.elevation_samples_per_side as usize
    }

    /// Samples checkpointed per altitude
    pub fn altitude_block_len(&self) -> usize {
        self.grid_len() * self.sza_count as usize
    }

    /// Sun zenith angle of eclipse table slice `index`, spanning `[0, π]`
    pub fn sza(&self, index: u32) -> f64 {
        PI * f64::from(index) / f64::from(self.sza_count - 1)
    }
}

/// Position of one coarse grid in the eclipse table
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GridSlot {
    pub altitude_index: usize,
    pub sza_index: usize,
}

/// Coarse samples for one altitude, one grid per sun zenith angle
pub struct EclipseDoubleScatteringEngine {
    params: CoarseGridParams,
    altitude_index: Option<usize>,
    camera_altitude: f32,
    horizon: f64,
    elevations: Vec<f64>,
    azimuths: Vec<f64>,
    /// Row-major per SZA index: row = elevation node, column = azimuth node
    grids: Vec<Option<Vec<[f32; 4]>>>,
}

impl EclipseDoubleScatteringEngine {
    pub fn new(params: CoarseGridParams) -> Self {
        Self {
            azimuths: grid::azimuth_nodes(params.azimuth_samples),
            grids: (0..params.sza_count).map(|_| None).collect(),
            params,
            altitude_index: None,
            camera_altitude: 0.0,
            horizon: 0.0,
            elevations: Vec::new(),
        }
    }

    pub fn params(&self) -> &CoarseGridParams {
        &self.params
    }

    /// Number of wavelength-set textures feeding the coarse passes of one altitude
    pub fn num_data_textures(&self) -> usize {
        self.params.wavelength_sets
    }

    pub fn altitude_index(&self) -> Option<usize> {
        self.altitude_index
    }

    pub fn horizon_elevation(&self, altitude: f32) -> f64 {
        grid::horizon_elevation(self.params.earth_radius, altitude)
    }

    /// Elevation nodes of the held altitude, below-horizon nodes first
    pub fn elevation_nodes(&self) -> &[f64] {
        &self.elevations
    }

    pub fn azimuth_nodes(&self) -> &[f64] {
        &self.azimuths
    }

    /// Forget all samples
    pub fn clear(&mut self) {
        self.altitude_index = None;
        self.elevations.clear();
        for g in &mut self.grids {
            *g = None;
        }
    }

    /// Switch to `altitude_index`, discarding samples of any other altitude
    fn hold_altitude(&mut self, altitude_index: usize, camera_altitude: f32) {
        if self.altitude_index == Some(altitude_index) && self.camera_altitude == camera_altitude {
            return;
        }
        self.clear();
        self.altitude_index = Some(altitude_index);
        self.camera_altitude = camera_altitude;
        self.horizon = self.horizon_elevation(camera_altitude);
        self.elevations = grid::elevation_nodes(self.horizon, self.params.elevation_samples_per_side);
    }

    fn check_altitude(&self, requested: usize) -> Result<(), EclipseError> {
        if self.altitude_index != Some(requested) {
            return Err(EclipseError::WrongAltitude {
                held: self.altitude_index,
                requested,
            });
        }
        Ok(())
    }

    /// Render one coarse grid with `program` and store it at `slot`
    #[allow(clippy::too_many_arguments)]
    pub fn compute_radiance_on_coarse_grid<G: Gpu + ?Sized>(
        &mut self,
        gpu: &mut G,
        program: &G::Program,
        data_textures: &[&G::Texture],
        slot: GridSlot,
        camera_altitude: f32,
        sun_zenith_angle: f32,
        moon_zenith_angle: f32,
        moon_azimuth_relative_to_sun: f32,
        earth_moon_distance: f32,
    ) -> Result<(), EclipseError> {
        if data_textures.len() != DATA_TEXTURE_SAMPLERS.len() {
            return Err(EclipseError::DataTextures {
                expected: DATA_TEXTURE_SAMPLERS.len(),
                got: data_textures.len(),
            });
        }
        self.hold_altitude(slot.altitude_index, camera_altitude);
        let width = self.params.azimuth_samples;
        let height = 2 * self.params.elevation_samples_per_side;
        log::trace!(
            "coarse grid altitude {} sza {}: {}x{}",
            slot.altitude_index,
            slot.sza_index,
            width,
            height
        );
        let call = OffscreenCall {
            program,
            width,
            height,
            uniforms: vec![
                ("cameraAltitude", UniformValue::Float(camera_altitude)),
                ("sunZenithAngle", UniformValue::Float(sun_zenith_angle)),
                ("moonZenithAngle", UniformValue::Float(moon_zenith_angle)),
                (
                    "moonAzimuthRelativeToSun",
                    UniformValue::Float(moon_azimuth_relative_to_sun),
                ),
                ("earthMoonDistance", UniformValue::Float(earth_moon_distance)),
                (
                    "elevations",
                    UniformValue::FloatArray(self.elevations.iter().map(|&e| e as f32).collect()),
                ),
                ("azimuthSampleCount", UniformValue::Int(width as i32)),
            ],
            textures: DATA_TEXTURE_SAMPLERS
                .iter()
                .copied()
                .zip(data_textures.iter().copied())
                .collect(),
        };
        let samples = gpu.render_offscreen(&call)?;
        if samples.len() != self.params.grid_len() {
            return Err(EclipseError::GridSize {
                expected: self.params.grid_len(),
                got: samples.len(),
            });
        }
        self.grids[slot.sza_index] = Some(samples);
        Ok(())
    }

    pub fn convert_radiance_to_luminance(&mut self, matrix: &Mat4) {
        for grid in self.grids.iter_mut().flatten() {
            for sample in grid.iter_mut() {
                *sample = colorimetry::transform(matrix, *sample);
            }
        }
    }

    /// Add `source_matrix · source` to every sample
    ///
    /// Callers fold wavelength sets in ascending order, so that sums are reproducible.
    pub fn accumulate_luminance(
        &mut self,
        source: &EclipseDoubleScatteringEngine,
        source_matrix: &Mat4,
    ) -> Result<(), EclipseError> {
        let altitude = match source.altitude_index {
            Some(x) => x,
            None => return Ok(()),
        };
        match self.altitude_index {
            Some(held) if held != altitude => {
                return Err(EclipseError::WrongAltitude {
                    held: Some(held),
                    requested: altitude,
                });
            }
            Some(_) => {}
            None => self.hold_altitude(altitude, source.camera_altitude),
        }
        for (dst, src) in self.grids.iter_mut().zip(&source.grids) {
            let src = match src {
                Some(x) => x,
                None => continue,
            };
            let dst = dst.get_or_insert_with(|| vec![[0.0; 4]; src.len()]);
            for (d, &s) in dst.iter_mut().zip(src) {
                let t = colorimetry::transform(source_matrix, s);
                for c in 0..4 {
                    d[c] += t[c];
                }
            }
        }
        Ok(())
    }

    fn grid(&self, sza_index: usize) -> Result<&[[f32; 4]], EclipseError> {
        self.grids
            .get(sza_index)
            .and_then(Option::as_deref)
            .ok_or(EclipseError::MissingSza(sza_index))
    }

    /// Fourier series along azimuth, one per elevation node
    fn azimuth_series(&self, grid: &[[f32; 4]]) -> Vec<FourierSeries> {
        let width = self.params.azimuth_samples as usize;
        let harmonics = harmonic_count(
            self.params.azimuth_samples,
            self.params.output_azimuth_texels,
        );
        grid.chunks_exact(width)
            .map(|row| {
                let row: Vec<[f64; 4]> = row.iter().map(|s| widen(*s)).collect();
                FourierSeries::fit(&row, harmonics)
            })
            .collect()
    }

    /// Index range of the elevation nodes on the same side of the horizon as `elevation`
    fn side(&self, elevation: f64) -> std::ops::Range<usize> {
        let n = self.params.elevation_samples_per_side as usize;
        if elevation < self.horizon {
            0..n
        } else {
            n..2 * n
        }
    }

    /// Dense `[elevation][azimuth]` slice for one sun zenith angle, azimuth varying fastest
    pub fn generate_texture_from_coarse_grid_data(
        &self,
        altitude_index: usize,
        sza_index: usize,
        camera_altitude: f32,
    ) -> Result<Vec<[f32; 4]>, EclipseError> {
        self.check_altitude(altitude_index)?;
        if camera_altitude != self.camera_altitude {
            return Err(EclipseError::CameraAltitude {
                held: self.camera_altitude,
                requested: camera_altitude,
            });
        }
        let series = self.azimuth_series(self.grid(sza_index)?);
        let width = self.params.output_azimuth_texels;
        let height = self.params.output_elevation_texels;
        let horizon = self.horizon;

        // Azimuthal synthesis at every output azimuth, per elevation node
        let synthesized: Vec<Vec<[f64; 4]>> = series
            .iter()
            .map(|s| {
                (0..width)
                    .map(|j| s.eval_bounded(grid::texel_azimuth(j, width)))
                    .collect()
            })
            .collect();

        let n = self.params.elevation_samples_per_side as usize;
        let splines = |side: std::ops::Range<usize>| -> Vec<CubicSpline> {
            (0..width as usize)
                .map(|j| {
                    let ys: Vec<[f64; 4]> = synthesized[side.clone()].iter().map(|r| r[j]).collect();
                    CubicSpline::new(&self.elevations[side.clone()], &ys)
                })
                .collect()
        };
        let below = splines(0..n);
        let above = splines(n..2 * n);

        let mut out = Vec::with_capacity(width as usize * height as usize);
        for i in 0..height {
            let elevation = grid::texel_elevation(horizon, i, height);
            let column = if elevation < horizon { &below } else { &above };
            out.extend(column.iter().map(|s| narrow(s.eval(elevation))));
        }
        Ok(out)
    }

    /// Continuous reconstruction the dense slice is sampled from
    pub fn reconstruct_at(
        &self,
        sza_index: usize,
        elevation: f64,
        azimuth: f64,
    ) -> Result<[f32; 4], EclipseError> {
        let series = self.azimuth_series(self.grid(sza_index)?);
        let side = self.side(elevation);
        let ys: Vec<[f64; 4]> = series[side.clone()]
            .iter()
            .map(|s| s.eval_bounded(azimuth))
            .collect();
        Ok(narrow(CubicSpline::new(&self.elevations[side], &ys).eval(elevation)))
    }

    /// Append every grid of the held altitude to `buffer`, returning the sample count
    pub fn append_coarse_grid_samples_to(
        &self,
        buffer: &mut Vec<[f32; 4]>,
    ) -> Result<usize, EclipseError> {
        let start = buffer.len();
        for sza in 0..self.grids.len() {
            buffer.extend_from_slice(self.grid(sza)?);
        }
        Ok(buffer.len() - start)
    }

    /// Restore the grids of one altitude from the front of `data`, returning the samples consumed
    pub fn load_coarse_grid_samples(
        &mut self,
        altitude_index: usize,
        camera_altitude: f32,
        data: &[[f32; 4]],
    ) -> Result<usize, EclipseError> {
        let expected = self.params.altitude_block_len();
        if data.len() < expected {
            return Err(EclipseError::ShortCheckpoint {
                expected,
                got: data.len(),
            });
        }
        self.hold_altitude(altitude_index, camera_altitude);
        for (grid, chunk) in self
            .grids
            .iter_mut()
            .zip(data[..expected].chunks_exact(self.params.grid_len()))
        {
            *grid = Some(chunk.to_vec());
        }
        Ok(expected)
    }
}

fn widen(x: [f32; 4]) -> [f64; 4] {
    [
        f64::from(x[0]),
        f64::from(x[1]),
        f64::from(x[2]),
        f64::from(x[3]),
    ]
}

fn narrow(x: [f64; 4]) -> [f32; 4] {
    [x[0] as f32, x[1] as f32, x[2] as f32, x[3] as f32]
}
