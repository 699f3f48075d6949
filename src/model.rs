//! Immutable description of a precomputed atmosphere
//!
//! Produced by the model generator alongside the tables and shaders it writes; this crate only
//! checks it for consistency.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Wavelengths are processed in groups of this many, one per texel channel.
pub const WAVELENGTHS_PER_SET: usize = 4;

/// How a scatterer's precomputed single scattering is stored
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseFunctionType {
    /// Dedicated single-scattering tables per wavelength set
    General,
    /// Single scattering was folded into the multiple-scattering tables
    Smooth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scatterer {
    pub name: String,
    pub phase_function: PhaseFunctionType,
    /// Cross section per model wavelength (m^2)
    pub cross_section: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Absorber {
    pub name: String,
    /// Cross section per model wavelength (m^2)
    pub cross_section: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtmosphereModel {
    /// Ascending, in nanometers; consecutive groups of four form a wavelength set
    pub wavelengths: Vec<f32>,
    /// Top-of-atmosphere solar spectral irradiance for each wavelength (W/m^2/nm)
    pub solar_irradiance: Vec<f32>,
    pub scatterers: Vec<Scatterer>,
    pub absorbers: Vec<Absorber>,
    /// Radius of the planet surface (m)
    pub earth_radius: f32,
    /// Height of the top of the atmosphere above the surface (m)
    pub atmosphere_height: f32,

    /// View zenith angle × altitude
    pub transmittance_texture_size: [u32; 2],
    /// Sun zenith angle × altitude
    pub irradiance_texture_size: [u32; 2],
    /// View zenith angle × sun zenith angle × view-sun azimuth × altitude
    pub scattering_texture_size: [u32; 4],
    /// View zenith angle × altitude
    pub light_pollution_texture_size: [u32; 2],
    /// View azimuth × view elevation × sun zenith angle × altitude
    pub eclipsed_double_scattering_texture_size: [u32; 4],
    /// Azimuth samples of the eclipse coarse grid
    pub eclipsed_double_scattering_azimuth_samples: u32,
    /// Elevation samples of the eclipse coarse grid on each side of the horizon
    pub eclipsed_double_scattering_elevation_samples_per_side: u32,

    pub scattering_orders: u32,
    /// Whether the generator emitted what precomputed eclipsed double scattering needs
    pub has_eclipsed_double_scattering_tables: bool,
    /// Whether tables were generated for unit solar irradiance, permitting spectrum overrides
    pub tables_use_unit_solar_irradiance: bool,

    pub texture_dir: PathBuf,
    pub shader_dir: PathBuf,
}

impl AtmosphereModel {
    pub fn wavelength_set_count(&self) -> usize {
        self.wavelengths.len() / WAVELENGTHS_PER_SET
    }

    /// The four wavelengths of set `wlset`
    pub fn wavelength_set(&self, wlset: usize) -> [f32; 4] {
        let base = wlset * WAVELENGTHS_PER_SET;
        [
            self.wavelengths[base],
            self.wavelengths[base + 1],
            self.wavelengths[base + 2],
            self.wavelengths[base + 3],
        ]
    }

    /// Solar irradiance for the four wavelengths of set `wlset`
    pub fn solar_irradiance_set(&self, wlset: usize) -> [f32; 4] {
        let base = wlset * WAVELENGTHS_PER_SET;
        let mut out = [0.0; 4];
        out.copy_from_slice(&self.solar_irradiance[base..base + WAVELENGTHS_PER_SET]);
        out
    }

    pub fn top_radius(&self) -> f32 {
        self.earth_radius + self.atmosphere_height
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |msg: String| Err(ModelError::Invalid(msg));
        let n = self.wavelengths.len();
        if n == 0 || n % WAVELENGTHS_PER_SET != 0 {
            return invalid(format!(
                "wavelength count {} is not a positive multiple of {}",
                n, WAVELENGTHS_PER_SET
            ));
        }
        if self.wavelengths.windows(2).any(|w| !(w[0] < w[1])) {
            return invalid("wavelengths must be strictly ascending".into());
        }
        if self.solar_irradiance.len() != n {
            return invalid(format!(
                "{} solar irradiance values for {} wavelengths",
                self.solar_irradiance.len(),
                n
            ));
        }
        if !(self.earth_radius > 0.0) || !(self.atmosphere_height > 0.0) {
            return invalid("earth radius and atmosphere height must be positive".into());
        }
        if self.scattering_orders == 0 {
            return invalid("at least one scattering order is required".into());
        }

        let mut names = HashSet::new();
        for s in &self.scatterers {
            if s.name.is_empty() {
                return invalid("scatterer with empty name".into());
            }
            if !names.insert(s.name.as_str()) {
                return invalid(format!("duplicate scatterer {}", s.name));
            }
            if s.cross_section.len() != n {
                return invalid(format!(
                    "scatterer {} has {} cross sections for {} wavelengths",
                    s.name,
                    s.cross_section.len(),
                    n
                ));
            }
        }
        for a in &self.absorbers {
            if a.cross_section.len() != n {
                return invalid(format!(
                    "absorber {} has {} cross sections for {} wavelengths",
                    a.name,
                    a.cross_section.len(),
                    n
                ));
            }
        }

        let sizes: [(&str, &[u32]); 5] = [
            ("transmittance", &self.transmittance_texture_size),
            ("irradiance", &self.irradiance_texture_size),
            ("scattering", &self.scattering_texture_size),
            ("light pollution", &self.light_pollution_texture_size),
            (
                "eclipsed double scattering",
                &self.eclipsed_double_scattering_texture_size,
            ),
        ];
        for &(name, size) in &sizes {
            if size.iter().any(|&x| x == 0) {
                return invalid(format!("{} texture has a zero dimension", name));
            }
            if size[size.len() - 1] < 2 {
                return invalid(format!("{} texture needs at least two altitudes", name));
            }
        }

        if self.has_eclipsed_double_scattering_tables {
            if self.eclipsed_double_scattering_azimuth_samples == 0 {
                return invalid("eclipse coarse grid needs at least one azimuth sample".into());
            }
            if self.eclipsed_double_scattering_elevation_samples_per_side < 2 {
                return invalid(
                    "eclipse coarse grid needs two elevation samples per horizon side".into(),
                );
            }
            if self.eclipsed_double_scattering_texture_size[2] < 2 {
                return invalid("eclipse table needs at least two sun zenith angles".into());
            }
            if self.eclipsed_double_scattering_texture_size[1] < 2 {
                return invalid("eclipse table needs at least two elevation texels".into());
            }
        }
        Ok(())
    }
}
