//! Per-frame render settings
//!
//! The renderer never mutates settings; it reads them each time it needs a decision. Hosts with
//! their own settings storage implement `Settings`, others can use `RenderSettings`, which
//! persists as RON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Read-only view of the values that drive loading and drawing
pub trait Settings {
    /// Camera altitude above the surface (m)
    fn altitude(&self) -> f32;
    fn sun_azimuth(&self) -> f32;
    fn sun_zenith_angle(&self) -> f32;
    fn moon_azimuth(&self) -> f32;
    fn moon_zenith_angle(&self) -> f32;
    /// Distance between the centers of the Earth and the Moon (m)
    fn earth_moon_distance(&self) -> f32;

    fn zero_order_scattering_enabled(&self) -> bool;
    fn single_scattering_enabled(&self) -> bool;
    fn multiple_scattering_enabled(&self) -> bool;
    /// Whether the scatterer contributes to single scattering
    fn scatterer_enabled(&self, name: &str) -> bool;

    /// Evaluate single scattering in the shader rather than sampling precomputed tables
    fn single_scattering_on_the_fly(&self) -> bool;
    /// Sample the runtime-populated eclipse table rather than integrating in the shader
    fn eclipsed_double_scattering_precomputed(&self) -> bool;
    fn use_eclipse_shaders(&self) -> bool;

    /// Scale applied to the light pollution tables; zero disables the pass
    fn light_pollution_radiance_scale(&self) -> f32;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub altitude: f32,
    pub sun_azimuth: f32,
    pub sun_zenith_angle: f32,
    pub moon_azimuth: f32,
    pub moon_zenith_angle: f32,
    pub earth_moon_distance: f32,
    pub zero_order_scattering: bool,
    pub single_scattering: bool,
    pub multiple_scattering: bool,
    /// Scatterers excluded from single scattering
    pub disabled_scatterers: Vec<String>,
    pub single_scattering_on_the_fly: bool,
    pub eclipsed_double_scattering_precomputed: bool,
    pub use_eclipse_shaders: bool,
    pub light_pollution_radiance_scale: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            altitude: 0.0,
            sun_azimuth: 0.0,
            sun_zenith_angle: 1.0,
            moon_azimuth: std::f32::consts::PI,
            moon_zenith_angle: 2.0,
            earth_moon_distance: 384_400e3,
            zero_order_scattering: true,
            single_scattering: true,
            multiple_scattering: true,
            disabled_scatterers: Vec::new(),
            single_scattering_on_the_fly: false,
            eclipsed_double_scattering_precomputed: true,
            use_eclipse_shaders: false,
            light_pollution_radiance_scale: 0.0,
        }
    }
}

impl RenderSettings {
    pub fn from_ron_str(s: &str) -> Result<Self, SettingsError> {
        ron::from_str(s).map_err(SettingsError::Parse)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path).map_err(SettingsError::Read)?;
        let settings = Self::from_ron_str(&contents)?;
        log::info!("loaded render settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let pretty = ron::ser::PrettyConfig::new().depth_limit(2);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(SettingsError::Serialize)?;
        std::fs::write(path, serialized).map_err(SettingsError::Write)
    }
}

impl Settings for RenderSettings {
    fn altitude(&self) -> f32 {
        self.altitude
    }
    fn sun_azimuth(&self) -> f32 {
        self.sun_azimuth
    }
    fn sun_zenith_angle(&self) -> f32 {
        self.sun_zenith_angle
    }
    fn moon_azimuth(&self) -> f32 {
        self.moon_azimuth
    }
    fn moon_zenith_angle(&self) -> f32 {
        self.moon_zenith_angle
    }
    fn earth_moon_distance(&self) -> f32 {
        self.earth_moon_distance
    }
    fn zero_order_scattering_enabled(&self) -> bool {
        self.zero_order_scattering
    }
    fn single_scattering_enabled(&self) -> bool {
        self.single_scattering
    }
    fn multiple_scattering_enabled(&self) -> bool {
        self.multiple_scattering
    }
    fn scatterer_enabled(&self, name: &str) -> bool {
        !self.disabled_scatterers.iter().any(|x| x == name)
    }
    fn single_scattering_on_the_fly(&self) -> bool {
        self.single_scattering_on_the_fly
    }
    fn eclipsed_double_scattering_precomputed(&self) -> bool {
        self.eclipsed_double_scattering_precomputed
    }
    fn use_eclipse_shaders(&self) -> bool {
        self.use_eclipse_shaders
    }
    fn light_pollution_radiance_scale(&self) -> f32 {
        self.light_pollution_radiance_scale
    }
}
