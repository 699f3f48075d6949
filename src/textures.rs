//! Altitude-dependent tables, of which only the two levels around the camera are resident

use std::collections::HashMap;

use crate::model::AtmosphereModel;

/// Fractional position of `altitude` along a table's altitude axis, in [0, 1]
///
/// Follows the usual precomputed-scattering parametrization: texel coordinates are linear in the
/// distance to the horizon, which spends resolution near the ground.
pub fn altitude_coordinate(model: &AtmosphereModel, altitude: f32) -> f64 {
    let r0 = f64::from(model.earth_radius);
    let rt = f64::from(model.top_radius());
    let r = (r0 + f64::from(altitude)).max(r0).min(rt);
    let horizon = (rt * rt - r0 * r0).sqrt();
    let rho = (r * r - r0 * r0).max(0.0).sqrt();
    (rho / horizon).max(0.0).min(1.0)
}

/// Altitude of level `level` of a table with `levels` altitude levels
pub fn level_altitude(model: &AtmosphereModel, level: u32, levels: u32) -> f32 {
    let r0 = f64::from(model.earth_radius);
    let rt = f64::from(model.top_radius());
    let horizon = (rt * rt - r0 * r0).sqrt();
    let u = f64::from(level) / f64::from(levels - 1);
    let rho = u * horizon;
    ((rho * rho + r0 * r0).sqrt() - r0) as f32
}

/// The altitude levels bracketing a camera altitude
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AltitudeBracket {
    pub lower: u32,
    /// Equal to `lower` when the altitude sits exactly on a level or at the domain boundary
    pub upper: u32,
    /// Interpolation weight of `upper`
    pub weight: f32,
}

impl AltitudeBracket {
    pub fn for_altitude(model: &AtmosphereModel, altitude: f32, levels: u32) -> Self {
        debug_assert!(levels >= 2);
        let position = altitude_coordinate(model, altitude) * f64::from(levels - 1);
        let lower = (position.floor() as u32).min(levels - 1);
        let weight = position - f64::from(lower);
        if lower == levels - 1 || weight <= 0.0 {
            Self {
                lower,
                upper: lower,
                weight: 0.0,
            }
        } else {
            Self {
                lower,
                upper: lower + 1,
                weight: weight as f32,
            }
        }
    }

    pub fn is_single(&self) -> bool {
        self.lower == self.upper
    }

    /// Same levels, regardless of weight
    pub fn same_levels(&self, other: &Self) -> bool {
        self.lower == other.lower && self.upper == other.upper
    }

    /// Interpolation weight of `upper` for `altitude`, clamped to this bracket
    pub fn weight_at(&self, model: &AtmosphereModel, altitude: f32, levels: u32) -> f32 {
        if self.is_single() {
            return 0.0;
        }
        let position = altitude_coordinate(model, altitude) * f64::from(levels - 1);
        (position - f64::from(self.lower)).max(0.0).min(1.0) as f32
    }

    /// Whether `altitude` falls between the levels of this bracket
    pub fn contains(&self, model: &AtmosphereModel, altitude: f32, levels: u32) -> bool {
        let position = altitude_coordinate(model, altitude) * f64::from(levels - 1);
        position >= f64::from(self.lower) && position <= f64::from(self.upper)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TableKind {
    Irradiance,
    MultipleScattering,
    SingleScattering,
    InterpolationGuides,
    LightPollution,
    EclipsedDoubleScattering,
}

impl TableKind {
    pub fn is_eclipse(self) -> bool {
        self == TableKind::EclipsedDoubleScattering
    }
}

/// Identifies one altitude-sliced table
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SliceSlot {
    pub kind: TableKind,
    pub wavelength_set: Option<usize>,
    pub scatterer: Option<usize>,
}

impl SliceSlot {
    pub fn per_set(kind: TableKind, wlset: usize) -> Self {
        Self {
            kind,
            wavelength_set: Some(wlset),
            scatterer: None,
        }
    }

    pub fn per_scatterer(kind: TableKind, scatterer: usize, wlset: usize) -> Self {
        Self {
            kind,
            wavelength_set: Some(wlset),
            scatterer: Some(scatterer),
        }
    }

    pub fn eclipse() -> Self {
        Self {
            kind: TableKind::EclipsedDoubleScattering,
            wavelength_set: None,
            scatterer: None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SliceEnd {
    Lower,
    Upper,
}

/// The resident slices of one table
#[derive(Debug)]
pub struct SlicePair<T> {
    pub bracket: AltitudeBracket,
    lower: Option<T>,
    upper: Option<T>,
}

impl<T> SlicePair<T> {
    pub fn is_complete(&self) -> bool {
        self.lower.is_some() && (self.bracket.is_single() || self.upper.is_some())
    }

    /// Textures to bind as (lower, upper); a single-level bracket binds its slice twice
    pub fn bindings(&self) -> Option<(&T, &T)> {
        let lower = self.lower.as_ref()?;
        if self.bracket.is_single() {
            Some((lower, lower))
        } else {
            Some((lower, self.upper.as_ref()?))
        }
    }

    pub fn resident_count(&self) -> usize {
        self.lower.iter().count() + self.upper.iter().count()
    }
}

/// All altitude-sliced tables, keyed by slot
pub struct AltitudeSlicedTextureSet<T> {
    pairs: HashMap<SliceSlot, SlicePair<T>>,
}

impl<T> Default for AltitudeSlicedTextureSet<T> {
    fn default() -> Self {
        Self {
            pairs: HashMap::new(),
        }
    }
}

impl<T> AltitudeSlicedTextureSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, slot: SliceSlot, bracket: AltitudeBracket, end: SliceEnd, texture: T) {
        let pair = self.pairs.entry(slot).or_insert_with(|| SlicePair {
            bracket,
            lower: None,
            upper: None,
        });
        debug_assert!(pair.bracket.same_levels(&bracket));
        match end {
            SliceEnd::Lower => pair.lower = Some(texture),
            SliceEnd::Upper => pair.upper = Some(texture),
        }
    }

    pub fn get(&self, slot: &SliceSlot) -> Option<&SlicePair<T>> {
        self.pairs.get(slot)
    }

    /// Bracket of the resident tables of `kind`, if any
    pub fn bracket(&self, kind: TableKind) -> Option<AltitudeBracket> {
        self.pairs
            .iter()
            .find(|(slot, _)| slot.kind == kind)
            .map(|(_, pair)| pair.bracket)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SliceSlot, &SlicePair<T>)> {
        self.pairs.iter()
    }

    /// Drop the resident tables matching `filter`
    pub fn release(&mut self, filter: impl Fn(TableKind) -> bool) {
        self.pairs.retain(|slot, _| !filter(slot.kind));
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }
}
