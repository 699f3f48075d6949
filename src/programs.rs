//! The shader programs drawing each scattering pass

use std::path::PathBuf;

use crate::gpu::{SamplerDecl, TextureDim, UniformDecl, UniformType};
use crate::model::{AtmosphereModel, PhaseFunctionType};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PassKind {
    ZeroOrder,
    EclipsedZeroOrder,
    SingleScattering,
    EclipsedSingleScattering,
    MultipleScattering,
    EclipsedDoubleScatteringPrecomputed,
    EclipsedDoubleScatteringOnTheFly,
    /// Samples the eclipse coarse grid rather than drawing a surface
    EclipsedDoubleScatteringCoarseGrid,
    LightPollution,
    ViewDirection,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RenderMode {
    OnTheFly,
    Precomputed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    pub kind: PassKind,
    pub scatterer: Option<usize>,
    pub wavelength_set: Option<usize>,
    pub mode: RenderMode,
}

/// Fragment stage shared by every view-direction query
pub const VIEW_DIRECTION_FRAGMENT: &str = "
void main() {
    luminance = vec4(calcViewDir(), 0.0);
}
";

impl ProgramKey {
    fn new(kind: PassKind, wlset: Option<usize>, mode: RenderMode) -> Self {
        Self {
            kind,
            scatterer: None,
            wavelength_set: wlset,
            mode,
        }
    }

    fn scatterer(kind: PassKind, scatterer: usize, wlset: usize, mode: RenderMode) -> Self {
        Self {
            kind,
            scatterer: Some(scatterer),
            wavelength_set: Some(wlset),
            mode,
        }
    }

    /// Whether the pass draws the host's surface, linking in its view-ray function
    pub fn uses_surface(&self) -> bool {
        self.kind != PassKind::EclipsedDoubleScatteringCoarseGrid
    }

    /// Fragment source file, or `None` for built-in programs
    pub fn shader_path(&self, model: &AtmosphereModel) -> Option<PathBuf> {
        let wl = self.wavelength_set.unwrap_or(0);
        let name = match self.kind {
            PassKind::ZeroOrder => format!("zero-order-scattering-wlset{}.frag", wl),
            PassKind::EclipsedZeroOrder => {
                format!("eclipsed-zero-order-scattering-wlset{}.frag", wl)
            }
            PassKind::SingleScattering => format!(
                "single-scattering-{}-wlset{}-{}.frag",
                self.scatterer_name(model),
                wl,
                match self.mode {
                    RenderMode::OnTheFly => "on-the-fly",
                    RenderMode::Precomputed => "precomputed",
                }
            ),
            PassKind::EclipsedSingleScattering => format!(
                "eclipsed-single-scattering-{}-wlset{}.frag",
                self.scatterer_name(model),
                wl
            ),
            PassKind::MultipleScattering => format!("multiple-scattering-wlset{}.frag", wl),
            PassKind::EclipsedDoubleScatteringPrecomputed => {
                "eclipsed-double-scattering-precomputed.frag".into()
            }
            PassKind::EclipsedDoubleScatteringOnTheFly => {
                format!("eclipsed-double-scattering-on-the-fly-wlset{}.frag", wl)
            }
            PassKind::EclipsedDoubleScatteringCoarseGrid => {
                format!("eclipsed-double-scattering-coarse-grid-wlset{}.frag", wl)
            }
            PassKind::LightPollution => format!("light-pollution-wlset{}.frag", wl),
            PassKind::ViewDirection => return None,
        };
        Some(model.shader_dir.join(name))
    }

    fn scatterer_name<'a>(&self, model: &'a AtmosphereModel) -> &'a str {
        self.scatterer
            .map_or("", |i| model.scatterers[i].name.as_str())
    }

    pub fn describe(&self, model: &AtmosphereModel) -> String {
        let mut out = format!("{:?}", self.kind);
        if self.scatterer.is_some() {
            out.push(' ');
            out.push_str(self.scatterer_name(model));
        }
        if let Some(wl) = self.wavelength_set {
            out.push_str(&format!(" wlset{}", wl));
        }
        if self.kind == PassKind::SingleScattering {
            out.push_str(&format!(" {:?}", self.mode));
        }
        out
    }

    /// Uniforms and samplers the renderer provides to this pass
    pub fn interface(&self, model: &AtmosphereModel) -> (Vec<UniformDecl>, Vec<SamplerDecl>) {
        use self::TextureDim::*;
        use self::UniformType::*;

        if self.kind == PassKind::EclipsedDoubleScatteringCoarseGrid {
            let rows = 2 * model.eclipsed_double_scattering_elevation_samples_per_side;
            return (
                vec![
                    UniformDecl::new("cameraAltitude", Float),
                    UniformDecl::new("sunZenithAngle", Float),
                    UniformDecl::new("moonZenithAngle", Float),
                    UniformDecl::new("moonAzimuthRelativeToSun", Float),
                    UniformDecl::new("earthMoonDistance", Float),
                    UniformDecl::new("elevations", FloatArray(rows)),
                    UniformDecl::new("azimuthSampleCount", Int),
                ],
                vec![
                    SamplerDecl::new("transmittanceTexture", D2),
                    SamplerDecl::new("irradianceTexture", D2),
                ],
            );
        }
        if self.kind == PassKind::ViewDirection {
            return (Vec::new(), Vec::new());
        }

        let mut uniforms = vec![
            UniformDecl::new("cameraAltitude", Float),
            UniformDecl::new("sunDirection", Vec3),
            UniformDecl::new("sunZenithAngle", Float),
            UniformDecl::new("altitudeSliceWeight", Float),
            UniformDecl::new("radianceToLuminance", Mat4),
            UniformDecl::new("solarIrradianceFixup", Vec4),
        ];
        if self.is_eclipsed() {
            uniforms.push(UniformDecl::new("moonPosition", Vec3));
            uniforms.push(UniformDecl::new("moonAngularRadius", Float));
        }
        let pair = |name: &str, dim| {
            vec![
                SamplerDecl::new(&format!("{}Lower", name), dim),
                SamplerDecl::new(&format!("{}Upper", name), dim),
            ]
        };
        let transmittance = SamplerDecl::new("transmittanceTexture", D2);
        let samplers = match (self.kind, self.mode) {
            (PassKind::SingleScattering, RenderMode::Precomputed) => {
                let mut s = pair("scatteringTexture", D3);
                s.extend(pair("scatteringInterpolationGuides", D3));
                s
            }
            (PassKind::MultipleScattering, _) => pair("scatteringTexture", D3),
            (PassKind::EclipsedDoubleScatteringOnTheFly, _) => {
                let mut s = vec![transmittance];
                s.extend(pair("irradianceTexture", D1));
                s
            }
            (PassKind::EclipsedDoubleScatteringPrecomputed, _) => {
                uniforms.push(UniformDecl::new("eclipseSliceWeight", Float));
                pair("eclipsedDoubleScatteringTexture", D3)
            }
            (PassKind::LightPollution, _) => {
                uniforms.push(UniformDecl::new("lightPollutionRadianceScale", Float));
                pair("lightPollutionTexture", D1)
            }
            _ => vec![transmittance],
        };
        (uniforms, samplers)
    }

    fn is_eclipsed(&self) -> bool {
        match self.kind {
            PassKind::EclipsedZeroOrder
            | PassKind::EclipsedSingleScattering
            | PassKind::EclipsedDoubleScatteringOnTheFly
            | PassKind::EclipsedDoubleScatteringPrecomputed => true,
            _ => false,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ProgramId(u32);

/// Single-scattering programs of one scatterer, indexed by wavelength set
#[derive(Debug, Clone)]
pub struct ScattererPrograms {
    pub scatterer: usize,
    pub on_the_fly: Vec<ProgramId>,
    /// Absent when single scattering is folded into the multiple-scattering tables
    pub precomputed: Option<Vec<ProgramId>>,
    pub eclipsed: Vec<ProgramId>,
}

/// Program ids resolved once per model, so that drawing needs no lookups by name
#[derive(Debug, Clone)]
pub struct RenderPrograms {
    pub zero_order: Vec<ProgramId>,
    pub eclipsed_zero_order: Vec<ProgramId>,
    pub single: Vec<ScattererPrograms>,
    pub multiple: Vec<ProgramId>,
    pub eclipsed_double_on_the_fly: Vec<ProgramId>,
    pub eclipsed_double_precomputed: Option<ProgramId>,
    /// Empty when the model has no eclipse tables
    pub coarse_grid: Vec<ProgramId>,
    pub light_pollution: Vec<ProgramId>,
    pub view_direction: ProgramId,
}

/// Arena of every program the model needs
pub struct ScatteringRenderProgramSet<P> {
    keys: Vec<ProgramKey>,
    programs: Vec<Option<P>>,
    resolved: RenderPrograms,
}

impl<P> ScatteringRenderProgramSet<P> {
    /// An empty set with a slot for every program `model` renders with
    pub fn new(model: &AtmosphereModel) -> Self {
        let mut keys = Vec::new();
        let mut add = |key: ProgramKey| {
            keys.push(key);
            ProgramId(keys.len() as u32 - 1)
        };
        let sets = model.wavelength_set_count();
        let per_set = |add: &mut dyn FnMut(ProgramKey) -> ProgramId, kind| {
            (0..sets)
                .map(|wl| add(ProgramKey::new(kind, Some(wl), RenderMode::Precomputed)))
                .collect::<Vec<_>>()
        };

        let zero_order = per_set(&mut add, PassKind::ZeroOrder);
        let eclipsed_zero_order = per_set(&mut add, PassKind::EclipsedZeroOrder);
        let mut single = Vec::with_capacity(model.scatterers.len());
        for (i, scatterer) in model.scatterers.iter().enumerate() {
            let on_the_fly = (0..sets)
                .map(|wl| {
                    add(ProgramKey::scatterer(
                        PassKind::SingleScattering,
                        i,
                        wl,
                        RenderMode::OnTheFly,
                    ))
                })
                .collect();
            let precomputed = match scatterer.phase_function {
                PhaseFunctionType::General => Some(
                    (0..sets)
                        .map(|wl| {
                            add(ProgramKey::scatterer(
                                PassKind::SingleScattering,
                                i,
                                wl,
                                RenderMode::Precomputed,
                            ))
                        })
                        .collect(),
                ),
                PhaseFunctionType::Smooth => None,
            };
            let eclipsed = (0..sets)
                .map(|wl| {
                    add(ProgramKey::scatterer(
                        PassKind::EclipsedSingleScattering,
                        i,
                        wl,
                        RenderMode::OnTheFly,
                    ))
                })
                .collect();
            single.push(ScattererPrograms {
                scatterer: i,
                on_the_fly,
                precomputed,
                eclipsed,
            });
        }
        let multiple = per_set(&mut add, PassKind::MultipleScattering);
        let eclipsed_double_on_the_fly =
            per_set(&mut add, PassKind::EclipsedDoubleScatteringOnTheFly);
        let (eclipsed_double_precomputed, coarse_grid) =
            if model.has_eclipsed_double_scattering_tables {
                (
                    Some(add(ProgramKey::new(
                        PassKind::EclipsedDoubleScatteringPrecomputed,
                        None,
                        RenderMode::Precomputed,
                    ))),
                    per_set(&mut add, PassKind::EclipsedDoubleScatteringCoarseGrid),
                )
            } else {
                (None, Vec::new())
            };
        let light_pollution = per_set(&mut add, PassKind::LightPollution);
        let view_direction = add(ProgramKey::new(
            PassKind::ViewDirection,
            None,
            RenderMode::OnTheFly,
        ));

        let programs = keys.iter().map(|_| None).collect();
        Self {
            keys,
            programs,
            resolved: RenderPrograms {
                zero_order,
                eclipsed_zero_order,
                single,
                multiple,
                eclipsed_double_on_the_fly,
                eclipsed_double_precomputed,
                coarse_grid,
                light_pollution,
                view_direction,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ProgramId> {
        (0..self.keys.len() as u32).map(ProgramId)
    }

    pub fn key(&self, id: ProgramId) -> &ProgramKey {
        &self.keys[id.0 as usize]
    }

    pub fn resolved(&self) -> &RenderPrograms {
        &self.resolved
    }

    pub fn get(&self, id: ProgramId) -> Option<&P> {
        self.programs[id.0 as usize].as_ref()
    }

    /// Install a compiled program, dropping the one it replaces
    pub fn set(&mut self, id: ProgramId, program: P) {
        self.programs[id.0 as usize] = Some(program);
    }

    pub fn is_complete(&self) -> bool {
        self.programs.iter().all(Option::is_some)
    }

    /// Drop every compiled program, keeping the slots
    pub fn release(&mut self) {
        for program in &mut self.programs {
            *program = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::toy_model;
    use crate::model::Scatterer;

    #[test]
    fn arena_covers_every_pass() {
        let mut model = toy_model();
        model.scatterers.push(Scatterer {
            name: "mie".into(),
            phase_function: PhaseFunctionType::Smooth,
            cross_section: vec![0.0; 4],
        });
        let set = ScatteringRenderProgramSet::<()>::new(&model);
        let r = set.resolved();
        assert_eq!(r.single.len(), 2);
        assert!(r.single[0].precomputed.is_some());
        assert!(r.single[1].precomputed.is_none());
        assert_eq!(r.coarse_grid.len(), 1);
        // zero, eclipsed zero, 3 rayleigh + 2 mie single, multiple, double on the fly,
        // double precomputed, coarse grid, light pollution, view direction
        assert_eq!(set.len(), 13);
        assert!(!set.is_empty());
        assert!(!set.is_complete());
        assert_eq!(set.key(r.view_direction).kind, PassKind::ViewDirection);
        assert!(set.key(r.view_direction).shader_path(&model).is_none());

        let mut set = set;
        let ids: Vec<ProgramId> = set.ids().collect();
        for id in ids {
            set.set(id, ());
        }
        assert!(set.is_complete());
        set.release();
        assert!(!set.is_complete());
    }

    #[test]
    fn no_eclipse_tables_no_coarse_programs() {
        let mut model = toy_model();
        model.has_eclipsed_double_scattering_tables = false;
        let set = ScatteringRenderProgramSet::<()>::new(&model);
        assert!(set.resolved().coarse_grid.is_empty());
        assert!(set.resolved().eclipsed_double_precomputed.is_none());
    }

    #[test]
    fn shader_paths() {
        let model = toy_model();
        let set = ScatteringRenderProgramSet::<()>::new(&model);
        let id = set.resolved().single[0].precomputed.as_ref().unwrap()[0];
        assert_eq!(
            set.key(id).shader_path(&model).unwrap(),
            model
                .shader_dir
                .join("single-scattering-rayleigh-wlset0-precomputed.frag")
        );
        let (uniforms, samplers) = set.key(id).interface(&model);
        assert!(uniforms.iter().any(|u| u.name == "radianceToLuminance"));
        assert_eq!(samplers.len(), 4);
    }
}
