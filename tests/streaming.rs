mod common;

use std::sync::Arc;

use skyglow::programs::ScatteringRenderProgramSet;
use skyglow::table::TablePaths;
use skyglow::textures::TableKind;
use skyglow::{
    AtmosphereModel, AtmosphereRenderer, LoadError, LoadState, LoadingProgress, RenderSettings,
};

use common::{altitude_at, run, toy_model, view_ray, write_fixture, MockGpu};

const SLICED: [TableKind; 5] = [
    TableKind::Irradiance,
    TableKind::MultipleScattering,
    TableKind::SingleScattering,
    TableKind::InterpolationGuides,
    TableKind::LightPollution,
];

fn renderer(levels: u32) -> (tempfile::TempDir, AtmosphereRenderer<MockGpu>) {
    let dir = tempfile::tempdir().unwrap();
    let model = toy_model(dir.path(), levels);
    write_fixture(&model);
    let renderer = AtmosphereRenderer::new(MockGpu::new(), Arc::new(model)).unwrap();
    (dir, renderer)
}

fn no_eclipse() -> RenderSettings {
    RenderSettings {
        eclipsed_double_scattering_precomputed: false,
        ..RenderSettings::default()
    }
}

fn loaded(levels: u32, settings: &RenderSettings) -> (tempfile::TempDir, AtmosphereRenderer<MockGpu>) {
    let (dir, mut r) = renderer(levels);
    let steps = r.begin_data_load(view_ray(), settings);
    assert!(steps > 0);
    assert_eq!(run(|| r.step_data_load()), steps);
    assert_eq!(r.state(), LoadState::ReadyToRender);
    (dir, r)
}

fn program_count(model: &AtmosphereModel) -> usize {
    ScatteringRenderProgramSet::<()>::new(model).len()
}

#[test]
fn dry_run_counts_every_step() {
    let (_dir, mut r) = renderer(2);
    let settings = no_eclipse();
    let steps = r.begin_data_load(view_ray(), &settings);
    assert_eq!(r.state(), LoadState::LoadingData);
    // Programs, transmittance, eclipse data and one slice per table at the ground
    let programs = program_count(r.model());
    assert_eq!(steps as usize, programs + 1 + 1 + 5);
    {
        let log = r.gpu().log.borrow();
        assert!(log.compiled.is_empty());
        assert_eq!(log.checked.len(), programs);
        assert!(log.uploads.is_empty());
    }
    assert_eq!(run(|| r.step_data_load()), steps);
    let log = r.gpu().log.borrow();
    assert_eq!(log.compiled.len(), programs);
    assert_eq!(log.uploads.len(), 7);
}

#[test]
fn dry_run_counts_eclipse_units() {
    let (_dir, mut r) = renderer(2);
    let settings = RenderSettings::default();
    let steps = r.begin_data_load(view_ray(), &settings);
    // One coarse-grid unit and one upload for the single ground level
    assert_eq!(steps as usize, program_count(r.model()) + 2 + 5 + 2);
    assert_eq!(run(|| r.step_data_load()), steps);
    assert_eq!(r.resident_bracket(TableKind::EclipsedDoubleScattering).unwrap().lower, 0);
}

#[test]
fn completed_cycle_is_idempotent() {
    let (_dir, mut r) = loaded(2, &no_eclipse());
    let before = r.gpu().log.borrow().uploads.len();
    let first = r.step_data_load();
    let second = r.step_data_load();
    assert!(first.is_complete());
    assert_eq!(first, second);
    assert_eq!(r.gpu().log.borrow().uploads.len(), before);
    assert_eq!(r.state(), LoadState::ReadyToRender);
}

#[test]
fn stepping_without_a_cycle_fails() {
    let (_dir, mut r) = renderer(2);
    assert_eq!(r.step_data_load(), LoadingProgress::FAILED);
    assert_eq!(r.step_texture_prep(), LoadingProgress::FAILED);
    assert_eq!(r.begin_texture_prep(&no_eclipse()), -1);
    assert_eq!(r.begin_shader_reload(), -1);
    assert_eq!(r.state(), LoadState::NotReady);
}

#[test]
fn brackets_follow_altitude() {
    let settings = no_eclipse();
    let (_dir, mut r) = loaded(4, &settings);
    for &u in &[0.1, 0.5, 0.9, 1.0, 0.0, 0.4] {
        let altitude = altitude_at(r.model(), u);
        let settings = RenderSettings {
            altitude,
            ..no_eclipse()
        };
        let uploads = r.gpu().log.borrow().uploads.len();
        let steps = r.begin_texture_prep(&settings);
        assert!(steps >= 0);
        run(|| r.step_texture_prep());
        assert_eq!(r.latched_altitude(), altitude);

        let at_boundary = u == 0.0 || u == 1.0;
        for &kind in &SLICED {
            let bracket = r.resident_bracket(kind).unwrap();
            assert_eq!(bracket.is_single(), at_boundary, "u={} {:?}", u, kind);
            assert!(bracket.contains(r.model(), altitude, 4));
        }
        let per_table = if at_boundary { 1 } else { 2 };
        if steps > 0 {
            assert_eq!(
                r.gpu().log.borrow().uploads.len() - uploads,
                SLICED.len() * per_table
            );
        }
    }
}

#[test]
fn unchanged_bracket_needs_no_work() {
    let (_dir, mut r) = loaded(4, &no_eclipse());
    let low = RenderSettings {
        altitude: altitude_at(r.model(), 0.1),
        ..no_eclipse()
    };
    assert!(r.begin_texture_prep(&low) > 0);
    run(|| r.step_texture_prep());
    let uploads = r.gpu().log.borrow().uploads.len();
    let nearby = RenderSettings {
        altitude: altitude_at(r.model(), 0.2),
        ..no_eclipse()
    };
    assert_eq!(r.begin_texture_prep(&nearby), 0);
    assert_eq!(r.state(), LoadState::ReadyToRender);
    assert_eq!(r.gpu().log.borrow().uploads.len(), uploads);
}

#[test]
fn altitude_stays_latched_during_a_cycle() {
    let (_dir, mut r) = loaded(4, &no_eclipse());
    let first = altitude_at(r.model(), 0.2);
    let settings = |u| RenderSettings {
        altitude: altitude_at(r.model(), u),
        ..no_eclipse()
    };
    let (a, b, c) = (settings(0.2), settings(0.8), settings(0.5));
    let uploads = r.gpu().log.borrow().uploads.len();

    let steps = r.begin_texture_prep(&a);
    assert_eq!(steps, 10);
    assert!(!r.step_texture_prep().is_complete());
    assert_eq!(r.begin_texture_prep(&b), steps);
    assert!(!r.step_texture_prep().is_complete());
    assert_eq!(r.begin_texture_prep(&c), steps);
    assert_eq!(r.state(), LoadState::ReloadingTextures);
    run(|| r.step_texture_prep());

    assert_eq!(r.gpu().log.borrow().uploads.len() - uploads, steps as usize);
    assert_eq!(r.latched_altitude(), first);
    let bracket = r.resident_bracket(TableKind::MultipleScattering).unwrap();
    assert_eq!((bracket.lower, bracket.upper), (0, 1));

    // The next cycle picks up where the camera went
    assert_eq!(r.begin_texture_prep(&c), steps);
    run(|| r.step_texture_prep());
    let bracket = r.resident_bracket(TableKind::MultipleScattering).unwrap();
    assert_eq!((bracket.lower, bracket.upper), (1, 2));
}

#[test]
fn cycles_do_not_interleave() {
    let (_dir, mut r) = loaded(4, &no_eclipse());
    let settings = RenderSettings {
        altitude: altitude_at(r.model(), 0.5),
        ..no_eclipse()
    };
    let steps = r.begin_texture_prep(&settings);
    r.step_texture_prep();
    assert_eq!(r.begin_shader_reload(), -1);
    assert_eq!(r.begin_data_load(view_ray(), &settings), -1);
    assert_eq!(r.step_shader_reload(), LoadingProgress::FAILED);
    assert_eq!(r.state(), LoadState::ReloadingTextures);
    assert_eq!(run(|| r.step_texture_prep()), steps - 1);
}

#[test]
fn missing_table_fails_before_any_gpu_work() {
    let (_dir, mut r) = renderer(2);
    let path = TablePaths {
        dir: &r.model().texture_dir,
    }
    .light_pollution(0);
    std::fs::remove_file(&path).unwrap();
    assert_eq!(r.begin_data_load(view_ray(), &no_eclipse()), -1);
    assert_eq!(r.state(), LoadState::NotReady);
    assert!(matches!(r.last_error(), Some(LoadError::MissingFile(p)) if *p == path));
    assert!(r.current_activity().contains("light-pollution"));
    let log = r.gpu().log.borrow();
    assert!(log.compiled.is_empty() && log.uploads.is_empty());
}

#[test]
fn malformed_table_is_rejected() {
    let (_dir, mut r) = renderer(2);
    let path = TablePaths {
        dir: &r.model().texture_dir,
    }
    .multiple_scattering(0);
    skyglow::table::write_table(&path, &[4, 4, 4, 2], &vec![[0.0; 4]; 128]).unwrap();
    assert_eq!(r.begin_data_load(view_ray(), &no_eclipse()), -1);
    assert!(matches!(r.last_error(), Some(LoadError::BadTable { .. })));
}

#[test]
fn missing_shader_is_rejected() {
    let (_dir, mut r) = renderer(2);
    let path = r.model().shader_dir.join("multiple-scattering-wlset0.frag");
    std::fs::remove_file(&path).unwrap();
    assert_eq!(r.begin_data_load(view_ray(), &no_eclipse()), -1);
    assert!(matches!(r.last_error(), Some(LoadError::MissingFile(_))));
}

#[test]
fn uncompilable_shader_fails_the_dry_run() {
    let (_dir, mut r) = renderer(2);
    r.gpu().log.borrow_mut().fail_compile = Some("LightPollution".into());
    assert_eq!(r.begin_data_load(view_ray(), &no_eclipse()), -1);
    assert_eq!(r.state(), LoadState::NotReady);
    assert!(matches!(r.last_error(), Some(LoadError::Gpu { .. })));
    assert!(r.current_activity().starts_with("Failed"));
    assert_eq!(r.step_data_load(), LoadingProgress::FAILED);
    {
        let log = r.gpu().log.borrow();
        assert!(log.compiled.is_empty() && log.uploads.is_empty());
    }

    // A broken view-ray function breaks the very first program
    let checked = r.gpu().log.borrow().checked.len();
    r.gpu().log.borrow_mut().fail_compile = Some(String::new());
    assert_eq!(r.begin_data_load(view_ray(), &no_eclipse()), -1);
    assert_eq!(r.state(), LoadState::NotReady);
    assert_eq!(r.gpu().log.borrow().checked.len(), checked);
}

#[test]
fn failed_step_releases_everything() {
    let (_dir, mut r) = renderer(2);
    r.gpu().log.borrow_mut().fail_link = Some("LightPollution".into());
    let steps = r.begin_data_load(view_ray(), &no_eclipse());
    assert!(steps > 0);
    let mut done = 0;
    let failure = loop {
        let progress = r.step_data_load();
        if progress.is_failed() {
            break progress;
        }
        done += 1;
    };
    assert_eq!(failure.steps_done, done);
    assert_eq!(r.state(), LoadState::NotReady);
    assert!(matches!(r.last_error(), Some(LoadError::Gpu { .. })));
    assert!(r.current_activity().starts_with("Failed"));
    {
        let log = r.gpu().log.borrow();
        assert_eq!(log.live_programs, 0);
        assert_eq!(log.live_textures, 0);
    }
    // Later steps keep reporting the failure
    assert_eq!(r.step_data_load(), failure);

    // Retrying is up to the host
    r.gpu().log.borrow_mut().fail_link = None;
    let steps = r.begin_data_load(view_ray(), &no_eclipse());
    assert_eq!(run(|| r.step_data_load()), steps);
    assert!(r.last_error().is_none());
}

#[test]
fn shader_reload_recompiles_in_place() {
    let (_dir, mut r) = loaded(2, &no_eclipse());
    let programs = program_count(r.model());
    let textures = r.gpu().log.borrow().live_textures;
    let path = r.model().shader_dir.join("zero-order-scattering-wlset0.frag");
    std::fs::write(&path, "void main() { /* edited */ }").unwrap();

    let steps = r.begin_shader_reload();
    assert_eq!(steps as usize, programs);
    assert_eq!(r.state(), LoadState::ReloadingShaders);
    assert_eq!(run(|| r.step_shader_reload()), steps);
    assert_eq!(r.state(), LoadState::ReadyToRender);

    let log = r.gpu().log.borrow();
    assert_eq!(log.compiled.len(), 2 * programs);
    assert_eq!(log.live_programs, programs as i64);
    assert_eq!(log.live_textures, textures);
    assert!(log.uploads.len() > 0);
}

#[test]
fn data_load_replaces_previous_resources() {
    let (_dir, mut r) = loaded(2, &no_eclipse());
    let programs = program_count(r.model()) as i64;
    let steps = r.begin_data_load(view_ray(), &no_eclipse());
    assert_eq!(r.gpu().log.borrow().live_programs, 0);
    assert_eq!(r.gpu().log.borrow().live_textures, 0);
    run(|| r.step_data_load());
    assert!(steps > 0);
    assert_eq!(r.gpu().log.borrow().live_programs, programs);
    assert_eq!(r.gpu().log.borrow().live_textures, 7);
}
