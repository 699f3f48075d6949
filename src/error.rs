use std::{io, path::PathBuf};

use ash::vk;

use crate::loading::LoadState;

/// The atmosphere model can't be used to construct a renderer
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("invalid atmosphere model: {0}")]
    Invalid(String),
}

/// Failure reported by a `Gpu` backend
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("failed to compile {name}:\n{log}")]
    Compile { name: String, log: String },
    #[error("incomplete framebuffer: {0}")]
    IncompleteFramebuffer(String),
    #[error("no suitable memory type for {0}")]
    NoMemoryType(&'static str),
    #[error("program has no uniform named {0}")]
    UnknownUniform(String),
    #[error("program has no sampler named {0}")]
    UnknownSampler(String),
    #[error("{0}")]
    Unsupported(String),
    #[error(transparent)]
    Vulkan(#[from] vk::Result),
}

/// Failure of one unit of a loading cycle
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("missing file {}", .0.display())]
    MissingFile(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed table {}: {reason}", path.display())]
    BadTable { path: PathBuf, reason: String },
    #[error("{what} failed: {source}")]
    Gpu {
        what: String,
        #[source]
        source: GpuError,
    },
    #[error(transparent)]
    Eclipse(#[from] EclipseError),
}

/// Misuse of the coarse-grid sample cache
#[derive(Debug, thiserror::Error)]
pub enum EclipseError {
    #[error("coarse grid holds altitude {held:?}, requested {requested}")]
    WrongAltitude {
        held: Option<usize>,
        requested: usize,
    },
    #[error("coarse grid nodes were placed for altitude {held} m, requested {requested} m")]
    CameraAltitude { held: f32, requested: f32 },
    #[error("expected {expected} coarse-grid samples, got {got}")]
    ShortCheckpoint { expected: usize, got: usize },
    #[error("coarse grid pass returned {got} samples, expected {expected}")]
    GridSize { expected: usize, got: usize },
    #[error("coarse grid for sza index {0} has not been computed")]
    MissingSza(usize),
    #[error("expected {expected} data textures, got {got}")]
    DataTextures { expected: usize, got: usize },
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Precondition failure of a draw or read-back
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("renderer is not ready to render (state {0:?})")]
    NotReady(LoadState),
    #[error("nothing has been drawn yet")]
    NothingDrawn,
    #[error("render targets have not been sized")]
    NoTargets,
    #[error("pixel ({x}, {y}) is outside the {width}x{height} target")]
    OutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    #[error("radiance capture is disabled")]
    RadianceCaptureDisabled,
    #[error("the model does not allow overriding the solar spectrum")]
    SolarSpectrumFixed,
    #[error("expected {expected} spectrum values, got {got}")]
    SpectrumLength { expected: usize, got: usize },
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Failure to read or write a settings file
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Read(#[source] io::Error),
    #[error("failed to write settings: {0}")]
    Write(#[source] io::Error),
    #[error("failed to parse settings: {0}")]
    Parse(#[source] ron::error::SpannedError),
    #[error("failed to serialize settings: {0}")]
    Serialize(#[source] ron::Error),
}
