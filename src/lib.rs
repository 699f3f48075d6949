//! Real-time rendering of a precomputed atmosphere, including eclipsed skies
//!
//! An offline generator describes the atmosphere as an `AtmosphereModel` and writes per-wavelength
//! tables and fragment shaders. `AtmosphereRenderer` streams the altitude slices those tables need
//! onto the GPU in bounded steps, draws scattering passes additively into a luminance target, and
//! populates the eclipsed double-scattering table at runtime from a coarse angular grid.
//!
//! The renderer is generic over `gpu::Gpu`; `gpu::vulkan::VulkanGpu` is the provided backend.
//! Table layout and altitude parameterisation follow E. Bruneton and F. Neyret's "Precomputed
//! atmospheric scattering".

pub mod colorimetry;
pub mod controller;
pub mod eclipse;
mod error;
pub mod gpu;
mod loading;
pub mod model;
pub mod pipeline;
pub mod programs;
mod renderer;
pub mod settings;
mod shader_cache;
pub mod table;
pub mod textures;

pub use controller::{EclipseGeometry, TextureStreamingController};
pub use eclipse::{CoarseGridParams, EclipseDoubleScatteringEngine, GridSlot};
pub use error::{EclipseError, GpuError, LoadError, ModelError, RenderError, SettingsError};
pub use loading::{LoadState, LoadingProgress, StepMode};
pub use model::{AtmosphereModel, PhaseFunctionType, Scatterer};
pub use pipeline::{Luminance, ScatteringRenderPipeline, SpectralRadiance};
pub use renderer::AtmosphereRenderer;
pub use settings::{RenderSettings, Settings};
pub use shader_cache::ShaderCache;
