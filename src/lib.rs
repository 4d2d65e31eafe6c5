//! luxtrace: photometric Monte Carlo simulation for indoor horticulture.
//!
//! Estimates illuminance (lux) and photosynthetic photon flux density
//! (PPFD, µmol·m⁻²·s⁻¹) at arbitrary measurement points inside a 3D
//! enclosure lit by directional fixtures with measured spectral power
//! distributions. Two engines share one interface: a sequential reference
//! path tracer (ground truth) and a progressive wgpu compute engine that
//! transparently falls back to the reference implementation when no
//! compute-capable adapter exists or a device call fails mid-run.
//!
//! Typical use:
//!
//! ```no_run
//! use glam::Vec3;
//! use luxtrace::{create_raytracer, Raytracer, Scene, SimulationParameters};
//!
//! let mut engine = create_raytracer();
//! engine.upload_scene(&Scene::default())?;
//! let params = SimulationParameters::default();
//! let results = engine.run_simulation(&[Vec3::new(2.0, 3.0, 0.8)], &params)?;
//! println!("{} lux", results[0].illuminance_lux);
//! # Ok::<(), luxtrace::EngineError>(())
//! ```

pub mod engine;
pub mod error;
pub mod gpu;
pub mod sampling;
pub mod scene;
pub mod stats;

pub use engine::{
    create_raytracer, Calibration, GpuRaytracer, Raytracer, ReferenceRaytracer,
    SimulationParameters,
};
pub use error::{EngineError, EngineResult};
pub use gpu::EngineCaps;
pub use scene::{
    LightSource, RoomBounds, Scene, SpectralPowerDistribution, Surface, SurfaceKind,
    SurfaceMaterial,
};
pub use stats::{IlluminanceResult, SimulationStatistics};
