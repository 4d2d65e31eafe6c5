// src/engine/mod.rs
// Raytracer capability interface, lifecycle contract and the
// capability-detection factory.
// RELEVANT FILES: src/engine/reference.rs, src/engine/gpu.rs, src/engine/params.rs

pub mod gpu;
pub mod layout;
pub mod params;
pub mod readback;
pub mod reference;

use glam::Vec3;
use log::warn;

pub use self::gpu::GpuRaytracer;
pub use self::params::{Calibration, SimulationParameters};
pub use self::reference::ReferenceRaytracer;

use crate::error::{EngineError, EngineResult};
use crate::gpu::EngineCaps;
use crate::scene::Scene;
use crate::stats::{IlluminanceResult, SimulationStatistics};

/// Outcome of the most recent run, retained for `statistics()`.
///
/// Lifecycle of an engine instance: capability-probed at construction,
/// `upload_scene` loads a scene, `run_simulation` produces a record,
/// `dispose` ends the instance. Every method except `dispose` fails with
/// `EngineError::Disposed` afterwards; a second `dispose` is a no-op.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub results: Vec<IlluminanceResult>,
    pub samples_per_point: u32,
    pub converged_early: bool,
}

/// Photometric simulation engine interface. Two concrete implementations:
/// [`ReferenceRaytracer`] (sequential ground truth) and [`GpuRaytracer`]
/// (progressive wgpu compute, delegating to an internal reference engine
/// whenever the accelerated path is unavailable or fails).
pub trait Raytracer {
    /// Validate and stage a scene, replacing any previously uploaded one.
    fn upload_scene(&mut self, scene: &Scene) -> EngineResult<()>;

    /// Estimate illuminance at each measurement point.
    fn run_simulation(
        &mut self,
        points: &[Vec3],
        params: &SimulationParameters,
    ) -> EngineResult<Vec<IlluminanceResult>>;

    /// Aggregate metrics of the most recent result set.
    fn statistics(&self) -> EngineResult<SimulationStatistics>;

    /// Capability report probed at construction.
    fn caps(&self) -> &EngineCaps;

    /// Release device resources. Idempotent.
    fn dispose(&mut self);

    /// Single-point convenience query.
    fn illuminance_at(&mut self, point: Vec3, params: &SimulationParameters) -> EngineResult<f32> {
        let results = self.run_simulation(std::slice::from_ref(&point), params)?;
        Ok(results
            .first()
            .map(|r| r.illuminance_lux)
            .unwrap_or_default())
    }
}

/// Select an engine for this host: the accelerated implementation when a
/// compute-capable adapter exists, otherwise the reference engine. A
/// capability failure is a downgrade, never an error.
pub fn create_raytracer() -> Box<dyn Raytracer> {
    match GpuRaytracer::new() {
        Ok(engine) => Box::new(engine),
        Err(e) => {
            warn!("parallel engine unavailable ({e}); using reference engine");
            Box::new(ReferenceRaytracer::new())
        }
    }
}

/// Guard shared by both implementations.
pub(crate) fn ensure_live(disposed: bool) -> EngineResult<()> {
    if disposed {
        Err(EngineError::Disposed)
    } else {
        Ok(())
    }
}

/// Preflight shared by both implementations: lifecycle, parameters, scene
/// presence and scene integrity, in that order.
pub(crate) fn preflight<'a>(
    disposed: bool,
    scene: Option<&'a Scene>,
    params: &SimulationParameters,
) -> EngineResult<&'a Scene> {
    ensure_live(disposed)?;
    params.validate()?;
    let scene = scene.ok_or_else(|| {
        EngineError::scene_validation("no scene uploaded; call upload_scene first")
    })?;
    scene.validate()?;
    Ok(scene)
}
