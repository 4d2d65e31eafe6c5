// src/engine/reference.rs
// Sequential reference path tracer: the correctness baseline the parallel
// engine is validated against, and its fallback target.
// RELEVANT FILES: src/engine/mod.rs, src/sampling/mod.rs, src/scene/geometry.rs

use glam::Vec3;
use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;

use super::params::SimulationParameters;
use super::{preflight, RunRecord, Raytracer};
use crate::error::EngineResult;
use crate::gpu::EngineCaps;
use crate::sampling::{bounce_direction, cosine_hemisphere, point_rng, russian_roulette, AliasTable};
use crate::scene::geometry::{nearest_hit, visible, Ray, SURFACE_BIAS};
use crate::scene::SurfaceMaterial;
use crate::scene::spectrum::SpectralBin;
use crate::scene::Scene;
use crate::stats::{
    build_result, deposit, spectral_bins, statistics_from_results, IlluminanceResult,
    SimulationStatistics,
};

/// Sensor orientation: measurement points integrate light over the upper
/// hemisphere (horizontal sensor plane, typical for canopy PPFD maps).
const SENSOR_NORMAL: Vec3 = Vec3::Z;

/// Sequential Monte Carlo engine. Computes synchronously per call; points
/// are independent, so they fan out across a rayon pool, which changes
/// wall-clock time but not results (each point owns a seeded sub-stream).
pub struct ReferenceRaytracer {
    scene: Option<Scene>,
    caps: EngineCaps,
    last: Option<RunRecord>,
    disposed: bool,
}

impl ReferenceRaytracer {
    pub fn new() -> Self {
        Self {
            scene: None,
            caps: EngineCaps::reference_only(),
            last: None,
            disposed: false,
        }
    }

}

impl Default for ReferenceRaytracer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-fixture sampling tables built once per run: fixture selection
/// weighted by intensity, and one wavelength table per fixture spectrum.
/// Fixtures with zero total power get an unsampleable table and are never
/// selected.
struct SpectralTables {
    fixtures: AliasTable,
    wavelengths: Vec<AliasTable>,
}

impl SpectralTables {
    fn build(scene: &Scene, importance: bool) -> Self {
        let weights: Vec<f32> = scene
            .lights
            .iter()
            .map(|l| {
                let emits = l.intensity > 0.0 && l.spectrum.total_power() > 0.0;
                if !emits {
                    0.0
                } else if importance {
                    l.intensity
                } else {
                    1.0
                }
            })
            .collect();
        let wavelengths = scene
            .lights
            .iter()
            .map(|l| AliasTable::new(&l.powers_or_empty()))
            .collect();
        Self {
            fixtures: AliasTable::new(&weights),
            wavelengths,
        }
    }

    /// Sample the wavelength carried by one path. Falls back to the band
    /// center when nothing in the scene emits.
    fn sample_wavelength(
        &self,
        scene: &Scene,
        range: (f32, f32),
        rng: &mut StdRng,
    ) -> f32 {
        let (idx, pdf) = self.fixtures.sample(rng.gen(), rng.gen());
        if pdf <= 0.0 {
            return (range.0 + range.1) * 0.5;
        }
        let table = &self.wavelengths[idx];
        let (bin, wl_pdf) = table.sample(rng.gen(), rng.gen());
        if wl_pdf <= 0.0 {
            return (range.0 + range.1) * 0.5;
        }
        scene.lights[idx].spectrum.wavelengths_nm[bin]
    }
}

// Spectrum accessor kept off the public LightSource surface.
trait PowersOrEmpty {
    fn powers_or_empty(&self) -> Vec<f32>;
}

impl PowersOrEmpty for crate::scene::LightSource {
    fn powers_or_empty(&self) -> Vec<f32> {
        if self.intensity > 0.0 {
            self.spectrum.powers.clone()
        } else {
            vec![0.0; self.spectrum.powers.len()]
        }
    }
}

/// Direct illumination at `point`: every fixture's angular and
/// inverse-square attenuation, gated by a shadow test against the patch
/// geometry.
pub(crate) fn direct_illuminance(scene: &Scene, point: Vec3, normal: Vec3) -> f32 {
    let origin = point + normal * SURFACE_BIAS;
    scene
        .lights
        .iter()
        .map(|light| {
            let e = light.illuminance_at(point);
            if e > 0.0 && visible(scene, origin, light.position) {
                e
            } else {
                0.0
            }
        })
        .sum()
}

/// One independent sample: iterative bounce loop carrying a [`Ray`] per
/// segment, accumulating throughput-weighted direct illumination at every
/// path vertex. The sensor launch is always cosine-weighted; each later
/// segment scatters off the material it stands on (diffuse hemisphere,
/// mirror reflection, or the coefficient-weighted mix). Russian roulette
/// takes over after the warm-up bounces.
fn trace_sample(
    scene: &Scene,
    params: &SimulationParameters,
    point: Vec3,
    wavelength_nm: f32,
    rng: &mut StdRng,
) -> f32 {
    let mut origin = point;
    let mut normal = SENSOR_NORMAL;
    let mut throughput = 1.0f32;
    let mut total = 0.0f32;
    // Direction the path arrived along and the material it now stands on;
    // None at the sensor itself.
    let mut arrival: Option<(Vec3, SurfaceMaterial)> = None;

    for bounce in 0..=params.max_bounces {
        total += throughput * direct_illuminance(scene, origin, normal);
        if bounce == params.max_bounces {
            break;
        }

        let direction = match &arrival {
            Some((incoming, material)) => bounce_direction(material, *incoming, normal, rng),
            None => cosine_hemisphere(normal, rng),
        };
        let ray = Ray {
            origin: origin + normal * SURFACE_BIAS,
            direction,
            wavelength_nm,
            throughput,
        };
        let Some(hit) = nearest_hit(scene, ray.origin, ray.direction) else {
            break;
        };

        throughput = ray.throughput * hit.material.reflectance();
        if throughput <= 0.0 {
            break;
        }
        match russian_roulette(bounce, throughput, rng) {
            Some(boost) => throughput *= boost,
            None => break,
        }

        origin = ray.point_at(hit.distance);
        normal = hit.normal;
        arrival = Some((ray.direction, hit.material));
    }

    total
}

/// Full estimate for one measurement point: sample mean of the path
/// estimator plus a spectral histogram of the sampled wavelengths.
fn trace_point(
    scene: &Scene,
    params: &SimulationParameters,
    tables: &SpectralTables,
    point: Vec3,
    point_index: u64,
) -> (f32, Vec<SpectralBin>) {
    let mut rng = point_rng(params.seed, point_index);
    let mut bins = spectral_bins(params.wavelength_range, params.spectral_resolution_nm);
    let mut sum = 0.0f64;

    for _ in 0..params.rays_per_point {
        let wavelength = tables.sample_wavelength(scene, params.wavelength_range, &mut rng);
        let estimate = trace_sample(scene, params, point, wavelength, &mut rng);
        sum += estimate as f64;
        deposit(
            &mut bins,
            params.wavelength_range,
            params.spectral_resolution_nm,
            wavelength,
            estimate,
        );
    }

    let inv_n = 1.0 / params.rays_per_point as f32;
    for bin in &mut bins {
        bin.power *= inv_n;
    }
    ((sum / params.rays_per_point as f64) as f32, bins)
}

/// Shared by the GPU fallback path: run the reference estimator over a
/// validated scene without re-running preflight.
pub(crate) fn simulate(
    scene: &Scene,
    points: &[Vec3],
    params: &SimulationParameters,
) -> Vec<IlluminanceResult> {
    let tables = SpectralTables::build(scene, params.importance_sampling);

    let mut results: Vec<IlluminanceResult> = points
        .par_iter()
        .enumerate()
        .map(|(i, &p)| {
            let (illuminance, bins) = trace_point(scene, params, &tables, p, i as u64);
            build_result(scene, params, p, illuminance, bins)
        })
        .collect();

    // Uniformity is a property of the whole set; patch it into each record.
    let values: Vec<f32> = results.iter().map(|r| r.illuminance_lux).collect();
    let (_, _, _, uniformity) = crate::stats::aggregate(&values);
    for r in &mut results {
        r.uniformity = uniformity;
    }
    results
}

impl Raytracer for ReferenceRaytracer {
    fn upload_scene(&mut self, scene: &Scene) -> EngineResult<()> {
        super::ensure_live(self.disposed)?;
        scene.validate()?;
        self.scene = Some(scene.clone());
        Ok(())
    }

    fn run_simulation(
        &mut self,
        points: &[Vec3],
        params: &SimulationParameters,
    ) -> EngineResult<Vec<IlluminanceResult>> {
        let scene = preflight(self.disposed, self.scene.as_ref(), params)?;
        let results = simulate(scene, points, params);
        self.last = Some(RunRecord {
            results: results.clone(),
            samples_per_point: params.rays_per_point,
            converged_early: false,
        });
        Ok(results)
    }

    fn statistics(&self) -> EngineResult<SimulationStatistics> {
        super::ensure_live(self.disposed)?;
        let record = self.last.as_ref().ok_or(crate::error::EngineError::NoResults)?;
        statistics_from_results(
            &record.results,
            record.samples_per_point,
            record.converged_early,
        )
    }

    fn caps(&self) -> &EngineCaps {
        &self.caps
    }

    fn dispose(&mut self) {
        self.scene = None;
        self.last = None;
        self.disposed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{LightSource, SpectralPowerDistribution};

    fn free_space_scene(intensity: f32) -> Scene {
        Scene {
            surfaces: vec![],
            lights: vec![LightSource {
                position: Vec3::new(0.0, 0.0, 2.0),
                direction: Vec3::NEG_Z,
                intensity,
                beam_angle_deg: 120.0,
                field_angle_deg: 120.0,
                spectrum: SpectralPowerDistribution::flat(10.0),
            }],
            bounds: None,
        }
    }

    fn quick_params(rays: u32, bounces: u32) -> SimulationParameters {
        SimulationParameters {
            rays_per_point: rays,
            max_bounces: bounces,
            seed: Some(11),
            ..Default::default()
        }
    }

    #[test]
    fn direct_only_matches_inverse_square() {
        let scene = free_space_scene(1000.0);
        let mut engine = ReferenceRaytracer::new();
        engine.upload_scene(&scene).unwrap();
        let results = engine
            .run_simulation(&[Vec3::ZERO], &quick_params(64, 0))
            .unwrap();
        let expected = 1000.0 / (4.0 * std::f32::consts::PI * 4.0);
        let got = results[0].illuminance_lux;
        // Direct illumination is deterministic; only one light, no bounces.
        assert!(
            (got - expected).abs() / expected < 1e-4,
            "got {got}, expected {expected}"
        );
    }

    #[test]
    fn fixed_seed_reproduces_results() {
        let mut scene = free_space_scene(500.0);
        scene.bounds = Some(crate::scene::RoomBounds::uniform(
            Vec3::new(-3.0, -3.0, -1.0),
            Vec3::new(3.0, 3.0, 3.0),
            crate::scene::SurfaceMaterial::diffuse(0.6),
        ));
        let params = quick_params(200, 3);
        let points = [Vec3::ZERO, Vec3::new(1.0, 0.5, 0.0)];

        let mut a = ReferenceRaytracer::new();
        a.upload_scene(&scene).unwrap();
        let ra = a.run_simulation(&points, &params).unwrap();

        let mut b = ReferenceRaytracer::new();
        b.upload_scene(&scene).unwrap();
        let rb = b.run_simulation(&points, &params).unwrap();

        for (x, y) in ra.iter().zip(&rb) {
            assert_eq!(x.illuminance_lux, y.illuminance_lux);
        }
    }

    #[test]
    fn bounces_add_energy_but_never_explode() {
        let mut scene = free_space_scene(1000.0);
        scene.bounds = Some(crate::scene::RoomBounds::uniform(
            Vec3::new(-2.0, -2.0, -0.5),
            Vec3::new(2.0, 2.0, 2.5),
            crate::scene::SurfaceMaterial::diffuse(0.8),
        ));
        let mut engine = ReferenceRaytracer::new();
        engine.upload_scene(&scene).unwrap();

        let direct = engine
            .run_simulation(&[Vec3::ZERO], &quick_params(400, 0))
            .unwrap()[0]
            .illuminance_lux;
        let bounced = engine
            .run_simulation(&[Vec3::ZERO], &quick_params(400, 4))
            .unwrap()[0]
            .illuminance_lux;

        assert!(bounced >= direct);
        // A 0.8-reflectance enclosure bounds total gain by the geometric
        // series 1 / (1 - 0.8) = 5.
        assert!(bounced < direct * 5.0);
    }

    #[test]
    fn surface_kind_changes_seeded_transport() {
        use crate::scene::{RoomBounds, SurfaceKind};

        let min = Vec3::new(-2.0, -2.0, -0.5);
        let max = Vec3::new(2.0, 2.0, 2.5);
        let mut diffuse_scene = free_space_scene(1000.0);
        diffuse_scene.bounds = Some(RoomBounds::uniform(
            min,
            max,
            crate::scene::SurfaceMaterial::diffuse(0.8),
        ));
        let mut mirror_scene = diffuse_scene.clone();
        mirror_scene.bounds = Some(RoomBounds::uniform(
            min,
            max,
            crate::scene::SurfaceMaterial {
                diffuse: 0.0,
                specular: 0.8,
                kind: SurfaceKind::Specular,
            },
        ));

        let params = quick_params(400, 4);
        let run = |scene: &Scene| {
            let mut engine = ReferenceRaytracer::new();
            engine.upload_scene(scene).unwrap();
            engine.run_simulation(&[Vec3::ZERO], &params).unwrap()[0].illuminance_lux
        };

        let diffuse = run(&diffuse_scene);
        let mirror = run(&mirror_scene);
        // Equal coefficients, equal seed: only the scattering lobe differs,
        // so a mirror enclosure must redistribute the indirect light.
        assert_ne!(diffuse, mirror);
    }

    #[test]
    fn mirror_enclosure_respects_energy_bound() {
        use crate::scene::{RoomBounds, SurfaceKind};

        let mut scene = free_space_scene(1000.0);
        scene.bounds = Some(RoomBounds::uniform(
            Vec3::new(-2.0, -2.0, -0.5),
            Vec3::new(2.0, 2.0, 2.5),
            crate::scene::SurfaceMaterial {
                diffuse: 0.0,
                specular: 0.8,
                kind: SurfaceKind::Specular,
            },
        ));
        let mut engine = ReferenceRaytracer::new();
        engine.upload_scene(&scene).unwrap();

        let direct = engine
            .run_simulation(&[Vec3::ZERO], &quick_params(400, 0))
            .unwrap()[0]
            .illuminance_lux;
        let bounced = engine
            .run_simulation(&[Vec3::ZERO], &quick_params(400, 4))
            .unwrap()[0]
            .illuminance_lux;

        assert!(bounced >= direct);
        assert!(bounced < direct * 5.0);
    }

    #[test]
    fn zero_power_fixture_contributes_nothing() {
        let scene = free_space_scene(0.0);
        let mut engine = ReferenceRaytracer::new();
        engine.upload_scene(&scene).unwrap();
        let results = engine
            .run_simulation(&[Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0)], &quick_params(128, 2))
            .unwrap();
        for r in &results {
            assert_eq!(r.illuminance_lux, 0.0);
            assert_eq!(r.ppfd_umol_m2_s, 0.0);
        }
    }

    #[test]
    fn occluder_casts_shadow() {
        let mut scene = free_space_scene(1000.0);
        // Patch between the light (z = 2) and the origin.
        let m = crate::scene::SurfaceMaterial::diffuse(0.0);
        scene.surfaces.push(crate::scene::Surface::new(
            [
                Vec3::new(-1.0, -1.0, 1.0),
                Vec3::new(1.0, -1.0, 1.0),
                Vec3::new(0.0, 1.5, 1.0),
            ],
            m,
        ));
        let mut engine = ReferenceRaytracer::new();
        engine.upload_scene(&scene).unwrap();
        let results = engine
            .run_simulation(&[Vec3::ZERO], &quick_params(32, 0))
            .unwrap();
        assert_eq!(results[0].illuminance_lux, 0.0);
    }

    #[test]
    fn statistics_before_any_run_is_no_results() {
        let engine = ReferenceRaytracer::new();
        assert!(matches!(
            engine.statistics(),
            Err(crate::error::EngineError::NoResults)
        ));
    }

    #[test]
    fn more_rays_tighten_the_estimate() {
        let mut scene = free_space_scene(1000.0);
        scene.bounds = Some(crate::scene::RoomBounds::uniform(
            Vec3::new(-2.0, -2.0, -0.5),
            Vec3::new(2.0, 2.0, 2.5),
            crate::scene::SurfaceMaterial::diffuse(0.5),
        ));

        // Spread of several low-sample runs should exceed the spread of
        // several high-sample runs (monotone convergence in expectation).
        let spread = |rays: u32| -> f32 {
            let estimates: Vec<f32> = (0..5)
                .map(|s| {
                    let params = SimulationParameters {
                        rays_per_point: rays,
                        max_bounces: 3,
                        seed: Some(100 + s),
                        ..Default::default()
                    };
                    let mut engine = ReferenceRaytracer::new();
                    engine.upload_scene(&scene).unwrap();
                    engine.run_simulation(&[Vec3::ZERO], &params).unwrap()[0].illuminance_lux
                })
                .collect();
            let mean = estimates.iter().sum::<f32>() / estimates.len() as f32;
            estimates
                .iter()
                .map(|e| (e - mean).abs())
                .fold(0.0, f32::max)
                / mean
        };

        assert!(spread(2000) < spread(20));
    }
}
