// src/stats.rs
// Result set and the pure statistics layer: aggregate metrics, PAR
// integration and derived lighting-quality numbers.
// RELEVANT FILES: src/scene/spectrum.rs, src/engine/mod.rs, src/engine/params.rs

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::engine::params::SimulationParameters;
use crate::error::{EngineError, EngineResult};
use crate::scene::spectrum::{self, SpectralBin};
use crate::scene::Scene;

/// Per-measurement-point output of one simulation run. Immutable once the
/// run completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IlluminanceResult {
    pub position: Vec3,
    /// Scalar illuminance, lux
    pub illuminance_lux: f32,
    /// Photosynthetic photon flux density, µmol·m⁻²·s⁻¹
    pub ppfd_umol_m2_s: f32,
    /// Spectral breakdown across the simulated band
    pub spectrum: Vec<SpectralBin>,
    /// Correlated color temperature, kelvin (McCamy approximation)
    pub cct_kelvin: f32,
    /// Spectral coverage index, 0..100 (not CIE Ra)
    pub rendering_index: f32,
    /// min/mean ratio of the run this result belongs to
    pub uniformity: f32,
    /// Simplified unified-glare-style figure for this point
    pub glare_index: f32,
}

/// Aggregate metrics over one result set, plus how the run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationStatistics {
    pub min: f32,
    pub max: f32,
    pub average: f32,
    /// min / average; 1 exactly when every point measures the same value
    pub uniformity: f32,
    pub point_count: usize,
    /// Samples actually traced per point
    pub samples_per_point: u32,
    /// True when the progressive loop stopped on the convergence criterion
    /// rather than exhausting its frame budget (always false for the
    /// reference engine, which runs its full sample budget)
    pub converged_early: bool,
}

/// Min / max / mean / uniformity over per-point illuminances.
/// Pure function of the result values; no sampling happens here.
pub fn aggregate(illuminances: &[f32]) -> (f32, f32, f32, f32) {
    if illuminances.is_empty() {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut sum = 0.0f64;
    for &v in illuminances {
        min = min.min(v);
        max = max.max(v);
        sum += v as f64;
    }
    let mean = (sum / illuminances.len() as f64) as f32;
    let uniformity = if mean > 0.0 {
        (min / mean).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (min, max, mean, uniformity)
}

pub fn statistics_from_results(
    results: &[IlluminanceResult],
    samples_per_point: u32,
    converged_early: bool,
) -> EngineResult<SimulationStatistics> {
    if results.is_empty() {
        return Err(EngineError::NoResults);
    }
    let values: Vec<f32> = results.iter().map(|r| r.illuminance_lux).collect();
    let (min, max, average, uniformity) = aggregate(&values);
    Ok(SimulationStatistics {
        min,
        max,
        average,
        uniformity,
        point_count: results.len(),
        samples_per_point,
        converged_early,
    })
}

/// Simplified glare figure: ratio of the strongest unoccluded fixture
/// contribution to the total illuminance, log-compressed onto a UGR-like
/// scale. Not a CIE UGR computation; adequate for ranking points.
pub fn glare_index(scene: &Scene, point: Vec3, total_illuminance: f32) -> f32 {
    if total_illuminance <= 0.0 {
        return 0.0;
    }
    let peak = scene
        .lights
        .iter()
        .map(|l| l.illuminance_at(point))
        .fold(0.0f32, f32::max);
    if peak <= 0.0 {
        return 0.0;
    }
    (8.0 * (1.0 + peak * peak / total_illuminance).log10()).max(0.0)
}

/// Assemble the per-point result record from a finished estimate.
/// `uniformity` is patched in by the caller once the whole set is known.
pub fn build_result(
    scene: &Scene,
    params: &SimulationParameters,
    position: Vec3,
    illuminance_lux: f32,
    bins: Vec<SpectralBin>,
) -> IlluminanceResult {
    let par = spectrum::par_fraction(&bins);
    // Empirical lux→PPFD conversion, scaled by the photosynthetically
    // active share of the spectrum and its photon content (E = hc/λ).
    let ppfd = illuminance_lux
        * params.calibration.lux_to_ppfd
        * par.max(0.0)
        * spectrum::photon_weight(&bins);
    IlluminanceResult {
        position,
        illuminance_lux,
        ppfd_umol_m2_s: ppfd,
        cct_kelvin: spectrum::correlated_color_temperature(&bins),
        rendering_index: spectrum::rendering_index(&bins),
        uniformity: 0.0,
        glare_index: glare_index(scene, position, illuminance_lux),
        spectrum: bins,
    }
}

/// Histogram spacing for a spectral breakdown over `range` at `resolution`.
pub fn spectral_bins(range: (f32, f32), resolution_nm: f32) -> Vec<SpectralBin> {
    let (lo, hi) = range;
    let step = resolution_nm.max(1.0);
    let count = (((hi - lo) / step).ceil() as usize).max(1);
    (0..count)
        .map(|i| SpectralBin {
            wavelength_nm: lo + step * (i as f32 + 0.5),
            power: 0.0,
        })
        .collect()
}

/// Deposit `power` into the bin covering `wavelength_nm` (saturating to the
/// band edges).
pub fn deposit(bins: &mut [SpectralBin], range: (f32, f32), resolution_nm: f32, wavelength_nm: f32, power: f32) {
    if bins.is_empty() {
        return;
    }
    let step = resolution_nm.max(1.0);
    let idx = (((wavelength_nm - range.0) / step).floor() as isize)
        .clamp(0, bins.len() as isize - 1) as usize;
    bins[idx].power += power;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_of_equal_values_is_uniform() {
        let (min, max, mean, uniformity) = aggregate(&[5.0, 5.0, 5.0]);
        assert_eq!(min, 5.0);
        assert_eq!(max, 5.0);
        assert_eq!(mean, 5.0);
        assert_eq!(uniformity, 1.0);
    }

    #[test]
    fn aggregate_uniformity_bounded() {
        let (_, _, _, uniformity) = aggregate(&[0.0, 10.0, 20.0]);
        assert!((0.0..=1.0).contains(&uniformity));
        assert_eq!(uniformity, 0.0);
    }

    #[test]
    fn aggregate_all_dark_is_zero() {
        let (min, max, mean, uniformity) = aggregate(&[0.0, 0.0]);
        assert_eq!((min, max, mean, uniformity), (0.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn empty_result_set_is_no_results() {
        assert!(matches!(
            statistics_from_results(&[], 0, false),
            Err(EngineError::NoResults)
        ));
    }

    #[test]
    fn bins_cover_requested_band() {
        let bins = spectral_bins((400.0, 700.0), 10.0);
        assert_eq!(bins.len(), 30);
        assert!((bins[0].wavelength_nm - 405.0).abs() < 1e-4);
        assert!((bins[29].wavelength_nm - 695.0).abs() < 1e-4);
    }

    #[test]
    fn deposit_clamps_to_band_edges() {
        let range = (400.0, 700.0);
        let mut bins = spectral_bins(range, 10.0);
        deposit(&mut bins, range, 10.0, 399.0, 1.0);
        deposit(&mut bins, range, 10.0, 1000.0, 2.0);
        assert_eq!(bins[0].power, 1.0);
        assert_eq!(bins[29].power, 2.0);
    }

    #[test]
    fn glare_zero_in_dark_scene() {
        let scene = Scene::default();
        assert_eq!(glare_index(&scene, Vec3::ZERO, 0.0), 0.0);
    }
}
