// src/engine/params.rs
// Simulation parameters and empirical calibration constants.
// RELEVANT FILES: src/engine/mod.rs, src/engine/reference.rs, src/engine/gpu.rs

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Paths traced per measurement point per progressive frame on the
/// accelerated engine; the frame budget is derived from the requested ray
/// count divided by this.
pub const SAMPLES_PER_FRAME: u32 = 16;

/// Frames between convergence checks on the accelerated engine.
pub const CONVERGENCE_CHECK_INTERVAL: u32 = 10;

/// Empirical photometric conversion factors. These are calibration data,
/// fixture-dependent and overridable by the caller; the defaults describe a
/// typical white horticultural LED.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// µmol·m⁻²·s⁻¹ per lux for the fixture family being simulated
    pub lux_to_ppfd: f32,
    /// Lumens per µmol·s⁻¹, the reverse conversion for reporting
    pub ppf_to_lumens: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            lux_to_ppfd: 0.015,
            ppf_to_lumens: 66.0,
        }
    }
}

/// Per-call simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParameters {
    /// Independent samples per measurement point, > 0
    pub rays_per_point: u32,
    /// Maximum indirect bounce depth; 0 = direct illumination only
    pub max_bounces: u32,
    /// Wavelength band simulated, nm (lo, hi)
    pub wavelength_range: (f32, f32),
    /// Bin width of the reported spectral breakdown, nm
    pub spectral_resolution_nm: f32,
    /// Early-stop threshold for the progressive accumulation loop, > 0
    pub convergence_threshold: f32,
    /// Pick wavelength-originating fixtures by intensity weight instead of
    /// uniformly
    pub importance_sampling: bool,
    /// Reserved: concentrate samples on slow-converging points
    pub adaptive_sampling: bool,
    /// Fixed RNG seed for reproducible runs; None draws system entropy
    pub seed: Option<u64>,
    pub calibration: Calibration,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            rays_per_point: 10_000,
            max_bounces: 3,
            wavelength_range: (380.0, 780.0),
            spectral_resolution_nm: 10.0,
            convergence_threshold: 1e-3,
            importance_sampling: true,
            adaptive_sampling: false,
            seed: None,
            calibration: Calibration::default(),
        }
    }
}

impl SimulationParameters {
    /// Reject unusable parameters before any sampling work starts.
    pub fn validate(&self) -> EngineResult<()> {
        if self.rays_per_point == 0 {
            return Err(EngineError::invalid_parameters("rays_per_point must be > 0"));
        }
        let (lo, hi) = self.wavelength_range;
        if !lo.is_finite() || !hi.is_finite() || lo <= 0.0 || hi <= lo {
            return Err(EngineError::invalid_parameters(format!(
                "wavelength range {lo}..{hi} is not a positive ascending band"
            )));
        }
        if !self.spectral_resolution_nm.is_finite() || self.spectral_resolution_nm <= 0.0 {
            return Err(EngineError::invalid_parameters(
                "spectral_resolution_nm must be > 0",
            ));
        }
        if !self.convergence_threshold.is_finite() || self.convergence_threshold <= 0.0 {
            return Err(EngineError::invalid_parameters(
                "convergence_threshold must be > 0",
            ));
        }
        if !self.calibration.lux_to_ppfd.is_finite() || self.calibration.lux_to_ppfd <= 0.0 {
            return Err(EngineError::invalid_parameters(
                "calibration.lux_to_ppfd must be > 0",
            ));
        }
        Ok(())
    }

    /// Progressive frames needed to reach the requested ray count.
    pub fn frame_budget(&self) -> u32 {
        self.rays_per_point.div_ceil(SAMPLES_PER_FRAME).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(SimulationParameters::default().validate().is_ok());
    }

    #[test]
    fn zero_rays_rejected() {
        let params = SimulationParameters {
            rays_per_point: 0,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(EngineError::InvalidParameters(_))
        ));
    }

    #[test]
    fn inverted_wavelength_range_rejected() {
        let params = SimulationParameters {
            wavelength_range: (700.0, 400.0),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn non_positive_threshold_rejected() {
        let params = SimulationParameters {
            convergence_threshold: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn frame_budget_covers_ray_count() {
        let params = SimulationParameters {
            rays_per_point: 100,
            ..Default::default()
        };
        assert_eq!(params.frame_budget(), 7);
        let one = SimulationParameters {
            rays_per_point: 1,
            ..Default::default()
        };
        assert_eq!(one.frame_budget(), 1);
    }

    #[test]
    fn params_round_trip_through_serde() {
        let params = SimulationParameters {
            seed: Some(42),
            ..Default::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: SimulationParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
    }
}
