// src/scene/spectrum.rs
// Spectral power distributions, PAR/photon conversions and color metrics
// RELEVANT FILES: src/scene/mod.rs, src/stats.rs, src/engine/reference.rs

use serde::{Deserialize, Serialize};

/// Planck constant times speed of light, J·m. Used for photon energy
/// `E = hc / λ` when converting radiant power to photon flux.
pub const HC: f64 = 1.986_445_86e-25;

/// Avogadro constant, photons per micromole.
pub const AVOGADRO: f64 = 6.022_140_76e23;

/// Photosynthetically active radiation band, nm.
pub const PAR_BAND: (f32, f32) = (400.0, 700.0);

/// Relative spectral power distribution of an emitter: parallel ascending
/// wavelength and non-negative relative power arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralPowerDistribution {
    pub wavelengths_nm: Vec<f32>,
    pub powers: Vec<f32>,
}

/// One bin of a per-point spectral breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralBin {
    pub wavelength_nm: f32,
    pub power: f32,
}

impl SpectralPowerDistribution {
    pub fn new(wavelengths_nm: Vec<f32>, powers: Vec<f32>) -> Self {
        Self {
            wavelengths_nm,
            powers,
        }
    }

    /// Flat white spectrum across the PAR band at the given resolution.
    pub fn flat(resolution_nm: f32) -> Self {
        let mut wavelengths = Vec::new();
        let mut powers = Vec::new();
        let mut wl = PAR_BAND.0;
        while wl <= PAR_BAND.1 {
            wavelengths.push(wl);
            powers.push(1.0);
            wl += resolution_nm.max(1.0);
        }
        Self::new(wavelengths, powers)
    }

    pub fn total_power(&self) -> f32 {
        self.powers.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelengths_nm.is_empty()
    }

    /// Structural validity: parallel arrays, ascending wavelengths, finite
    /// non-negative powers. An all-zero spectrum is valid; it just never
    /// gets sampled.
    pub fn validate(&self) -> Result<(), String> {
        if self.wavelengths_nm.len() != self.powers.len() {
            return Err(format!(
                "spectrum arrays disagree in length ({} wavelengths, {} powers)",
                self.wavelengths_nm.len(),
                self.powers.len()
            ));
        }
        for pair in self.wavelengths_nm.windows(2) {
            if pair[1] <= pair[0] {
                return Err("spectrum wavelengths must be strictly ascending".into());
            }
        }
        for (&wl, &p) in self.wavelengths_nm.iter().zip(&self.powers) {
            if !wl.is_finite() || wl <= 0.0 {
                return Err(format!("non-finite or non-positive wavelength {wl}"));
            }
            if !p.is_finite() || p < 0.0 {
                return Err(format!("non-finite or negative spectral power {p}"));
            }
        }
        Ok(())
    }
}

/// Fraction of a binned spectrum's power that falls inside the PAR band.
/// Returns 0 for an empty or all-zero spectrum.
pub fn par_fraction(bins: &[SpectralBin]) -> f32 {
    let total: f32 = bins.iter().map(|b| b.power).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let par: f32 = bins
        .iter()
        .filter(|b| b.wavelength_nm >= PAR_BAND.0 && b.wavelength_nm <= PAR_BAND.1)
        .map(|b| b.power)
        .sum();
    par / total
}

/// Photon flux (µmol/s) carried by `watts` of radiant power at `wavelength_nm`.
pub fn photon_flux_umol(watts: f64, wavelength_nm: f64) -> f64 {
    if wavelength_nm <= 0.0 {
        return 0.0;
    }
    let photon_energy = HC / (wavelength_nm * 1e-9);
    watts / photon_energy / AVOGADRO * 1e6
}

/// Photon-content weight of a binned spectrum relative to a 555 nm
/// reference: photon count per unit power scales with λ (`E = hc/λ`), so a
/// red-rich spectrum delivers more photons per lux than a blue-rich one.
/// Returns 1 for an empty spectrum so callers can multiply unconditionally.
pub fn photon_weight(bins: &[SpectralBin]) -> f32 {
    const REFERENCE_NM: f64 = 555.0;
    let total: f64 = bins.iter().map(|b| b.power as f64).sum();
    if total <= 0.0 {
        return 1.0;
    }
    let flux: f64 = bins
        .iter()
        .map(|b| photon_flux_umol(b.power as f64, b.wavelength_nm as f64))
        .sum();
    let reference_flux = photon_flux_umol(total, REFERENCE_NM);
    (flux / reference_flux) as f32
}

// Gaussian fits to the CIE 1931 2° color matching functions (Wyman et al.).
// Adequate for correlated color temperature, not for colorimetry-grade work.
fn gaussian(x: f32, alpha: f32, mu: f32, sigma1: f32, sigma2: f32) -> f32 {
    let sigma = if x < mu { sigma1 } else { sigma2 };
    let t = (x - mu) / sigma;
    alpha * (-0.5 * t * t).exp()
}

fn cie_x(wl: f32) -> f32 {
    gaussian(wl, 1.056, 599.8, 37.9, 31.0) + gaussian(wl, 0.362, 442.0, 16.0, 26.7)
        - gaussian(wl, 0.065, 501.1, 20.4, 26.2)
}

fn cie_y(wl: f32) -> f32 {
    gaussian(wl, 0.821, 568.8, 46.9, 40.5) + gaussian(wl, 0.286, 530.9, 16.3, 31.1)
}

fn cie_z(wl: f32) -> f32 {
    gaussian(wl, 1.217, 437.0, 11.8, 36.0) + gaussian(wl, 0.681, 459.0, 26.0, 13.8)
}

/// Correlated color temperature in kelvin via McCamy's approximation.
/// Returns 0 for an empty or all-zero spectrum.
pub fn correlated_color_temperature(bins: &[SpectralBin]) -> f32 {
    let (mut x_sum, mut y_sum, mut z_sum) = (0.0f32, 0.0f32, 0.0f32);
    for b in bins {
        x_sum += b.power * cie_x(b.wavelength_nm);
        y_sum += b.power * cie_y(b.wavelength_nm);
        z_sum += b.power * cie_z(b.wavelength_nm);
    }
    let total = x_sum + y_sum + z_sum;
    if total <= 0.0 {
        return 0.0;
    }
    let x = x_sum / total;
    let y = y_sum / total;
    let n = (x - 0.3320) / (0.1858 - y);
    let cct = 449.0 * n * n * n + 3525.0 * n * n + 6823.3 * n + 5520.33;
    cct.max(0.0)
}

/// Spectral rendering index on a 0..100 scale.
///
/// This is a coverage heuristic, not CIE Ra: the PAR band is split into
/// eight sub-bands and the index rewards even power across them. A flat
/// spectrum scores 100, a monochromatic one scores near 0.
pub fn rendering_index(bins: &[SpectralBin]) -> f32 {
    const BANDS: usize = 8;
    let mut band_power = [0.0f32; BANDS];
    let width = (PAR_BAND.1 - PAR_BAND.0) / BANDS as f32;
    let mut total = 0.0f32;
    for b in bins {
        if b.wavelength_nm < PAR_BAND.0 || b.wavelength_nm > PAR_BAND.1 {
            continue;
        }
        let idx = (((b.wavelength_nm - PAR_BAND.0) / width) as usize).min(BANDS - 1);
        band_power[idx] += b.power;
        total += b.power;
    }
    if total <= 0.0 {
        return 0.0;
    }
    let mean = total / BANDS as f32;
    let variance =
        band_power.iter().map(|p| (p - mean) * (p - mean)).sum::<f32>() / BANDS as f32;
    let cv = variance.sqrt() / mean;
    // cv = 0 for a flat spectrum; sqrt(BANDS - 1) ≈ 2.65 for monochromatic.
    let worst = ((BANDS - 1) as f32).sqrt();
    (100.0 * (1.0 - cv / worst)).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_spectrum_validates() {
        let spd = SpectralPowerDistribution::flat(10.0);
        assert!(spd.validate().is_ok());
        assert!(spd.total_power() > 0.0);
    }

    #[test]
    fn mismatched_arrays_rejected() {
        let spd = SpectralPowerDistribution::new(vec![450.0, 550.0], vec![1.0]);
        assert!(spd.validate().is_err());
    }

    #[test]
    fn descending_wavelengths_rejected() {
        let spd = SpectralPowerDistribution::new(vec![550.0, 450.0], vec![1.0, 1.0]);
        assert!(spd.validate().is_err());
    }

    #[test]
    fn par_fraction_of_pure_par_spectrum_is_one() {
        let bins = vec![
            SpectralBin {
                wavelength_nm: 450.0,
                power: 1.0,
            },
            SpectralBin {
                wavelength_nm: 660.0,
                power: 2.0,
            },
        ];
        assert!((par_fraction(&bins) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn par_fraction_excludes_far_red() {
        let bins = vec![
            SpectralBin {
                wavelength_nm: 660.0,
                power: 1.0,
            },
            SpectralBin {
                wavelength_nm: 730.0,
                power: 1.0,
            },
        ];
        assert!((par_fraction(&bins) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn photon_flux_scales_with_wavelength() {
        // A red photon carries less energy than a blue one, so a watt of red
        // light is more photons.
        let blue = photon_flux_umol(1.0, 450.0);
        let red = photon_flux_umol(1.0, 660.0);
        assert!(red > blue);
        assert!((red / blue - 660.0 / 450.0).abs() < 1e-9);
    }

    #[test]
    fn photon_weight_favors_red_spectra() {
        let red = vec![SpectralBin {
            wavelength_nm: 660.0,
            power: 1.0,
        }];
        let blue = vec![SpectralBin {
            wavelength_nm: 450.0,
            power: 1.0,
        }];
        assert!(photon_weight(&red) > 1.0);
        assert!(photon_weight(&blue) < 1.0);
        assert_eq!(photon_weight(&[]), 1.0);
    }

    #[test]
    fn cct_of_flat_spectrum_is_plausible_white() {
        let bins: Vec<SpectralBin> = (400..=700)
            .step_by(5)
            .map(|wl| SpectralBin {
                wavelength_nm: wl as f32,
                power: 1.0,
            })
            .collect();
        let cct = correlated_color_temperature(&bins);
        assert!(
            (3000.0..9000.0).contains(&cct),
            "flat-spectrum CCT out of range: {cct}"
        );
    }

    #[test]
    fn rendering_index_flat_beats_monochromatic() {
        let flat: Vec<SpectralBin> = (400..=700)
            .step_by(5)
            .map(|wl| SpectralBin {
                wavelength_nm: wl as f32,
                power: 1.0,
            })
            .collect();
        let mono = vec![SpectralBin {
            wavelength_nm: 660.0,
            power: 10.0,
        }];
        assert!(rendering_index(&flat) > 95.0);
        assert!(rendering_index(&mono) < rendering_index(&flat));
    }

    #[test]
    fn empty_spectrum_metrics_are_zero() {
        assert_eq!(par_fraction(&[]), 0.0);
        assert_eq!(correlated_color_temperature(&[]), 0.0);
        assert_eq!(rendering_index(&[]), 0.0);
    }
}
