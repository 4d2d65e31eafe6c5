// src/engine/readback.rs
// Blocking accumulation-buffer readback and decode into result records.
// RELEVANT FILES: src/engine/gpu.rs, src/stats.rs, src/engine/layout.rs

use glam::Vec3;

use crate::error::{EngineError, EngineResult};
use crate::scene::spectrum::SpectralBin;
use crate::scene::Scene;
use crate::stats::{build_result, deposit, spectral_bins, IlluminanceResult};

use super::params::SimulationParameters;

/// Copy `count` f32 accumulator slots from a device buffer into host memory.
///
/// Blocking: the orchestration thread stalls until the device drains
/// pending work. An async variant would be a non-breaking extension.
pub fn read_accumulator(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    accum: &wgpu::Buffer,
    count: usize,
) -> EngineResult<Vec<f32>> {
    let size = (count * std::mem::size_of::<f32>()) as wgpu::BufferAddress;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("luxtrace-readback-staging"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("luxtrace-readback-encoder"),
    });
    encoder.copy_buffer_to_buffer(accum, 0, &staging, 0, size);
    queue.submit(std::iter::once(encoder.finish()));
    device.poll(wgpu::Maintain::Wait);

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |res| {
        let _ = tx.send(res);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|_| EngineError::readback("map_async channel closed"))?
        .map_err(|e| EngineError::readback(format!("MapAsync failed: {e:?}")))?;

    let data = slice.get_mapped_range();
    let values: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();

    if values.len() != count {
        return Err(EngineError::readback(format!(
            "accumulator returned {} slots, expected {count}",
            values.len()
        )));
    }
    for (i, v) in values.iter().enumerate() {
        if !v.is_finite() {
            return Err(EngineError::readback(format!(
                "non-finite accumulator value at slot {i}"
            )));
        }
    }
    Ok(values)
}

/// Convergence metric between two accumulator snapshots: mean absolute
/// change relative to the current mean magnitude.
pub fn relative_delta(current: &[f32], previous: &[f32]) -> f32 {
    if current.is_empty() || current.len() != previous.len() {
        return f32::INFINITY;
    }
    let n = current.len() as f32;
    let mean_abs: f32 = current.iter().map(|v| v.abs()).sum::<f32>() / n;
    let mean_delta: f32 = current
        .iter()
        .zip(previous)
        .map(|(a, b)| (a - b).abs())
        .sum::<f32>()
        / n;
    if mean_abs <= f32::EPSILON {
        // An all-dark buffer that stays all-dark has converged.
        if mean_delta <= f32::EPSILON {
            0.0
        } else {
            f32::INFINITY
        }
    } else {
        mean_delta / mean_abs
    }
}

/// Expected wavelength histogram of the scene's emission, scaled to one
/// unit of illuminance. Layout v1 keeps spectra host-side, so the decode
/// synthesizes each point's breakdown from this shape; it equals the
/// expectation of the reference engine's sampled histogram, including its
/// fixture-selection mode (intensity-weighted with importance sampling,
/// uniform over emitting fixtures without).
fn emission_histogram(scene: &Scene, params: &SimulationParameters) -> Vec<SpectralBin> {
    let mut bins = spectral_bins(params.wavelength_range, params.spectral_resolution_nm);
    let weights: Vec<f32> = scene
        .lights
        .iter()
        .map(|l| {
            if l.intensity <= 0.0 || l.spectrum.total_power() <= 0.0 {
                0.0
            } else if params.importance_sampling {
                l.intensity
            } else {
                1.0
            }
        })
        .collect();
    let total_weight: f32 = weights.iter().sum();
    if total_weight <= 0.0 {
        return bins;
    }
    for (light, &weight) in scene.lights.iter().zip(&weights) {
        if weight <= 0.0 {
            continue;
        }
        let spd_total = light.spectrum.total_power();
        let fixture_weight = weight / total_weight;
        for (&wl, &p) in light
            .spectrum
            .wavelengths_nm
            .iter()
            .zip(&light.spectrum.powers)
        {
            deposit(
                &mut bins,
                params.wavelength_range,
                params.spectral_resolution_nm,
                wl,
                fixture_weight * p / spd_total,
            );
        }
    }
    bins
}

/// Decode a final accumulator snapshot into per-point results, identical in
/// shape to the reference engine's output.
pub fn decode_results(
    scene: &Scene,
    params: &SimulationParameters,
    points: &[Vec3],
    accumulator: &[f32],
) -> EngineResult<Vec<IlluminanceResult>> {
    if accumulator.len() != points.len() {
        return Err(EngineError::readback(format!(
            "accumulator has {} slots for {} points",
            accumulator.len(),
            points.len()
        )));
    }
    let shape = emission_histogram(scene, params);

    let mut results: Vec<IlluminanceResult> = points
        .iter()
        .zip(accumulator)
        .map(|(&p, &lux)| {
            let bins = shape
                .iter()
                .map(|b| SpectralBin {
                    wavelength_nm: b.wavelength_nm,
                    power: b.power * lux,
                })
                .collect();
            build_result(scene, params, p, lux, bins)
        })
        .collect();

    let values: Vec<f32> = results.iter().map(|r| r.illuminance_lux).collect();
    let (_, _, _, uniformity) = crate::stats::aggregate(&values);
    for r in &mut results {
        r.uniformity = uniformity;
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{LightSource, SpectralPowerDistribution};

    #[test]
    fn identical_snapshots_have_zero_delta() {
        let a = [1.0, 2.0, 3.0];
        assert_eq!(relative_delta(&a, &a), 0.0);
    }

    #[test]
    fn delta_scales_with_change() {
        let prev = [1.0, 1.0];
        let cur = [1.1, 0.9];
        let d = relative_delta(&cur, &prev);
        assert!((d - 0.1).abs() < 1e-6);
    }

    #[test]
    fn mismatched_lengths_never_converge() {
        assert_eq!(relative_delta(&[1.0], &[1.0, 2.0]), f32::INFINITY);
    }

    #[test]
    fn dark_stable_buffer_converges() {
        assert_eq!(relative_delta(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn decode_rejects_slot_mismatch() {
        let scene = Scene::default();
        let params = SimulationParameters::default();
        let points = [Vec3::ZERO];
        assert!(decode_results(&scene, &params, &points, &[1.0, 2.0]).is_err());
    }

    #[test]
    fn histogram_follows_fixture_selection_mode() {
        let narrow = |wavelength_nm: f32, intensity: f32| LightSource {
            position: Vec3::new(0.0, 0.0, 2.0),
            direction: Vec3::NEG_Z,
            intensity,
            beam_angle_deg: 120.0,
            field_angle_deg: 120.0,
            spectrum: SpectralPowerDistribution::new(vec![wavelength_nm], vec![1.0]),
        };
        let scene = Scene {
            lights: vec![narrow(450.0, 1_000.0), narrow(660.0, 3_000.0)],
            ..Default::default()
        };
        let blue_bin = |r: &crate::stats::IlluminanceResult| {
            r.spectrum
                .iter()
                .find(|b| (b.wavelength_nm - 455.0).abs() < 1.0)
                .map(|b| b.power)
                .unwrap_or(0.0)
        };

        // Intensity-weighted selection: the 3x brighter red fixture claims
        // three quarters of the histogram.
        let weighted = SimulationParameters {
            importance_sampling: true,
            ..Default::default()
        };
        let r = decode_results(&scene, &weighted, &[Vec3::ZERO], &[100.0]).unwrap();
        assert!((blue_bin(&r[0]) - 25.0).abs() < 1e-3);

        // Uniform selection: emitting fixtures split evenly.
        let uniform = SimulationParameters {
            importance_sampling: false,
            ..Default::default()
        };
        let r = decode_results(&scene, &uniform, &[Vec3::ZERO], &[100.0]).unwrap();
        assert!((blue_bin(&r[0]) - 50.0).abs() < 1e-3);
    }

    #[test]
    fn decode_scales_spectrum_to_illuminance() {
        let scene = Scene {
            lights: vec![LightSource {
                position: Vec3::new(0.0, 0.0, 2.0),
                direction: Vec3::NEG_Z,
                intensity: 1000.0,
                beam_angle_deg: 120.0,
                field_angle_deg: 120.0,
                spectrum: SpectralPowerDistribution::flat(10.0),
            }],
            ..Default::default()
        };
        let params = SimulationParameters::default();
        let results =
            decode_results(&scene, &params, &[Vec3::ZERO, Vec3::X], &[40.0, 20.0]).unwrap();
        let sum0: f32 = results[0].spectrum.iter().map(|b| b.power).sum();
        let sum1: f32 = results[1].spectrum.iter().map(|b| b.power).sum();
        assert!((sum0 - 40.0).abs() < 1e-3);
        assert!((sum1 - 20.0).abs() < 1e-3);
        assert_eq!(results[0].illuminance_lux, 40.0);
    }
}
