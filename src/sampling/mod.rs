// src/sampling/mod.rs
// Random sampling primitives: seedable RNG plumbing, cosine-weighted
// hemisphere directions and the Russian-roulette termination rule.
// RELEVANT FILES: src/sampling/alias_table.rs, src/engine/reference.rs, src/shaders/pt_kernel.wgsl

pub mod alias_table;

use std::f32::consts::TAU;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::scene::{SurfaceKind, SurfaceMaterial};

pub use alias_table::{AliasEntry, AliasTable};

/// Bounces traced before Russian roulette may terminate a path.
pub const RR_WARMUP_BOUNCES: u32 = 2;

/// Lower clamp on the continuation probability so low-throughput paths keep
/// a bounded-variance chance of surviving.
pub const RR_MIN_PROBABILITY: f32 = 0.05;

/// Build the per-call RNG. Simulations are deterministic for a fixed seed;
/// absent a seed the generator is drawn from system entropy.
pub fn simulation_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

/// Deterministic sub-stream for one measurement point, so results do not
/// depend on point evaluation order (the reference engine fans points out
/// across threads).
pub fn point_rng(seed: Option<u64>, point_index: u64) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s ^ point_index.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        None => StdRng::from_entropy(),
    }
}

/// Orthonormal basis around a unit normal (Duff et al. branchless form).
pub fn basis_from_normal(n: Vec3) -> (Vec3, Vec3) {
    let sign = 1.0f32.copysign(n.z);
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    let tangent = Vec3::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x);
    let bitangent = Vec3::new(b, sign + n.y * n.y * a, -n.y);
    (tangent, bitangent)
}

/// Cosine-weighted direction in the hemisphere around `normal`.
pub fn cosine_hemisphere(normal: Vec3, rng: &mut StdRng) -> Vec3 {
    let u1: f32 = rng.gen();
    let u2: f32 = rng.gen();
    let r = u1.sqrt();
    let phi = TAU * u2;
    let local = Vec3::new(r * phi.cos(), r * phi.sin(), (1.0 - u1).max(0.0).sqrt());
    let (t, b) = basis_from_normal(normal);
    (t * local.x + b * local.y + normal * local.z).normalize()
}

/// Mirror reflection of an incoming direction about a surface normal.
pub fn specular_reflect(incoming: Vec3, normal: Vec3) -> Vec3 {
    incoming - normal * (2.0 * incoming.dot(normal))
}

/// Probability that a bounce off `material` takes the mirror lobe instead of
/// the diffuse one: 0 for diffuse surfaces, 1 for specular, the coefficient
/// share `specular / (diffuse + specular)` for mixed.
pub fn specular_probability(material: &SurfaceMaterial) -> f32 {
    match material.kind {
        SurfaceKind::Diffuse => 0.0,
        SurfaceKind::Specular => 1.0,
        SurfaceKind::Mixed => {
            let total = material.reflectance();
            if total > 0.0 {
                material.specular / total
            } else {
                0.0
            }
        }
    }
}

/// Outgoing direction for a bounce off `material`: one lobe of the
/// diffuse/specular mix, chosen with probability proportional to the
/// coefficients. Selecting the lobe by its share of the total reflectance
/// keeps the one-sample estimator unbiased when throughput is multiplied by
/// `diffuse + specular`.
pub fn bounce_direction(
    material: &SurfaceMaterial,
    incoming: Vec3,
    normal: Vec3,
    rng: &mut StdRng,
) -> Vec3 {
    let p = specular_probability(material);
    if p > 0.0 && rng.gen::<f32>() < p {
        specular_reflect(incoming, normal)
    } else {
        cosine_hemisphere(normal, rng)
    }
}

/// Russian-roulette verdict for a path at `bounce` carrying `throughput`.
///
/// Survivors return the renormalization factor `1/p` keeping the estimator
/// unbiased; `None` terminates the path.
pub fn russian_roulette(bounce: u32, throughput: f32, rng: &mut StdRng) -> Option<f32> {
    if bounce < RR_WARMUP_BOUNCES {
        return Some(1.0);
    }
    let p = throughput.clamp(RR_MIN_PROBABILITY, 1.0);
    if rng.gen::<f32>() < p {
        Some(1.0 / p)
    } else {
        None
    }
}

/// Solid-angle-uniform check value used in tests: expected mean cosine of a
/// cosine-weighted hemisphere is 2/3.
#[cfg(test)]
pub const EXPECTED_MEAN_COSINE: f32 = 2.0 / 3.0;
