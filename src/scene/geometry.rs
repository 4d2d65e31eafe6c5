// src/scene/geometry.rs
// Ray type and intersection routines (triangle patches + room bounding box)
// RELEVANT FILES: src/scene/mod.rs, src/engine/reference.rs, src/shaders/pt_kernel.wgsl

use glam::Vec3;

use super::{Scene, Surface, SurfaceMaterial};

/// Parallel-ray rejection threshold for the triangle determinant.
pub const DET_EPSILON: f32 = 1e-8;

/// Offset applied along the normal when spawning secondary rays so a path
/// does not re-hit the surface it just left.
pub const SURFACE_BIAS: f32 = 1e-4;

/// A light-transport ray: origin, unit direction, the wavelength sampled for
/// this path and the throughput carried so far.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub wavelength_nm: f32,
    pub throughput: f32,
}

impl Ray {
    /// Get the point along the ray at parameter t
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// Nearest-hit record. `material` carries the reflectance of whatever was
/// struck, whether a triangulated patch or a room face.
#[derive(Debug, Clone, Copy)]
pub struct Hit {
    pub distance: f32,
    pub point: Vec3,
    pub normal: Vec3,
    pub material: SurfaceMaterial,
}

/// Möller–Trumbore ray–triangle intersection.
///
/// Returns the positive hit distance, or `None` when the ray is parallel to
/// the triangle (near-zero determinant), misses it, or the hit lies behind
/// the origin.
pub fn ray_triangle(origin: Vec3, direction: Vec3, surface: &Surface) -> Option<f32> {
    let [v0, v1, v2] = surface.vertices;
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;

    let pvec = direction.cross(edge2);
    let det = edge1.dot(pvec);
    if det.abs() < DET_EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;

    let tvec = origin - v0;
    let u = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let qvec = tvec.cross(edge1);
    let v = direction.dot(qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = edge2.dot(qvec) * inv_det;
    (t > SURFACE_BIAS).then_some(t)
}

/// Closed-form intersection of a ray starting inside the room with the six
/// bounding planes. Returns `(distance, inward_normal, face_index)` for the
/// nearest face crossed in the ray direction.
///
/// Face indices follow the packed-layout convention: 0 floor (min z),
/// 1 ceiling (max z), 2/3 walls at min/max x, 4/5 walls at min/max y.
pub fn ray_room(origin: Vec3, direction: Vec3, min: Vec3, max: Vec3) -> Option<(f32, Vec3, usize)> {
    let mut best: Option<(f32, Vec3, usize)> = None;

    let planes = [
        (min.z, Vec3::Z, 2usize, 0usize),
        (max.z, Vec3::NEG_Z, 2, 1),
        (min.x, Vec3::X, 0, 2),
        (max.x, Vec3::NEG_X, 0, 3),
        (min.y, Vec3::Y, 1, 4),
        (max.y, Vec3::NEG_Y, 1, 5),
    ];

    for (coord, normal, axis, face) in planes {
        let d = match axis {
            0 => direction.x,
            1 => direction.y,
            _ => direction.z,
        };
        if d.abs() < DET_EPSILON {
            continue;
        }
        let o = match axis {
            0 => origin.x,
            1 => origin.y,
            _ => origin.z,
        };
        let t = (coord - o) / d;
        if t <= SURFACE_BIAS {
            continue;
        }
        // Reject hits outside the face rectangle (ray may have already left
        // the box through another face).
        let p = origin + direction * t;
        let eps = 1e-3;
        let inside = p.x >= min.x - eps
            && p.x <= max.x + eps
            && p.y >= min.y - eps
            && p.y <= max.y + eps
            && p.z >= min.z - eps
            && p.z <= max.z + eps;
        if !inside {
            continue;
        }
        if best.map_or(true, |(bt, _, _)| t < bt) {
            best = Some((t, normal, face));
        }
    }
    best
}

/// Nearest intersection of a ray with the full scene: every triangulated
/// patch plus the room envelope. `None` means the ray escaped (possible only
/// for scenes with non-enclosing bounds, e.g. free-space test setups).
pub fn nearest_hit(scene: &Scene, origin: Vec3, direction: Vec3) -> Option<Hit> {
    let mut best: Option<Hit> = None;

    for surface in &scene.surfaces {
        if let Some(t) = ray_triangle(origin, direction, surface) {
            if best.map_or(true, |b| t < b.distance) {
                // Flip the normal to face the incoming ray.
                let normal = if surface.normal.dot(direction) > 0.0 {
                    -surface.normal
                } else {
                    surface.normal
                };
                best = Some(Hit {
                    distance: t,
                    point: origin + direction * t,
                    normal,
                    material: surface.material,
                });
            }
        }
    }

    if let Some(bounds) = &scene.bounds {
        if let Some((t, normal, face)) = ray_room(origin, direction, bounds.min, bounds.max) {
            if best.map_or(true, |b| t < b.distance) {
                best = Some(Hit {
                    distance: t,
                    point: origin + direction * t,
                    normal,
                    material: bounds.faces[face],
                });
            }
        }
    }

    best
}

/// Shadow test: is the segment from `point` to `target` free of occluding
/// patches? The room envelope never occludes two interior points.
pub fn visible(scene: &Scene, point: Vec3, target: Vec3) -> bool {
    let delta = target - point;
    let distance = delta.length();
    if distance < SURFACE_BIAS {
        return true;
    }
    let direction = delta / distance;
    for surface in &scene.surfaces {
        if let Some(t) = ray_triangle(point, direction, surface) {
            if t < distance - SURFACE_BIAS {
                return false;
            }
        }
    }
    true
}
