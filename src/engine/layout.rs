// src/engine/layout.rs
// Versioned struct-of-arrays schema for staging a scene on the device.
// Packing and unpacking are plain data transforms so the schema is testable
// without a GPU context.
// RELEVANT FILES: src/engine/gpu.rs, src/scene/mod.rs, src/shaders/pt_kernel.wgsl

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::scene::{LightSource, RoomBounds, Scene, SpectralPowerDistribution, Surface, SurfaceKind, SurfaceMaterial};

/// Schema version. Bump on any change to array meanings, strides or the
/// header; the WGSL kernel is written against exactly this version.
pub const LAYOUT_VERSION: u32 = 1;

/// Per-surface stride in the vertex array: v0, v1, v2.
pub const VERTS_PER_SURFACE: usize = 3;

/// Room face count (floor, ceiling, four walls).
pub const ROOM_FACES: usize = 6;

/// Fixed-size scene header uploaded as part of the uniform block.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SceneHeader {
    pub version: u32,
    pub surface_count: u32,
    pub light_count: u32,
    /// 1 when the scene has a room envelope, 0 for free space
    pub has_bounds: u32,
    /// Room minimum corner, w unused
    pub room_min: [f32; 4],
    /// Room maximum corner, w unused
    pub room_max: [f32; 4],
}

/// Host-side struct-of-arrays image of a scene, ready for buffer upload.
///
/// Layout v1, all arrays vec4-strided:
/// - `surface_vertices`: 3 × surface_count entries, xyz = vertex, w unused
/// - `surface_normals`:  surface_count entries, xyz = unit normal, w unused
/// - `surface_materials`: surface_count entries, x = diffuse, y = specular,
///   z = kind id, w unused
/// - `face_materials`: exactly 6 entries in room-face order, same encoding
/// - `light_positions`: light_count entries, xyz = position, w = intensity
/// - `light_directions`: light_count entries, xyz = unit direction, w unused
/// - `light_params`: light_count entries, x = half beam angle (rad),
///   y = half field angle (rad), z/w unused
///
/// Spectral power distributions stay host-side in v1: the kernel estimates
/// scalar illuminance, and wavelength histograms are synthesized during
/// readback decode.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedScene {
    pub header: SceneHeader,
    pub surface_vertices: Vec<[f32; 4]>,
    pub surface_normals: Vec<[f32; 4]>,
    pub surface_materials: Vec<[f32; 4]>,
    pub face_materials: [[f32; 4]; ROOM_FACES],
    pub light_positions: Vec<[f32; 4]>,
    pub light_directions: Vec<[f32; 4]>,
    pub light_params: Vec<[f32; 4]>,
}

fn vec4(v: Vec3, w: f32) -> [f32; 4] {
    [v.x, v.y, v.z, w]
}

fn material_vec4(m: &SurfaceMaterial) -> [f32; 4] {
    [m.diffuse, m.specular, m.kind.id() as f32, 0.0]
}

fn material_from_vec4(v: &[f32; 4]) -> SurfaceMaterial {
    SurfaceMaterial {
        diffuse: v[0],
        specular: v[1],
        kind: SurfaceKind::from_id(v[2] as u32),
    }
}

/// Pack a validated scene into the v1 layout.
pub fn pack(scene: &Scene) -> PackedScene {
    let mut surface_vertices = Vec::with_capacity(scene.surfaces.len() * VERTS_PER_SURFACE);
    let mut surface_normals = Vec::with_capacity(scene.surfaces.len());
    let mut surface_materials = Vec::with_capacity(scene.surfaces.len());
    for s in &scene.surfaces {
        for v in &s.vertices {
            surface_vertices.push(vec4(*v, 0.0));
        }
        surface_normals.push(vec4(s.normal, 0.0));
        surface_materials.push(material_vec4(&s.material));
    }

    let mut light_positions = Vec::with_capacity(scene.lights.len());
    let mut light_directions = Vec::with_capacity(scene.lights.len());
    let mut light_params = Vec::with_capacity(scene.lights.len());
    for l in &scene.lights {
        light_positions.push(vec4(l.position, l.intensity));
        light_directions.push(vec4(l.direction.normalize_or_zero(), 0.0));
        light_params.push([
            l.beam_angle_deg.to_radians() * 0.5,
            l.field_angle_deg.to_radians() * 0.5,
            0.0,
            0.0,
        ]);
    }

    let (room_min, room_max, face_materials, has_bounds) = match &scene.bounds {
        Some(b) => (
            vec4(b.min, 0.0),
            vec4(b.max, 0.0),
            std::array::from_fn(|i| material_vec4(&b.faces[i])),
            1,
        ),
        None => (
            [0.0; 4],
            [0.0; 4],
            [[0.0; 4]; ROOM_FACES],
            0,
        ),
    };

    PackedScene {
        header: SceneHeader {
            version: LAYOUT_VERSION,
            surface_count: scene.surfaces.len() as u32,
            light_count: scene.lights.len() as u32,
            has_bounds,
            room_min,
            room_max,
        },
        surface_vertices,
        surface_normals,
        surface_materials,
        face_materials,
        light_positions,
        light_directions,
        light_params,
    }
}

/// Rebuild a scene from its packed image. Spectra are not carried by layout
/// v1, so every light comes back with a flat placeholder spectrum; geometry
/// and photometric coefficients round-trip bit-exactly.
pub fn unpack(packed: &PackedScene) -> Scene {
    let n = packed.header.surface_count as usize;
    let surfaces = (0..n)
        .map(|i| {
            let base = i * VERTS_PER_SURFACE;
            let v = |j: usize| {
                let a = packed.surface_vertices[base + j];
                Vec3::new(a[0], a[1], a[2])
            };
            let nrm = packed.surface_normals[i];
            Surface {
                vertices: [v(0), v(1), v(2)],
                normal: Vec3::new(nrm[0], nrm[1], nrm[2]),
                material: material_from_vec4(&packed.surface_materials[i]),
            }
        })
        .collect();

    let lights = (0..packed.header.light_count as usize)
        .map(|i| {
            let p = packed.light_positions[i];
            let d = packed.light_directions[i];
            let a = packed.light_params[i];
            LightSource {
                position: Vec3::new(p[0], p[1], p[2]),
                direction: Vec3::new(d[0], d[1], d[2]),
                intensity: p[3],
                beam_angle_deg: (a[0] * 2.0).to_degrees(),
                field_angle_deg: (a[1] * 2.0).to_degrees(),
                spectrum: SpectralPowerDistribution::flat(10.0),
            }
        })
        .collect();

    let bounds = (packed.header.has_bounds == 1).then(|| RoomBounds {
        min: Vec3::new(
            packed.header.room_min[0],
            packed.header.room_min[1],
            packed.header.room_min[2],
        ),
        max: Vec3::new(
            packed.header.room_max[0],
            packed.header.room_max[1],
            packed.header.room_max[2],
        ),
        faces: std::array::from_fn(|i| material_from_vec4(&packed.face_materials[i])),
    });

    Scene {
        surfaces,
        lights,
        bounds,
    }
}

impl PackedScene {
    /// Device buffers reject zero-sized bindings; pad empty arrays with one
    /// zeroed element. The header counts remain authoritative.
    pub fn padded_bytes(array: &[[f32; 4]]) -> Vec<u8> {
        if array.is_empty() {
            bytemuck::bytes_of(&[0.0f32; 4]).to_vec()
        } else {
            bytemuck::cast_slice(array).to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SpectralPowerDistribution;

    fn sample_scene() -> Scene {
        Scene {
            surfaces: vec![Surface::new(
                [
                    Vec3::new(0.0, 0.0, 1.0),
                    Vec3::new(1.0, 0.0, 1.0),
                    Vec3::new(0.0, 1.0, 1.0),
                ],
                SurfaceMaterial {
                    diffuse: 0.4,
                    specular: 0.2,
                    kind: SurfaceKind::Mixed,
                },
            )],
            lights: vec![LightSource {
                position: Vec3::new(2.0, 3.0, 2.8),
                direction: Vec3::NEG_Z,
                intensity: 15_000.0,
                beam_angle_deg: 90.0,
                field_angle_deg: 120.0,
                spectrum: SpectralPowerDistribution::flat(10.0),
            }],
            bounds: Some(RoomBounds::uniform(
                Vec3::ZERO,
                Vec3::new(4.0, 6.0, 3.0),
                SurfaceMaterial::diffuse(0.7),
            )),
        }
    }

    #[test]
    fn header_counts_match_scene() {
        let packed = pack(&sample_scene());
        assert_eq!(packed.header.version, LAYOUT_VERSION);
        assert_eq!(packed.header.surface_count, 1);
        assert_eq!(packed.header.light_count, 1);
        assert_eq!(packed.header.has_bounds, 1);
        assert_eq!(packed.surface_vertices.len(), VERTS_PER_SURFACE);
    }

    #[test]
    fn geometry_round_trips_bit_exactly() {
        let scene = sample_scene();
        let back = unpack(&pack(&scene));

        assert_eq!(back.surfaces, scene.surfaces);
        assert_eq!(back.bounds, scene.bounds);
        for (a, b) in back.lights.iter().zip(&scene.lights) {
            assert_eq!(a.position, b.position);
            assert_eq!(a.direction, b.direction);
            assert_eq!(a.intensity, b.intensity);
            // Angles pass through radians; allow rounding at f32 precision.
            assert!((a.beam_angle_deg - b.beam_angle_deg).abs() < 1e-3);
            assert!((a.field_angle_deg - b.field_angle_deg).abs() < 1e-3);
        }
    }

    #[test]
    fn free_space_scene_packs_without_bounds() {
        let scene = Scene {
            bounds: None,
            ..sample_scene()
        };
        let packed = pack(&scene);
        assert_eq!(packed.header.has_bounds, 0);
        assert!(unpack(&packed).bounds.is_none());
    }

    #[test]
    fn empty_arrays_pad_to_one_element() {
        let scene = Scene::default();
        let packed = pack(&scene);
        assert_eq!(packed.header.surface_count, 0);
        let bytes = PackedScene::padded_bytes(&packed.surface_vertices);
        assert_eq!(bytes.len(), 16);
    }

    #[test]
    fn intensity_rides_in_position_w() {
        let packed = pack(&sample_scene());
        assert_eq!(packed.light_positions[0][3], 15_000.0);
    }
}
