// src/scene/mod.rs
// Scene model: surfaces, room envelope, fixtures and the photometric
// emission model shared by both engines.
// RELEVANT FILES: src/scene/geometry.rs, src/scene/spectrum.rs, src/engine/layout.rs

pub mod geometry;
pub mod spectrum;

use std::f32::consts::PI;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
pub use geometry::{Hit, Ray};
pub use spectrum::{SpectralBin, SpectralPowerDistribution};

/// Reflection behavior of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfaceKind {
    Diffuse,
    Specular,
    Mixed,
}

impl SurfaceKind {
    /// Stable id used by the packed GPU layout.
    pub fn id(self) -> u32 {
        match self {
            SurfaceKind::Diffuse => 0,
            SurfaceKind::Specular => 1,
            SurfaceKind::Mixed => 2,
        }
    }

    pub fn from_id(id: u32) -> Self {
        match id {
            1 => SurfaceKind::Specular,
            2 => SurfaceKind::Mixed,
            _ => SurfaceKind::Diffuse,
        }
    }
}

/// Reflectance coefficients of a surface or room face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceMaterial {
    /// Diffuse reflectance in [0, 1]
    pub diffuse: f32,
    /// Specular reflectance in [0, 1]
    pub specular: f32,
    pub kind: SurfaceKind,
}

impl SurfaceMaterial {
    pub fn diffuse(reflectance: f32) -> Self {
        Self {
            diffuse: reflectance,
            specular: 0.0,
            kind: SurfaceKind::Diffuse,
        }
    }

    /// Combined reflectance multiplied into path throughput on a bounce.
    pub fn reflectance(&self) -> f32 {
        self.diffuse + self.specular
    }

    fn validate(&self, what: &str) -> Result<(), String> {
        for (name, v) in [("diffuse", self.diffuse), ("specular", self.specular)] {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(format!("{what}: {name} reflectance {v} outside [0, 1]"));
            }
        }
        // Energy conservation: a bounce must not amplify throughput.
        if self.diffuse + self.specular > 1.0 + 1e-6 {
            return Err(format!(
                "{what}: diffuse + specular = {} implies energy gain",
                self.diffuse + self.specular
            ));
        }
        Ok(())
    }
}

/// A triangulated reflective patch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    pub vertices: [Vec3; 3],
    /// Unit geometric normal
    pub normal: Vec3,
    pub material: SurfaceMaterial,
}

impl Surface {
    /// Build a surface, deriving the unit normal from the winding order.
    pub fn new(vertices: [Vec3; 3], material: SurfaceMaterial) -> Self {
        let normal = (vertices[1] - vertices[0])
            .cross(vertices[2] - vertices[0])
            .normalize_or_zero();
        Self {
            vertices,
            normal,
            material,
        }
    }

    pub fn area(&self) -> f32 {
        (self.vertices[1] - self.vertices[0])
            .cross(self.vertices[2] - self.vertices[0])
            .length()
            * 0.5
    }
}

/// Axis-aligned room envelope. Face order: floor (min z), ceiling (max z),
/// walls at min x, max x, min y, max y.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoomBounds {
    pub min: Vec3,
    pub max: Vec3,
    pub faces: [SurfaceMaterial; 6],
}

impl RoomBounds {
    /// Room with one reflectance on every face.
    pub fn uniform(min: Vec3, max: Vec3, material: SurfaceMaterial) -> Self {
        Self {
            min,
            max,
            faces: [material; 6],
        }
    }
}

/// An emissive fixture: position, aim direction, total intensity and beam
/// shape, plus its relative spectral power distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightSource {
    pub position: Vec3,
    /// Unit principal direction the fixture is aimed along
    pub direction: Vec3,
    /// Total emitted intensity, lumens
    pub intensity: f32,
    /// Full beam angle, degrees: full intensity inside half this angle
    pub beam_angle_deg: f32,
    /// Full field angle, degrees (≥ beam angle): zero intensity outside half
    /// this angle, quadratic falloff between
    pub field_angle_deg: f32,
    pub spectrum: SpectralPowerDistribution,
}

impl LightSource {
    /// Angular attenuation at `angle_rad` off the principal direction:
    /// 1 inside the half beam angle, quadratic falloff to 0 at the half
    /// field angle, 0 beyond.
    pub fn angular_attenuation(&self, angle_rad: f32) -> f32 {
        let half_beam = self.beam_angle_deg.to_radians() * 0.5;
        let half_field = self.field_angle_deg.to_radians() * 0.5;
        if angle_rad <= half_beam {
            1.0
        } else if angle_rad < half_field {
            let t = 1.0 - (angle_rad - half_beam) / (half_field - half_beam);
            t * t
        } else {
            0.0
        }
    }

    /// Unoccluded illuminance this fixture delivers at `point`: angular
    /// attenuation times inverse-square distance falloff.
    pub fn illuminance_at(&self, point: Vec3) -> f32 {
        let delta = point - self.position;
        let dist_sq = delta.length_squared();
        if dist_sq <= f32::EPSILON || self.intensity <= 0.0 {
            return 0.0;
        }
        let angle = self
            .direction
            .dot(delta / dist_sq.sqrt())
            .clamp(-1.0, 1.0)
            .acos();
        self.angular_attenuation(angle) * self.intensity / (4.0 * PI * dist_sq)
    }

    fn validate(&self, index: usize) -> Result<(), String> {
        let what = format!("light {index}");
        if !self.position.is_finite() {
            return Err(format!("{what}: non-finite position"));
        }
        if !self.direction.is_finite() || self.direction.length_squared() < 1e-6 {
            return Err(format!("{what}: degenerate direction"));
        }
        if !self.intensity.is_finite() || self.intensity < 0.0 {
            return Err(format!("{what}: intensity {} invalid", self.intensity));
        }
        if !self.beam_angle_deg.is_finite()
            || !self.field_angle_deg.is_finite()
            || self.beam_angle_deg <= 0.0
            || self.field_angle_deg < self.beam_angle_deg
        {
            return Err(format!(
                "{what}: beam/field angles {}/{} invalid (need 0 < beam <= field)",
                self.beam_angle_deg, self.field_angle_deg
            ));
        }
        self.spectrum.validate().map_err(|e| format!("{what}: {e}"))
    }
}

/// Caller-built scene: reflective patches, fixtures and an optional room
/// envelope. Never mutated by the engine; `bounds = None` models free space
/// (used by analytic validation setups).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Scene {
    pub surfaces: Vec<Surface>,
    pub lights: Vec<LightSource>,
    pub bounds: Option<RoomBounds>,
}

impl Scene {
    /// Validate geometry and photometry before any sampling begins.
    ///
    /// Degenerate input (NaN coordinates, zero-area patches, inverted
    /// bounds, energy-gaining materials) fails here with a descriptive
    /// error; the engines never start a simulation on an invalid scene.
    pub fn validate(&self) -> EngineResult<()> {
        for (i, s) in self.surfaces.iter().enumerate() {
            for v in &s.vertices {
                if !v.is_finite() {
                    return Err(EngineError::scene_validation(format!(
                        "surface {i}: non-finite vertex {v:?}"
                    )));
                }
            }
            if s.area() < 1e-9 {
                return Err(EngineError::scene_validation(format!(
                    "surface {i}: zero-area triangle"
                )));
            }
            if !s.normal.is_finite() || (s.normal.length() - 1.0).abs() > 1e-3 {
                return Err(EngineError::scene_validation(format!(
                    "surface {i}: normal is not unit length"
                )));
            }
            s.material
                .validate(&format!("surface {i}"))
                .map_err(EngineError::scene_validation)?;
        }

        if let Some(b) = &self.bounds {
            if !b.min.is_finite() || !b.max.is_finite() {
                return Err(EngineError::scene_validation("non-finite room bounds"));
            }
            if b.min.x >= b.max.x || b.min.y >= b.max.y || b.min.z >= b.max.z {
                return Err(EngineError::scene_validation(format!(
                    "inverted or empty room bounds {:?}..{:?}",
                    b.min, b.max
                )));
            }
            for (i, face) in b.faces.iter().enumerate() {
                face.validate(&format!("room face {i}"))
                    .map_err(EngineError::scene_validation)?;
            }
        }

        for (i, light) in self.lights.iter().enumerate() {
            light.validate(i).map_err(EngineError::scene_validation)?;
        }

        Ok(())
    }

    /// Sum of fixture intensities; zero means nothing in the scene emits.
    pub fn total_intensity(&self) -> f32 {
        self.lights.iter().map(|l| l.intensity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_light(intensity: f32) -> LightSource {
        LightSource {
            position: Vec3::new(0.0, 0.0, 3.0),
            direction: Vec3::NEG_Z,
            intensity,
            beam_angle_deg: 60.0,
            field_angle_deg: 90.0,
            spectrum: SpectralPowerDistribution::flat(10.0),
        }
    }

    #[test]
    fn angular_attenuation_full_inside_beam() {
        let light = test_light(1000.0);
        assert_eq!(light.angular_attenuation(0.0), 1.0);
        assert_eq!(light.angular_attenuation(29.0f32.to_radians()), 1.0);
    }

    #[test]
    fn angular_attenuation_zero_outside_field() {
        let light = test_light(1000.0);
        assert_eq!(light.angular_attenuation(46.0f32.to_radians()), 0.0);
        assert_eq!(light.angular_attenuation(PI), 0.0);
    }

    #[test]
    fn angular_attenuation_quadratic_between() {
        let light = test_light(1000.0);
        // Midway between half-beam (30°) and half-field (45°): t = 0.5.
        let a = light.angular_attenuation(37.5f32.to_radians());
        assert!((a - 0.25).abs() < 1e-4);
    }

    #[test]
    fn on_axis_illuminance_is_inverse_square() {
        let light = test_light(1000.0);
        let e = light.illuminance_at(Vec3::new(0.0, 0.0, 1.0));
        let expected = 1000.0 / (4.0 * PI * 4.0);
        assert!((e - expected).abs() / expected < 1e-5);
    }

    #[test]
    fn zero_intensity_contributes_nothing() {
        let light = test_light(0.0);
        assert_eq!(light.illuminance_at(Vec3::ZERO), 0.0);
    }

    #[test]
    fn nan_vertex_fails_validation() {
        let mut scene = Scene::default();
        scene.surfaces.push(Surface::new(
            [
                Vec3::new(f32::NAN, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            SurfaceMaterial::diffuse(0.5),
        ));
        assert!(matches!(
            scene.validate(),
            Err(crate::error::EngineError::SceneValidation(_))
        ));
    }

    #[test]
    fn zero_area_triangle_fails_validation() {
        let mut scene = Scene::default();
        let p = Vec3::new(1.0, 1.0, 1.0);
        scene
            .surfaces
            .push(Surface::new([p, p, p], SurfaceMaterial::diffuse(0.5)));
        assert!(scene.validate().is_err());
    }

    #[test]
    fn energy_gaining_material_fails_validation() {
        let mut scene = Scene::default();
        scene.surfaces.push(Surface::new(
            [
                Vec3::ZERO,
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            SurfaceMaterial {
                diffuse: 0.8,
                specular: 0.5,
                kind: SurfaceKind::Mixed,
            },
        ));
        assert!(scene.validate().is_err());
    }

    #[test]
    fn beam_wider_than_field_fails_validation() {
        let mut scene = Scene::default();
        let mut light = test_light(100.0);
        light.field_angle_deg = 30.0;
        scene.lights.push(light);
        assert!(scene.validate().is_err());
    }
}
