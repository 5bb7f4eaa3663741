//! A small procedural scene: spheres on a ground sphere under a sky,
//! lit by one area light. Sphere silhouettes give hard edges and the soft
//! shadows give noise, so the adaptive schemes have something to chase.

use kiln_math::{Color, Vec3};
use kiln_renderer::PixelShader;
use rand::{Rng, RngCore};

struct Sphere {
    center: Vec3,
    radius: f32,
    albedo: Color,
}

impl Sphere {
    /// Nearest hit distance along a normalized ray, if any.
    fn hit(&self, origin: Vec3, dir: Vec3, t_min: f32) -> Option<f32> {
        let oc = self.center - origin;
        let h = dir.dot(oc);
        let c = oc.length_squared() - self.radius * self.radius;
        let discriminant = h * h - c;
        if discriminant < 0.0 {
            return None;
        }
        let sqrtd = discriminant.sqrt();
        [h - sqrtd, h + sqrtd].into_iter().find(|&t| t > t_min)
    }
}

pub struct SphereScene {
    width: f32,
    height: f32,
    eye: Vec3,
    spheres: Vec<Sphere>,
    light_center: Vec3,
    light_radius: f32,
}

impl SphereScene {
    pub fn new(width: u32, height: u32) -> Self {
        let spheres = vec![
            Sphere {
                center: Vec3::new(0.0, -1000.5, -1.0),
                radius: 1000.0,
                albedo: Color::new(0.5, 0.5, 0.5),
            },
            Sphere {
                center: Vec3::new(0.0, 0.0, -1.2),
                radius: 0.5,
                albedo: Color::new(0.1, 0.2, 0.5),
            },
            Sphere {
                center: Vec3::new(-1.0, 0.0, -1.0),
                radius: 0.5,
                albedo: Color::new(0.8, 0.8, 0.8),
            },
            Sphere {
                center: Vec3::new(1.0, -0.2, -0.9),
                radius: 0.3,
                albedo: Color::new(0.8, 0.6, 0.2),
            },
        ];
        Self {
            width: width as f32,
            height: height as f32,
            eye: Vec3::new(0.0, 0.2, 1.0),
            spheres,
            light_center: Vec3::new(2.0, 4.0, 1.0),
            light_radius: 1.5,
        }
    }

    fn closest(&self, origin: Vec3, dir: Vec3) -> Option<(f32, &Sphere)> {
        self.spheres
            .iter()
            .filter_map(|s| s.hit(origin, dir, 1e-3).map(|t| (t, s)))
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }

    fn sky(dir: Vec3) -> Color {
        let a = 0.5 * (dir.y + 1.0);
        (1.0 - a) * Color::ONE + a * Color::new(0.5, 0.7, 1.0)
    }
}

impl PixelShader for SphereScene {
    fn sample(&self, x: f32, y: f32, rng: &mut dyn RngCore) -> Color {
        // Pinhole camera with a 90 degree vertical field of view
        let aspect = self.width / self.height;
        let u = (2.0 * x / self.width - 1.0) * aspect;
        let v = 1.0 - 2.0 * y / self.height;
        let dir = (Vec3::new(u, v - 0.2, -1.0)).normalize();

        let Some((t, sphere)) = self.closest(self.eye, dir) else {
            return Self::sky(dir);
        };
        let p = self.eye + t * dir;
        let normal = (p - sphere.center) / sphere.radius;

        // One jittered point on the area light
        let jitter = Vec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        ) * self.light_radius;
        let to_light = self.light_center + jitter - p;
        let distance = to_light.length();
        let to_light = to_light / distance;

        let lambert = normal.dot(to_light).max(0.0);
        let shadowed = lambert > 0.0
            && self
                .closest(p, to_light)
                .is_some_and(|(t, _)| t < distance);
        let direct = if shadowed { 0.0 } else { lambert };

        sphere.albedo * (0.15 + 0.85 * direct)
    }
}
