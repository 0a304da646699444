use rayon::prelude::*;

use crate::error::Result;
use crate::projection::model::{CropMargins, CropWindow, DewarpConfig, Layout, Projection};

/// Fractional source-pixel position, in pixel-index space (pixel centers sit
/// on integer coordinates)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceCoord {
    pub x: f32,
    pub y: f32,
}

/// Per-pixel lookup table from rectilinear output pixels to fisheye source
/// coordinates
///
/// Built once per `(DewarpConfig, width, height)` and never mutated. Entries
/// are `None` where the output pixel sees nothing of the fisheye image; those
/// pixels are rendered black.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionMap {
    width: u32,
    height: u32,
    crop: CropMargins,
    coords: Vec<Option<SourceCoord>>,
}

impl ProjectionMap {
    /// Build the map for frames of `width` x `height` pixels.
    ///
    /// Fails with `InvalidConfig` when the lens parameters are out of range or
    /// the crop margins swallow the whole frame.
    pub fn build(config: DewarpConfig, width: u32, height: u32) -> Result<Self> {
        config.validate_for(width, height)?;

        let lens = LensGeometry::new(&config, width, height);
        let mut coords = vec![None; width as usize * height as usize];

        coords
            .par_chunks_mut(width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, slot) in row.iter_mut().enumerate() {
                    *slot = lens.source_for(x as u32, y as u32);
                }
            });

        Ok(Self {
            width,
            height,
            crop: config.crop,
            coords,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn crop(&self) -> CropMargins {
        self.crop
    }

    /// Region of the map that survives cropping
    pub fn output_window(&self) -> CropWindow {
        // validate_for() guaranteed a non-empty window at build time
        self.crop.window(self.width, self.height).unwrap_or(CropWindow {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        })
    }

    /// Source coordinate for the output pixel at `(x, y)`
    pub fn get(&self, x: u32, y: u32) -> Option<SourceCoord> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.coords[y as usize * self.width as usize + x as usize]
    }

    /// Number of output pixels that receive a source coordinate
    pub fn coverage(&self) -> usize {
        self.coords.iter().filter(|c| c.is_some()).count()
    }
}

/// Precomputed constants for one map build
struct LensGeometry {
    projection: Projection,
    layout: Layout,
    width: f64,
    height: f64,
    center_x: f64,
    center_y: f64,
    /// Focal length of the rectilinear output, in pixels
    focal: f64,
    /// Image-circle radius of the fisheye source, in pixels
    radius: f64,
    half_fov: f64,
    cos_rot: f64,
    sin_rot: f64,
}

impl LensGeometry {
    fn new(config: &DewarpConfig, width: u32, height: u32) -> Self {
        let reference = config.layout.reference_length(width, height);
        let half_target = (config.target_fov / 2.0).to_radians();

        Self {
            projection: config.projection,
            layout: config.layout,
            width: width as f64,
            height: height as f64,
            center_x: width as f64 / 2.0,
            center_y: height as f64 / 2.0,
            focal: reference / (2.0 * half_target.tan()),
            radius: reference / 2.0,
            half_fov: (config.source_fov / 2.0).to_radians(),
            cos_rot: config.rotation.cos(),
            sin_rot: config.rotation.sin(),
        }
    }

    fn source_for(&self, x: u32, y: u32) -> Option<SourceCoord> {
        let dx = x as f64 + 0.5 - self.center_x;
        let dy = y as f64 + 0.5 - self.center_y;
        let rx = dx * self.cos_rot - dy * self.sin_rot;
        let ry = dx * self.sin_rot + dy * self.cos_rot;

        let r = rx.hypot(ry);
        if r == 0.0 {
            return Some(SourceCoord {
                x: (self.center_x - 0.5) as f32,
                y: (self.center_y - 0.5) as f32,
            });
        }

        let phi = (r / self.focal).atan();
        if phi > self.half_fov {
            return None;
        }

        let rho = self.radius * self.projection.radius_fraction(phi, self.half_fov);
        if !rho.is_finite() {
            return None;
        }
        if self.layout == Layout::Circular && rho > self.radius {
            return None;
        }

        let sx = self.center_x + rho * rx / r;
        let sy = self.center_y + rho * ry / r;
        if sx < 0.0 || sy < 0.0 || sx > self.width || sy > self.height {
            return None;
        }

        Some(SourceCoord {
            x: (sx - 0.5) as f32,
            y: (sy - 0.5) as f32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DewarpError, ProjectionError};

    fn all_configs() -> Vec<DewarpConfig> {
        let mut configs = Vec::new();
        for projection in Projection::ALL {
            for layout in [Layout::Circular, Layout::Fullframe] {
                configs.push(DewarpConfig::new(projection, layout, 180.0, 120.0));
            }
        }
        configs
    }

    #[test]
    fn test_build_is_deterministic() {
        for config in all_configs() {
            let config = config.with_rotation(-0.4);
            let first = ProjectionMap::build(config, 96, 64).unwrap();
            let second = ProjectionMap::build(config, 96, 64).unwrap();
            assert_eq!(first, second, "{} / {}", config.projection, config.layout);
        }
    }

    #[test]
    fn test_map_is_point_symmetric_without_rotation() {
        for config in all_configs() {
            let config = config.with_crop(CropMargins::uniform(4));
            let (w, h) = (80u32, 60u32);
            let map = ProjectionMap::build(config, w, h).unwrap();

            for y in 0..h {
                for x in 0..w {
                    let a = map.get(x, y);
                    let b = map.get(w - 1 - x, h - 1 - y);
                    match (a, b) {
                        (Some(a), Some(b)) => {
                            assert!((a.x + b.x - (w - 1) as f32).abs() < 1e-3);
                            assert!((a.y + b.y - (h - 1) as f32).abs() < 1e-3);
                        }
                        (None, None) => {}
                        _ => panic!(
                            "{} / {}: asymmetric sentinel at ({}, {})",
                            config.projection, config.layout, x, y
                        ),
                    }
                }
            }

            let window = map.output_window();
            assert_eq!(window.x, w - window.x - window.width);
            assert_eq!(window.y, h - window.y - window.height);
        }
    }

    #[test]
    fn test_coverage_grows_with_source_fov() {
        for projection in Projection::ALL {
            for layout in [Layout::Circular, Layout::Fullframe] {
                let mut previous = 0;
                let mut coverages = Vec::new();
                for fov in [90.0, 120.0, 150.0, 180.0, 220.0, 270.0, 360.0] {
                    let config = DewarpConfig::new(projection, layout, fov, 120.0);
                    let coverage = ProjectionMap::build(config, 64, 48).unwrap().coverage();
                    assert!(
                        coverage >= previous,
                        "{} / {}: coverage dropped from {} to {} at {} degrees",
                        projection, layout, previous, coverage, fov
                    );
                    previous = coverage;
                    coverages.push(coverage);
                }
                assert!(coverages[0] < *coverages.last().unwrap());
            }
        }
    }

    #[test]
    fn test_center_maps_to_center() {
        let map = ProjectionMap::build(DewarpConfig::default(), 65, 49).unwrap();
        let center = map.get(32, 24).unwrap();
        assert!((center.x - 32.0).abs() < 1e-4);
        assert!((center.y - 24.0).abs() < 1e-4);
    }

    #[test]
    fn test_linear_circular_radius_matches_equidistant_law() {
        // 180 degree lens: a ray near 45 degrees lands about halfway to the circle edge
        let config = DewarpConfig::new(Projection::Linear, Layout::Circular, 180.0, 90.0);
        let map = ProjectionMap::build(config, 201, 201).unwrap();

        // target 90 degrees gives a focal length of ~100 px
        let coord = map.get(200, 100).unwrap();
        let offset = coord.x - 100.0;
        assert!((offset - 50.0).abs() < 0.6, "offset {}", offset);
        assert!((coord.y - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_narrow_lens_leaves_black_rim() {
        let config = DewarpConfig::new(Projection::Linear, Layout::Circular, 60.0, 120.0);
        let map = ProjectionMap::build(config, 64, 48).unwrap();
        assert!(map.get(0, 0).is_none());
        assert!(map.get(32, 24).is_some());
        assert!(map.coverage() < 64 * 48);
    }

    #[test]
    fn test_rotation_turns_the_sampling_direction() {
        let base = DewarpConfig::new(Projection::Linear, Layout::Circular, 180.0, 120.0);
        let straight = ProjectionMap::build(base, 101, 101).unwrap();
        let turned =
            ProjectionMap::build(base.with_rotation(std::f64::consts::FRAC_PI_2), 101, 101).unwrap();

        // a quarter turn sends a point right of center to below center
        let s = straight.get(80, 50).unwrap();
        let t = turned.get(80, 50).unwrap();
        assert!((s.y - 50.0).abs() < 1e-3);
        assert!((t.x - 50.0).abs() < 1e-3);
        assert!(((t.y - 50.0) - (s.x - 50.0)).abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_crop_is_rejected() {
        let config = DewarpConfig::default().with_crop(CropMargins::new(400, 240, 0, 0));
        let err = ProjectionMap::build(config, 640, 480).unwrap_err();
        assert!(matches!(
            err,
            DewarpError::Projection(ProjectionError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_invalid_fov_is_rejected() {
        let mut config = DewarpConfig::default();
        config.target_fov = 0.0;
        assert!(ProjectionMap::build(config, 64, 48).is_err());

        let mut config = DewarpConfig::default();
        config.source_fov = -180.0;
        assert!(ProjectionMap::build(config, 64, 48).is_err());
    }
}
