use std::f64::consts::FRAC_PI_2;

use serde::{Deserialize, Serialize};

use crate::error::{ProjectionError, Result};

/// Fisheye lens projection model
///
/// Each model is a law relating the angle between an incoming ray and the
/// optical axis to the distance from the image center at which the ray lands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    /// `r ∝ sin(φ)`; cannot image rays beyond 90°
    Orthographic,
    /// `r ∝ sin(φ/2)`
    #[serde(alias = "equal-area", alias = "equal_area")]
    #[value(name = "equalarea", alias = "equal-area")]
    EqualArea,
    /// Equidistant, `r ∝ φ`
    #[serde(alias = "equidistant")]
    #[value(alias = "equidistant")]
    Linear,
    /// `r ∝ tan(φ/2)`
    #[default]
    Stereographic,
}

impl Projection {
    pub const ALL: [Projection; 4] = [
        Projection::Orthographic,
        Projection::EqualArea,
        Projection::Linear,
        Projection::Stereographic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Orthographic => "orthographic",
            Self::EqualArea => "equalarea",
            Self::Linear => "linear",
            Self::Stereographic => "stereographic",
        }
    }

    /// Distance from the image center, as a fraction of the image-circle
    /// radius, at which a ray `phi` radians off-axis lands on a lens whose
    /// half field of view is `half_fov` radians.
    ///
    /// The law is normalized so that `phi == half_fov` returns `1.0`
    /// (orthographic lenses saturate at 90°).
    pub fn radius_fraction(&self, phi: f64, half_fov: f64) -> f64 {
        match self {
            Self::Linear => phi / half_fov,
            Self::EqualArea => (phi / 2.0).sin() / (half_fov / 2.0).sin(),
            Self::Orthographic => phi.sin() / half_fov.min(FRAC_PI_2).sin(),
            Self::Stereographic => (phi / 2.0).tan() / (half_fov / 2.0).tan(),
        }
    }
}

impl std::fmt::Display for Projection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How the fisheye image sits on the sensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Image circle inscribed in the frame
    #[default]
    Circular,
    /// Fisheye content covers the whole rectangular sensor
    Fullframe,
}

impl Layout {
    /// Reference length of the layout in pixels: the image-circle diameter
    /// for `Circular`, the frame diagonal for `Fullframe`.
    pub fn reference_length(&self, width: u32, height: u32) -> f64 {
        match self {
            Self::Circular => width.min(height) as f64,
            Self::Fullframe => (width as f64).hypot(height as f64),
        }
    }
}

impl std::fmt::Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Circular => f.write_str("circular"),
            Self::Fullframe => f.write_str("fullframe"),
        }
    }
}

/// Pixels removed from each edge of the dewarped image before it is scaled
/// back to the source dimensions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CropMargins {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl CropMargins {
    pub fn new(left: u32, right: u32, top: u32, bottom: u32) -> Self {
        Self { left, right, top, bottom }
    }

    pub fn uniform(margin: u32) -> Self {
        Self::new(margin, margin, margin, margin)
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// The region of a `width` x `height` image that survives cropping, or
    /// `None` if the margins leave nothing.
    pub fn window(&self, width: u32, height: u32) -> Option<CropWindow> {
        let horizontal = self.left as u64 + self.right as u64;
        let vertical = self.top as u64 + self.bottom as u64;
        if horizontal >= width as u64 || vertical >= height as u64 {
            return None;
        }

        Some(CropWindow {
            x: self.left,
            y: self.top,
            width: width - self.left - self.right,
            height: height - self.top - self.bottom,
        })
    }
}

/// Rectangle kept after cropping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropWindow {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

/// Lens parameters for one dewarping run
///
/// Constructed once by the caller and passed by value into the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DewarpConfig {
    /// Projection model of the fisheye lens
    pub projection: Projection,

    /// Whether the fisheye image is a circle or fills the frame
    pub layout: Layout,

    /// Field of view captured by the lens, in degrees, (0, 360]
    pub source_fov: f64,

    /// Field of view shown in the rectilinear output, in degrees, (0, 180)
    pub target_fov: f64,

    /// In-plane rotation applied before re-projection, in radians
    pub rotation: f64,

    /// Edge margins removed from the dewarped image
    pub crop: CropMargins,
}

impl Default for DewarpConfig {
    fn default() -> Self {
        Self {
            projection: Projection::Stereographic,
            layout: Layout::Circular,
            source_fov: 180.0,
            target_fov: 120.0,
            rotation: 0.0,
            crop: CropMargins::default(),
        }
    }
}

impl DewarpConfig {
    pub fn new(projection: Projection, layout: Layout, source_fov: f64, target_fov: f64) -> Self {
        Self {
            projection,
            layout,
            source_fov,
            target_fov,
            ..Self::default()
        }
    }

    pub fn with_rotation(mut self, rotation: f64) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_crop(mut self, crop: CropMargins) -> Self {
        self.crop = crop;
        self
    }

    /// Check the parameters that do not depend on the frame size
    pub fn validate(&self) -> Result<()> {
        if !self.source_fov.is_finite() || self.source_fov <= 0.0 || self.source_fov > 360.0 {
            return Err(invalid(format!(
                "source field of view must be in (0, 360] degrees, got {}",
                self.source_fov
            )));
        }

        if !self.target_fov.is_finite() || self.target_fov <= 0.0 || self.target_fov >= 180.0 {
            return Err(invalid(format!(
                "target field of view must be in (0, 180) degrees, got {}",
                self.target_fov
            )));
        }

        if !self.rotation.is_finite() {
            return Err(invalid(format!("rotation must be finite, got {}", self.rotation)));
        }

        Ok(())
    }

    /// Check all parameters against a concrete frame size
    pub fn validate_for(&self, width: u32, height: u32) -> Result<()> {
        self.validate()?;

        if width == 0 || height == 0 {
            return Err(invalid(format!("frame size {}x{} is empty", width, height)));
        }

        if self.crop.window(width, height).is_none() {
            return Err(invalid(format!(
                "crop margins (left {}, right {}, top {}, bottom {}) leave nothing of a {}x{} frame",
                self.crop.left, self.crop.right, self.crop.top, self.crop.bottom, width, height
            )));
        }

        Ok(())
    }
}

fn invalid(details: String) -> crate::error::DewarpError {
    ProjectionError::InvalidConfig { details }.into()
}
