//! # Projection Module
//!
//! Lens models and the per-pixel lookup tables that re-project a fisheye
//! image onto a rectilinear one.
//!
//! ## Models
//!
//! - **Linear** (equidistant): image radius proportional to the ray angle
//! - **Equal-area**: preserves solid angle
//! - **Orthographic**: radius proportional to the sine of the ray angle
//! - **Stereographic**: preserves local shape
//!
//! ## Usage
//!
//! ```rust
//! use fisheye_dewarp::projection::{DewarpConfig, Layout, Projection, ProjectionMap};
//!
//! let config = DewarpConfig::new(Projection::Linear, Layout::Circular, 180.0, 120.0);
//! let map = ProjectionMap::build(config, 640, 480).unwrap();
//! assert_eq!(map.dimensions(), (640, 480));
//! ```

pub mod cache;
pub mod map;
pub mod model;

pub use cache::{MapCache, MapKey};
pub use map::{ProjectionMap, SourceCoord};
pub use model::{CropMargins, CropWindow, DewarpConfig, Layout, Projection};
