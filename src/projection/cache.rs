use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::projection::map::ProjectionMap;
use crate::projection::model::{CropMargins, DewarpConfig, Layout, Projection};

/// Hashable identity of a projection map
///
/// Floating-point parameters are compared by bit pattern, so two configs
/// share a map only when they are numerically identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapKey {
    projection: Projection,
    layout: Layout,
    source_fov: u64,
    target_fov: u64,
    rotation: u64,
    crop: CropMargins,
    width: u32,
    height: u32,
}

impl MapKey {
    pub fn new(config: &DewarpConfig, width: u32, height: u32) -> Self {
        Self {
            projection: config.projection,
            layout: config.layout,
            source_fov: config.source_fov.to_bits(),
            target_fov: config.target_fov.to_bits(),
            rotation: config.rotation.to_bits(),
            crop: config.crop,
            width,
            height,
        }
    }
}

/// Cache of built projection maps
///
/// Building a map costs a full pass of trigonometry over every pixel, while
/// a video never changes size or lens parameters mid-stream. The cache is
/// owned by one batch run, so every frame of a video (and every other video
/// with the same size) reuses one immutable map.
#[derive(Debug, Default)]
pub struct MapCache {
    maps: HashMap<MapKey, Arc<ProjectionMap>>,
    builds: usize,
    hits: usize,
}

impl MapCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the map for `(config, width, height)`, building it on first use
    pub fn get_or_build(
        &mut self,
        config: DewarpConfig,
        width: u32,
        height: u32,
    ) -> Result<Arc<ProjectionMap>> {
        let key = MapKey::new(&config, width, height);

        if let Some(map) = self.maps.get(&key) {
            self.hits += 1;
            return Ok(Arc::clone(map));
        }

        debug!(
            "Building {} / {} projection map for {}x{}",
            config.projection, config.layout, width, height
        );
        let map = Arc::new(ProjectionMap::build(config, width, height)?);
        self.builds += 1;
        self.maps.insert(key, Arc::clone(&map));
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Number of maps built so far
    pub fn builds(&self) -> usize {
        self.builds
    }

    /// Number of lookups served without building
    pub fn hits(&self) -> usize {
        self.hits
    }
}
