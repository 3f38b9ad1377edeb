use etagere::{AllocId, AtlasAllocator, size2};
use glam::{UVec2, Vec4};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

/// Owner tag reported for regions that are no longer allocated.
pub const INVALID_OWNER: u32 = 0xFFFF_FFFE;

/// Handle to a packed region. Valid only while the table still reports the
/// same owner for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AtlasRegion {
    pub layer: u32,
    pub origin: UVec2,
    pub size: UVec2,
    pub owner: u32,
    alloc: u32,
}

impl AtlasRegion {
    /// Normalized `(u0, v0, u1, v1)` for a square layer of `atlas_size`.
    pub fn uv_rect(&self, atlas_size: u32) -> Vec4 {
        let scale = 1.0 / atlas_size as f32;
        let min = self.origin.as_vec2() * scale;
        let max = (self.origin + self.size).as_vec2() * scale;
        Vec4::new(min.x, min.y, max.x, max.y)
    }
}

/// Region ownership contract the sprite cache relies on. Packing and upload
/// are up to the implementation.
pub trait RegionTable {
    fn add(&mut self, owner: u32, width: u32, height: u32, rgba: &[u8]) -> Option<AtlasRegion>;

    /// Returns false when the region was already retired.
    fn remove(&mut self, region: &AtlasRegion) -> bool;

    /// Current owner of the region's slot, or [`INVALID_OWNER`].
    fn owner_of(&self, region: &AtlasRegion) -> u32;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_owned_by(&self, region: &AtlasRegion, owner: u32) -> bool {
        let current = self.owner_of(region);
        current != INVALID_OWNER && current == owner
    }
}

/// Pixels waiting to be copied into a layer of the GPU texture array.
pub struct AtlasUpload {
    pub layer: u32,
    pub origin: UVec2,
    pub size: UVec2,
    pub pixels: Vec<u8>,
}

pub struct TextureAtlas {
    layers: Vec<AtlasAllocator>,
    owners: FxHashMap<(u32, u32), u32>,
    uploads: Vec<AtlasUpload>,
    size: u32,
    max_layers: usize,
}

impl TextureAtlas {
    pub fn new(size: u32, max_layers: usize) -> Self {
        Self {
            layers: vec![AtlasAllocator::new(size2(size as i32, size as i32))],
            owners: FxHashMap::default(),
            uploads: Vec::new(),
            size,
            max_layers: max_layers.max(1),
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Drains the uploads queued since the last call.
    pub fn take_uploads(&mut self) -> Vec<AtlasUpload> {
        std::mem::take(&mut self.uploads)
    }

    fn allocate(&mut self, width: u32, height: u32) -> Option<(u32, etagere::Allocation)> {
        let size = size2(width as i32, height as i32);
        for (index, layer) in self.layers.iter_mut().enumerate() {
            if let Some(allocation) = layer.allocate(size) {
                return Some((index as u32, allocation));
            }
        }
        if self.layers.len() >= self.max_layers {
            return None;
        }
        let mut layer = AtlasAllocator::new(size2(self.size as i32, self.size as i32));
        let allocation = layer.allocate(size)?;
        self.layers.push(layer);
        debug!(layers = self.layers.len(), "Atlas grew a layer");
        Some((self.layers.len() as u32 - 1, allocation))
    }
}

impl RegionTable for TextureAtlas {
    fn add(&mut self, owner: u32, width: u32, height: u32, rgba: &[u8]) -> Option<AtlasRegion> {
        if rgba.len() != (width * height * 4) as usize {
            warn!(
                owner,
                width,
                height,
                len = rgba.len(),
                "Atlas upload size does not match region"
            );
            return None;
        }

        let (layer, allocation) = self.allocate(width, height)?;
        let origin = UVec2::new(
            allocation.rectangle.min.x as u32,
            allocation.rectangle.min.y as u32,
        );
        let size = UVec2::new(width, height);
        let alloc = allocation.id.serialize();
        self.owners.insert((layer, alloc), owner);
        self.uploads.push(AtlasUpload {
            layer,
            origin,
            size,
            pixels: rgba.to_vec(),
        });

        Some(AtlasRegion {
            layer,
            origin,
            size,
            owner,
            alloc,
        })
    }

    fn remove(&mut self, region: &AtlasRegion) -> bool {
        if self.owners.remove(&(region.layer, region.alloc)).is_none() {
            return false;
        }
        if let Some(layer) = self.layers.get_mut(region.layer as usize) {
            layer.deallocate(AllocId::deserialize(region.alloc));
        }
        true
    }

    fn owner_of(&self, region: &AtlasRegion) -> u32 {
        self.owners
            .get(&(region.layer, region.alloc))
            .copied()
            .unwrap_or(INVALID_OWNER)
    }

    fn len(&self) -> usize {
        self.owners.len()
    }
}
