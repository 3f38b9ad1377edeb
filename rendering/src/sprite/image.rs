use crate::arena::SlotKey;
use crate::atlas::{AtlasRegion, RegionTable};
use crate::sprite::outfit::OutfitColors;
use std::sync::atomic::{AtomicU32, Ordering};

/// First id handed to template images, above every real sprite id.
pub const TEMPLATE_ID_BASE: u32 = 0x0100_0000;

/// Identifies an image for residency tracking. Template images are owned by
/// their game sprite and reached through it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageKey {
    Normal(u32),
    Template { sprite: u16, id: u32 },
}

impl ImageKey {
    pub fn id(&self) -> u32 {
        match *self {
            ImageKey::Normal(id) => id,
            ImageKey::Template { id, .. } => id,
        }
    }
}

/// GPU residency shared by both image kinds.
///
/// `region` is only ever `Some` while `loaded` is true; every unload bumps
/// `generation`, which makes cached `(id, generation)` pairs detectably stale.
#[derive(Debug, Default)]
pub struct Residency {
    loaded: bool,
    region: Option<AtlasRegion>,
    generation: u32,
    last_access: u64,
    pub(crate) slot: Option<SlotKey>,
}

impl Residency {
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn region(&self) -> Option<&AtlasRegion> {
        self.region.as_ref()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn last_access(&self) -> u64 {
        self.last_access
    }

    pub fn touch(&mut self, now: u64) {
        self.last_access = now;
    }

    pub(crate) fn set_loaded(&mut self, region: AtlasRegion, slot: SlotKey) {
        self.loaded = true;
        self.region = Some(region);
        self.slot = Some(slot);
    }

    /// The region still belongs to `owner`; stale otherwise.
    pub(crate) fn valid_region<A: RegionTable>(&self, atlas: &A, owner: u32) -> Option<AtlasRegion> {
        let region = self.region.as_ref()?;
        atlas.is_owned_by(region, owner).then_some(*region)
    }

    /// Drops the mapping without touching the atlas, for regions that no
    /// longer belong to this image.
    pub(crate) fn clear_mapping(&mut self) -> Option<SlotKey> {
        if !self.loaded {
            return None;
        }
        self.loaded = false;
        self.region = None;
        self.generation = self.generation.wrapping_add(1);
        self.slot.take()
    }

    /// Releases the region and bumps the generation. Returns the resident
    /// slot to free, or `None` if nothing was loaded.
    pub(crate) fn unload<A: RegionTable>(&mut self, atlas: &mut A, owner: u32) -> Option<SlotKey> {
        if let Some(region) = self.region.as_ref() {
            if atlas.is_owned_by(region, owner) {
                atlas.remove(region);
            }
        }
        self.clear_mapping()
    }
}

/// Raw pixel source identified by its asset sprite id.
#[derive(Debug)]
pub struct NormalImage {
    pub id: u32,
    dump: Option<Vec<u8>>,
    dump_access: u64,
    pub(crate) dump_slot: Option<SlotKey>,
    pub(crate) residency: Residency,
}

impl NormalImage {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            dump: None,
            dump_access: 0,
            dump_slot: None,
            residency: Residency::default(),
        }
    }

    pub fn residency(&self) -> &Residency {
        &self.residency
    }

    pub fn is_loaded(&self) -> bool {
        self.residency.is_loaded()
    }

    pub fn generation(&self) -> u32 {
        self.residency.generation()
    }

    pub fn dump(&self) -> Option<&[u8]> {
        self.dump.as_deref()
    }

    pub fn size(&self) -> usize {
        self.dump.as_ref().map_or(0, Vec::len)
    }

    pub fn has_dump(&self) -> bool {
        self.dump.is_some()
    }

    pub(crate) fn set_dump(&mut self, dump: Vec<u8>, now: u64) {
        self.dump = Some(dump);
        self.dump_access = now;
    }

    pub(crate) fn touch_dump(&mut self, now: u64) {
        self.dump_access = now;
    }

    /// Drops the compressed dump once idle for longer than `longevity`.
    /// Independent of GPU residency. Returns the dump slot to free.
    pub(crate) fn clean_dump(&mut self, now: u64, longevity: u64) -> Option<SlotKey> {
        if self.dump.is_some() && now.saturating_sub(self.dump_access) > longevity {
            self.dump = None;
            return self.dump_slot.take();
        }
        None
    }
}

/// Outfit-colored derivative of a base/mask pair inside a game sprite.
#[derive(Debug)]
pub struct TemplateImage {
    pub id: u32,
    pub sprite_index: usize,
    pub colors: OutfitColors,
    pub(crate) residency: Residency,
}

impl TemplateImage {
    pub fn new(id: u32, sprite_index: usize, colors: OutfitColors) -> Self {
        Self {
            id,
            sprite_index,
            colors,
            residency: Residency::default(),
        }
    }

    pub fn residency(&self) -> &Residency {
        &self.residency
    }

    pub fn is_loaded(&self) -> bool {
        self.residency.is_loaded()
    }

    pub fn matches(&self, sprite_index: usize, colors: OutfitColors) -> bool {
        self.sprite_index == sprite_index && self.colors.hash() == colors.hash()
    }
}

/// Hands out template ids from their own namespace.
#[derive(Debug)]
pub struct TemplateIds(AtomicU32);

impl Default for TemplateIds {
    fn default() -> Self {
        Self(AtomicU32::new(TEMPLATE_ID_BASE))
    }
}

impl TemplateIds {
    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::SlotArena;
    use crate::atlas::TextureAtlas;

    fn loaded_image(atlas: &mut TextureAtlas, arena: &mut SlotArena<u32>) -> NormalImage {
        let mut image = NormalImage::new(5);
        let region = atlas.add(5, 32, 32, &[1; 32 * 32 * 4]).unwrap();
        let slot = arena.insert(5);
        image.residency.set_loaded(region, slot);
        image
    }

    #[test]
    fn test_unload_is_idempotent() {
        let mut atlas = TextureAtlas::new(128, 1);
        let mut arena = SlotArena::new();
        let mut image = loaded_image(&mut atlas, &mut arena);

        let slot = image.residency.unload(&mut atlas, 5).unwrap();
        assert!(arena.remove(slot).is_some());
        assert_eq!(image.generation(), 1);
        assert!(image.residency.region().is_none());
        assert!(atlas.is_empty());

        assert!(image.residency.unload(&mut atlas, 5).is_none());
        assert_eq!(image.generation(), 1, "second unload must not bump the generation");
    }

    #[test]
    fn test_stale_region_is_not_released() {
        let mut atlas = TextureAtlas::new(32, 1);
        let mut arena = SlotArena::new();
        let mut image = loaded_image(&mut atlas, &mut arena);

        // Someone else took over the slot behind this image's back.
        let region = *image.residency.region().unwrap();
        atlas.remove(&region);
        let other = atlas.add(9, 32, 32, &[2; 32 * 32 * 4]).unwrap();

        assert!(image.residency.valid_region(&atlas, 5).is_none());
        image.residency.unload(&mut atlas, 5);
        assert!(atlas.is_owned_by(&other, 9));
    }

    #[test]
    fn test_dump_window_is_separate() {
        let mut atlas = TextureAtlas::new(128, 1);
        let mut arena = SlotArena::new();
        let mut image = loaded_image(&mut atlas, &mut arena);
        image.set_dump(vec![1, 2, 3], 10);
        image.dump_slot = Some(arena.insert(5));

        assert!(image.clean_dump(14, 5).is_none());
        assert!(image.clean_dump(16, 5).is_some());
        assert!(!image.has_dump());
        assert!(image.is_loaded(), "dropping the dump keeps the GPU copy");
    }

    #[test]
    fn test_template_ids_are_offset() {
        let ids = TemplateIds::default();
        assert_eq!(ids.next(), TEMPLATE_ID_BASE);
        assert_eq!(ids.next(), TEMPLATE_ID_BASE + 1);
        assert_eq!(ImageKey::Template { sprite: 1, id: 7 }.id(), 7);
    }
}
