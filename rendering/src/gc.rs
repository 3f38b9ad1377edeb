use crate::arena::{SlotArena, SlotKey};
use crate::atlas::RegionTable;
use crate::database::SpriteDatabase;
use crate::settings::TextureSettings;
use crate::sprite::game_sprite::GameSprite;
use crate::sprite::image::ImageKey;
use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Floor for the software icon queue threshold.
pub const MIN_CLEAN_THRESHOLD: usize = 100;

/// Resident entries examined per sweep.
pub const GC_BATCH_SIZE: usize = 500;

const SOFTWARE_SWEEP_INTERVAL: u32 = 10;

/// Evictor for GPU residency, CPU-side dumps and software icons.
///
/// Resident images and sprites sit in slot arenas so eviction never shifts
/// another entry. Dumps and GPU copies are tracked in separate arenas and
/// expire on separate windows.
pub struct TextureGc {
    settings: TextureSettings,
    resident_images: SlotArena<ImageKey>,
    resident_sprites: SlotArena<u16>,
    resident_dumps: SlotArena<u32>,
    cleanup_list: VecDeque<u16>,
    cached_time: u64,
    last_clean: u64,
    passes: u32,
    cursor: usize,
}

impl TextureGc {
    pub fn new(settings: TextureSettings) -> Self {
        let mut gc = Self {
            settings,
            resident_images: SlotArena::new(),
            resident_sprites: SlotArena::new(),
            resident_dumps: SlotArena::new(),
            cleanup_list: VecDeque::new(),
            cached_time: 0,
            last_clean: 0,
            passes: 0,
            cursor: 0,
        };
        gc.update_time();
        gc.last_clean = gc.cached_time;
        gc
    }

    pub fn settings(&self) -> &TextureSettings {
        &self.settings
    }

    /// Caches the wall clock in seconds. Access stamps use the cached value.
    pub fn update_time(&mut self) {
        if let Ok(elapsed) = SystemTime::now().duration_since(UNIX_EPOCH) {
            self.cached_time = elapsed.as_secs();
        }
    }

    pub fn set_time(&mut self, now: u64) {
        self.cached_time = now;
    }

    pub fn now(&self) -> u64 {
        self.cached_time
    }

    /// GPU-resident images, normal and template.
    pub fn loaded_textures(&self) -> usize {
        self.resident_images.len()
    }

    pub fn resident_sprites(&self) -> usize {
        self.resident_sprites.len()
    }

    pub fn resident_dumps(&self) -> usize {
        self.resident_dumps.len()
    }

    pub fn cleanup_queue_len(&self) -> usize {
        self.cleanup_list.len()
    }

    pub(crate) fn register(&mut self, key: ImageKey) -> SlotKey {
        self.resident_images.insert(key)
    }

    pub(crate) fn release(&mut self, slot: SlotKey) {
        self.resident_images.remove(slot);
    }

    pub(crate) fn track_dump(&mut self, id: u32) -> SlotKey {
        self.resident_dumps.insert(id)
    }

    pub(crate) fn register_sprite(&mut self, sprite: &mut GameSprite) {
        if sprite.resident.is_none() {
            sprite.resident = Some(self.resident_sprites.insert(sprite.id));
        }
    }

    /// Unloads one image if it has been idle longer than `longevity`
    /// (the configured window when `None`). Unloading twice is a no-op.
    pub fn clean<A: RegionTable>(
        &mut self,
        db: &mut SpriteDatabase,
        atlas: &mut A,
        key: ImageKey,
        now: u64,
        longevity: Option<u64>,
    ) -> bool {
        let longevity = longevity.unwrap_or(self.settings.longevity_secs);
        let Some(residency) = db.residency_mut(key) else {
            return false;
        };
        if !residency.is_loaded() || now.saturating_sub(residency.last_access()) <= longevity {
            return false;
        }
        if let Some(slot) = residency.unload(atlas, key.id()) {
            self.resident_images.remove(slot);
        }
        true
    }

    /// Periodic sweep. Runs at most once per pulse; GPU eviction only kicks
    /// in above the resident threshold. Returns the number of images
    /// unloaded.
    pub fn garbage_collection<A: RegionTable>(
        &mut self,
        db: &mut SpriteDatabase,
        atlas: &mut A,
    ) -> usize {
        if !self.settings.texture_management {
            return 0;
        }
        let now = self.cached_time;
        if now.saturating_sub(self.last_clean) < self.settings.clean_pulse_secs {
            return 0;
        }
        self.last_clean = now;
        self.passes = self.passes.wrapping_add(1);

        let dumps = self.clean_dumps(db, now);

        let mut unloaded = 0;
        if self.resident_images.len() > self.settings.clean_threshold {
            unloaded = self.clean_images(db, atlas, now);
            self.clean_sprites(db);
        }

        if self.passes % SOFTWARE_SWEEP_INTERVAL == 0 {
            self.clean_software_sprites(db);
        }

        debug!(
            unloaded,
            dumps,
            resident = self.resident_images.len(),
            "Texture sweep"
        );
        unloaded
    }

    fn clean_images<A: RegionTable>(
        &mut self,
        db: &mut SpriteDatabase,
        atlas: &mut A,
        now: u64,
    ) -> usize {
        let batch: Vec<(SlotKey, ImageKey)> = self
            .resident_images
            .iter_from(self.cursor)
            .take(GC_BATCH_SIZE)
            .map(|(slot, key)| (slot, *key))
            .collect();
        let Some(&(last, _)) = batch.last() else {
            return 0;
        };
        self.cursor = last.index() as usize + 1;

        let mut unloaded = 0;
        for (slot, key) in batch {
            if db.residency(key).is_none() {
                trace!(id = key.id(), "Dropping orphaned resident entry");
                self.resident_images.remove(slot);
                continue;
            }
            if self.clean(db, atlas, key, now, None) {
                unloaded += 1;
            }
        }
        unloaded
    }

    /// Prunes unloaded templates and forgets sprites with none left.
    fn clean_sprites(&mut self, db: &mut SpriteDatabase) {
        let resident: Vec<(SlotKey, u16)> =
            self.resident_sprites.iter().map(|(slot, id)| (slot, *id)).collect();
        for (slot, id) in resident {
            let Some(sprite) = db.sprite_mut(id) else {
                self.resident_sprites.remove(slot);
                continue;
            };
            sprite.templates.retain(|t| t.is_loaded());
            if sprite.templates.is_empty() {
                sprite.resident = None;
                self.resident_sprites.remove(slot);
            }
        }
    }

    fn clean_dumps(&mut self, db: &mut SpriteDatabase, now: u64) -> usize {
        if db.is_memcached() {
            return 0;
        }
        let longevity = self.settings.dump_longevity_secs;
        let tracked: Vec<(SlotKey, u32)> =
            self.resident_dumps.iter().map(|(slot, id)| (slot, *id)).collect();

        let mut dropped = 0;
        for (slot, id) in tracked {
            match db.image_mut(id) {
                Some(image) => {
                    if let Some(freed) = image.clean_dump(now, longevity) {
                        self.resident_dumps.remove(freed);
                        dropped += 1;
                    }
                }
                None => {
                    self.resident_dumps.remove(slot);
                }
            }
        }
        dropped
    }

    /// Queues a sprite that just built a software icon. Once the queue
    /// passes its threshold the oldest entries lose their icons.
    pub fn add_sprite_to_cleanup(&mut self, id: u16, db: &mut SpriteDatabase) {
        self.cleanup_list.push_back(id);
        let threshold = MIN_CLEAN_THRESHOLD.max(self.settings.software_clean_threshold);
        if self.cleanup_list.len() <= threshold {
            return;
        }
        let count = self
            .cleanup_list
            .len()
            .min(self.settings.software_clean_size);
        for id in self.cleanup_list.drain(..count) {
            if let Some(sprite) = db.sprite_mut(id) {
                sprite.unload_icons();
            }
        }
        trace!(count, "Dropped software icons");
    }

    pub fn clean_software_sprites(&mut self, db: &mut SpriteDatabase) {
        for id in self.cleanup_list.drain(..) {
            if let Some(sprite) = db.sprite_mut(id) {
                sprite.unload_icons();
            }
        }
    }

    /// Unloads everything regardless of age.
    pub fn cleanup_all<A: RegionTable>(&mut self, db: &mut SpriteDatabase, atlas: &mut A) {
        let resident: Vec<ImageKey> = self.resident_images.iter().map(|(_, key)| *key).collect();
        for key in resident {
            if let Some(residency) = db.residency_mut(key) {
                residency.unload(atlas, key.id());
            }
        }
        for (_, id) in self.resident_sprites.iter() {
            if let Some(sprite) = db.sprite_mut(*id) {
                sprite.templates.clear();
                sprite.resident = None;
            }
        }
        self.clean_software_sprites(db);

        self.resident_images.clear();
        self.resident_sprites.clear();
        self.resident_dumps.clear();
        self.last_clean = self.cached_time;
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::TextureAtlas;
    use crate::sprite::game_sprite::IconSize;
    use formats::dat::{FrameGroup, SpriteDescriptor};

    fn settings() -> TextureSettings {
        TextureSettings {
            clean_pulse_secs: 10,
            longevity_secs: 20,
            clean_threshold: 0,
            dump_longevity_secs: 5,
            ..Default::default()
        }
    }

    fn database(sprites: u16) -> SpriteDatabase {
        let mut db = SpriteDatabase::new();
        for id in 100..100 + sprites {
            let group = FrameGroup {
                width: 1,
                height: 1,
                layers: 1,
                pattern_x: 1,
                pattern_y: 1,
                pattern_z: 1,
                frames: 1,
                sprite_ids: vec![id as u32],
                ..Default::default()
            };
            let descriptor = SpriteDescriptor {
                id,
                groups: vec![group],
                ..Default::default()
            };
            db.insert_sprite(GameSprite::from_descriptor(&descriptor));
        }
        db
    }

    fn load(gc: &mut TextureGc, db: &mut SpriteDatabase, atlas: &mut TextureAtlas, id: u32, now: u64) {
        let key = ImageKey::Normal(id);
        let region = atlas.add(id, 32, 32, &[0; 32 * 32 * 4]).unwrap();
        let slot = gc.register(key);
        let residency = db.residency_mut(key).unwrap();
        residency.set_loaded(region, slot);
        residency.touch(now);
    }

    #[test]
    fn test_clean_twice_is_noop() {
        let mut gc = TextureGc::new(settings());
        let mut db = database(1);
        let mut atlas = TextureAtlas::new(256, 1);
        load(&mut gc, &mut db, &mut atlas, 100, 0);

        let key = ImageKey::Normal(100);
        assert!(gc.clean(&mut db, &mut atlas, key, 30, None));
        let generation = db.image(100).unwrap().generation();
        assert_eq!(gc.loaded_textures(), 0);
        assert!(atlas.is_empty());

        assert!(!gc.clean(&mut db, &mut atlas, key, 30, None));
        assert_eq!(db.image(100).unwrap().generation(), generation);
        assert_eq!(gc.loaded_textures(), 0);
    }

    #[test]
    fn test_sweep_respects_pulse_and_longevity() {
        let mut gc = TextureGc::new(settings());
        let mut db = database(2);
        let mut atlas = TextureAtlas::new(256, 1);
        gc.last_clean = 0;
        load(&mut gc, &mut db, &mut atlas, 100, 0);
        load(&mut gc, &mut db, &mut atlas, 101, 15);

        gc.set_time(5);
        assert_eq!(gc.garbage_collection(&mut db, &mut atlas), 0, "inside the pulse");

        gc.set_time(25);
        assert_eq!(gc.garbage_collection(&mut db, &mut atlas), 1);
        assert!(!db.image(100).unwrap().is_loaded());
        assert!(db.image(101).unwrap().is_loaded());
        assert_eq!(gc.loaded_textures(), 1);
    }

    #[test]
    fn test_threshold_gates_gpu_eviction() {
        let mut gc = TextureGc::new(TextureSettings {
            clean_threshold: 5,
            ..settings()
        });
        let mut db = database(1);
        let mut atlas = TextureAtlas::new(256, 1);
        gc.last_clean = 0;
        load(&mut gc, &mut db, &mut atlas, 100, 0);

        gc.set_time(100);
        assert_eq!(gc.garbage_collection(&mut db, &mut atlas), 0);
        assert!(db.image(100).unwrap().is_loaded());
    }

    #[test]
    fn test_sweep_visits_one_batch_per_pulse() {
        let count = GC_BATCH_SIZE as u16 + 100;
        let mut gc = TextureGc::new(settings());
        let mut db = database(count);
        let mut atlas = TextureAtlas::new(2048, 1);
        gc.last_clean = 0;
        for id in 100..100 + count as u32 {
            load(&mut gc, &mut db, &mut atlas, id, 0);
        }

        gc.set_time(30);
        assert_eq!(gc.garbage_collection(&mut db, &mut atlas), GC_BATCH_SIZE);
        assert_eq!(gc.loaded_textures(), 100);
        assert!(db.image(100 + GC_BATCH_SIZE as u32).unwrap().is_loaded());

        gc.set_time(45);
        assert_eq!(gc.garbage_collection(&mut db, &mut atlas), 100);
        assert_eq!(gc.loaded_textures(), 0);
    }

    #[test]
    fn test_dump_window_separate_from_gpu() {
        let mut gc = TextureGc::new(settings());
        let mut db = database(1);
        let mut atlas = TextureAtlas::new(256, 1);
        gc.last_clean = 0;
        load(&mut gc, &mut db, &mut atlas, 100, 10);
        let image = db.image_mut(100).unwrap();
        image.set_dump(vec![0, 0, 0, 0], 10);
        image.dump_slot = Some(gc.track_dump(100));

        gc.set_time(20);
        gc.garbage_collection(&mut db, &mut atlas);
        let image = db.image(100).unwrap();
        assert!(!image.has_dump());
        assert!(image.is_loaded());
        assert_eq!(gc.resident_dumps(), 0);
    }

    #[test]
    fn test_software_queue_is_fifo() {
        let mut gc = TextureGc::new(TextureSettings {
            software_clean_threshold: 0,
            software_clean_size: 3,
            ..settings()
        });
        let mut db = database(MIN_CLEAN_THRESHOLD as u16 + 1);
        for id in 100..100 + MIN_CLEAN_THRESHOLD as u16 + 1 {
            db.sprite_mut(id).unwrap().set_icon(IconSize::Small, vec![0; 4]);
            gc.add_sprite_to_cleanup(id, &mut db);
        }

        assert_eq!(gc.cleanup_queue_len(), MIN_CLEAN_THRESHOLD + 1 - 3);
        assert!(!db.sprite(100).unwrap().has_icons());
        assert!(!db.sprite(102).unwrap().has_icons());
        assert!(db.sprite(103).unwrap().has_icons());
    }

    #[test]
    fn test_cleanup_all_unloads_everything() {
        let mut gc = TextureGc::new(settings());
        let mut db = database(3);
        let mut atlas = TextureAtlas::new(256, 1);
        let now = gc.now();
        for id in 100..103 {
            load(&mut gc, &mut db, &mut atlas, id, now);
        }
        gc.cleanup_all(&mut db, &mut atlas);
        assert_eq!(gc.loaded_textures(), 0);
        assert!(atlas.is_empty());
        assert!((100..103).all(|id| !db.image(id).unwrap().is_loaded()));
    }
}
