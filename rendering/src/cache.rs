use crate::atlas::{AtlasRegion, AtlasUpload, RegionTable, TextureAtlas};
use crate::database::SpriteDatabase;
use crate::gc::TextureGc;
use crate::preloader::SpritePreloader;
use crate::settings::TextureSettings;
use crate::sprite::game_sprite::{IconSize, SpriteCoords};
use crate::sprite::image::{ImageKey, TemplateIds, TemplateImage};
use crate::sprite::outfit::{self, Outfit, OutfitColors};
use formats::codec::{self, DecodeDiagnostics, SPRITE_PIXEL_COUNT, SPRITE_PIXELS};
use formats::dat::{DatCapabilities, DatFormat};
use formats::spr;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, warn};

const TILE: u32 = SPRITE_PIXELS as u32;

/// Solid magenta tile interned when pixel data is unavailable.
pub fn fallback_pixels() -> Vec<u8> {
    [0xff, 0x00, 0xff, 0xff].repeat(SPRITE_PIXEL_COUNT)
}

/// Owned entry point to the sprite pipeline: registry, atlas, evictor and
/// preload worker. Every method runs on the owner thread.
pub struct AssetCache<A: RegionTable = TextureAtlas> {
    db: SpriteDatabase,
    atlas: A,
    gc: TextureGc,
    preloader: SpritePreloader,
    template_ids: TemplateIds,
    diagnostics: Arc<DecodeDiagnostics>,
}

impl AssetCache<TextureAtlas> {
    pub fn new(settings: TextureSettings) -> anyhow::Result<Self> {
        let atlas = TextureAtlas::new(settings.atlas_size, settings.atlas_max_layers);
        Self::with_atlas(settings, atlas)
    }

    /// Drains the pixel uploads queued by the atlas.
    pub fn take_uploads(&mut self) -> Vec<AtlasUpload> {
        self.atlas.take_uploads()
    }
}

impl<A: RegionTable> AssetCache<A> {
    pub fn with_atlas(settings: TextureSettings, atlas: A) -> anyhow::Result<Self> {
        let diagnostics = Arc::new(DecodeDiagnostics::new());
        let preloader = SpritePreloader::new(diagnostics.clone(), settings.preload_queue_size)?;
        Ok(Self {
            db: SpriteDatabase::new(),
            atlas,
            gc: TextureGc::new(settings),
            preloader,
            template_ids: TemplateIds::default(),
            diagnostics,
        })
    }

    pub fn database(&self) -> &SpriteDatabase {
        &self.db
    }

    pub fn atlas(&self) -> &A {
        &self.atlas
    }

    pub fn gc(&self) -> &TextureGc {
        &self.gc
    }

    pub fn gc_mut(&mut self) -> &mut TextureGc {
        &mut self.gc
    }

    pub fn preloader(&self) -> &SpritePreloader {
        &self.preloader
    }

    pub fn diagnostics(&self) -> &DecodeDiagnostics {
        &self.diagnostics
    }

    pub fn load_editor_sprites(&mut self, directory: &Path, names: &[String]) -> usize {
        self.db.load_editor_sprites(directory, names)
    }

    pub fn load_sprite_metadata(
        &mut self,
        path: impl AsRef<Path>,
        format: DatFormat,
        capabilities: DatCapabilities,
    ) -> anyhow::Result<Vec<String>> {
        self.db.load_sprite_metadata(path, format, capabilities)
    }

    pub fn load_sprite_data(&mut self, path: impl AsRef<Path>) -> anyhow::Result<Vec<String>> {
        let memcached = self.gc.settings().memcached_sprites;
        self.db.load_sprite_data(path, memcached)
    }

    /// Drops every game sprite and image and cancels in-flight decodes.
    /// Editor sprites survive.
    pub fn clear(&mut self) {
        self.gc.cleanup_all(&mut self.db, &mut self.atlas);
        self.preloader.clear();
        self.db.clear();
    }

    /// Per-frame pump: applies finished decodes. Returns how many images
    /// were interned.
    pub fn update(&mut self) -> usize {
        let active = self.db.source.as_ref().map(|source| source.path.clone());
        let mut applied = 0;
        for decoded in self.preloader.update() {
            if active.as_deref() != Some(&*decoded.sprite_file) {
                debug!(id = decoded.id, "Dropping decode for an inactive sprite file");
                continue;
            }
            let Some(image) = self.db.image(decoded.id) else {
                continue;
            };
            if image.is_loaded() || image.generation() != decoded.generation {
                continue;
            }
            if self
                .intern(ImageKey::Normal(decoded.id), decoded.pixels)
                .is_some()
            {
                applied += 1;
            }
        }
        applied
    }

    pub fn update_time(&mut self) {
        self.gc.update_time();
    }

    pub fn garbage_collection(&mut self) -> usize {
        self.gc.garbage_collection(&mut self.db, &mut self.atlas)
    }

    /// Region for a sprite at the given coordinates, loading synchronously
    /// on a miss. `None` only when the sprite is unknown or the atlas is
    /// full.
    pub fn atlas_region(&mut self, sprite_id: u16, coords: &SpriteCoords) -> Option<AtlasRegion> {
        let now = self.gc.now();
        let sprite = self.db.sprite(sprite_id)?;
        let image_id = sprite.image_id(sprite.resolve_index(coords))?;
        let hit = if sprite.is_simple() {
            self.db
                .image(image_id)
                .and_then(|image| sprite.cached_region(image, &self.atlas))
        } else {
            None
        };
        if let Some(region) = hit {
            if let Some(image) = self.db.image_mut(image_id) {
                image.residency.touch(now);
            }
            return Some(region);
        }

        let region = self.ensure_normal(image_id)?;
        self.db.cache_simple_region(sprite_id, image_id, region);
        Some(region)
    }

    /// Region for one tile of an outfit. Multi-layer sprites go through the
    /// per-color template cache.
    pub fn outfit_region(
        &mut self,
        sprite_id: u16,
        x: usize,
        y: usize,
        direction: usize,
        addon: usize,
        pattern_z: usize,
        outfit: &Outfit,
        frame: usize,
    ) -> Option<AtlasRegion> {
        let sprite = self.db.sprite(sprite_id)?;
        let index = sprite.wrap_index(sprite.get_index(x, y, 0, direction, addon, pattern_z, frame));
        if sprite.layers > 1 {
            self.ensure_template(sprite_id, index, outfit.colors)
        } else {
            let image_id = sprite.image_id(index)?;
            self.ensure_normal(image_id)
        }
    }

    /// The template for a base index and outfit colors, created on first use.
    pub fn template_image(
        &mut self,
        sprite_id: u16,
        sprite_index: usize,
        outfit: &Outfit,
    ) -> Option<&TemplateImage> {
        let sprite = self.db.sprite_mut(sprite_id)?;
        let position = sprite.template_position(sprite_index, outfit.colors, &self.template_ids);
        self.gc.register_sprite(sprite);
        sprite.templates().get(position)
    }

    /// Queues an off-thread decode for one image. Best effort.
    pub fn request_load(&mut self, image_id: u32) -> bool {
        let Some(source) = self.db.source.as_ref() else {
            return false;
        };
        let Some(image) = self.db.image(image_id) else {
            return false;
        };
        if image.is_loaded() {
            return false;
        }
        self.preloader.request(image_id, image.generation(), source)
    }

    /// Queues every tile and layer of one frame. Returns the number of
    /// tasks queued.
    pub fn preload(
        &mut self,
        sprite_id: u16,
        pattern_x: usize,
        pattern_y: usize,
        pattern_z: usize,
        frame: usize,
    ) -> usize {
        let Some(source) = self.db.source.as_ref() else {
            return 0;
        };
        let Some(sprite) = self.db.sprite(sprite_id) else {
            return 0;
        };

        let mut queued = 0;
        for w in 0..sprite.width as usize {
            for h in 0..sprite.height as usize {
                for layer in 0..sprite.layers as usize {
                    let index = sprite.wrap_index(sprite.get_index(
                        w, h, layer, pattern_x, pattern_y, pattern_z, frame,
                    ));
                    let Some(image) = sprite.image_id(index).and_then(|id| self.db.image(id)) else {
                        continue;
                    };
                    if image.is_loaded() {
                        continue;
                    }
                    if self.preloader.request(image.id, image.generation(), source) {
                        queued += 1;
                    }
                }
            }
        }
        queued
    }

    /// Software icon composed from frame 0, cached on the sprite.
    pub fn sprite_icon(&mut self, sprite_id: u16, size: IconSize) -> Option<&[u8]> {
        let cached = self.db.sprite(sprite_id)?.icon(size).is_some();
        if !cached {
            let icon = self.compose_icon(sprite_id, size)?;
            self.db.sprite_mut(sprite_id)?.set_icon(size, icon);
            self.gc.add_sprite_to_cleanup(sprite_id, &mut self.db);
        }
        self.db.sprite(sprite_id)?.icon(size)
    }

    /// Decoded RGBA of one image, bypassing the atlas.
    pub fn image_rgba(&mut self, image_id: u32) -> Option<Vec<u8>> {
        if !self.ensure_dump(image_id) {
            return None;
        }
        let transparency = self.db.capabilities().transparency;
        let dump = self.db.image(image_id)?.dump()?;
        let decoded = codec::decode_rgba(dump, transparency, image_id);
        self.diagnostics.observe(image_id, &decoded.report);
        Some(decoded.pixels)
    }

    fn image_rgb(&mut self, image_id: u32) -> Option<Vec<u8>> {
        if !self.ensure_dump(image_id) {
            return None;
        }
        let transparency = self.db.capabilities().transparency;
        let dump = self.db.image(image_id)?.dump()?;
        Some(codec::decode_rgb(dump, transparency, image_id))
    }

    fn ensure_dump(&mut self, image_id: u32) -> bool {
        let now = self.gc.now();
        let source = self.db.source.clone();
        let memcached = self.db.is_memcached();
        let Some(image) = self.db.image_mut(image_id) else {
            return false;
        };
        if image.has_dump() {
            image.touch_dump(now);
            return true;
        }
        if memcached {
            // Absent from the preloaded file means an empty sprite.
            image.set_dump(Vec::new(), now);
            return true;
        }
        let Some(source) = source else {
            return false;
        };
        match spr::load_dump(source.path.as_path(), source.extended, image_id) {
            Ok(dump) => {
                image.set_dump(dump, now);
                image.dump_slot = Some(self.gc.track_dump(image_id));
                true
            }
            Err(e) => {
                warn!(id = image_id, "Failed to load sprite dump: {:#}", e);
                false
            }
        }
    }

    fn ensure_normal(&mut self, image_id: u32) -> Option<AtlasRegion> {
        let now = self.gc.now();
        let image = self.db.image_mut(image_id)?;
        image.residency.touch(now);
        if image.is_loaded() {
            if let Some(region) = image.residency.valid_region(&self.atlas, image_id) {
                return Some(region);
            }
            warn!(id = image_id, "Atlas region changed owner, reloading");
            if let Some(slot) = image.residency.clear_mapping() {
                self.gc.release(slot);
            }
        }

        let pixels = self.image_rgba(image_id).unwrap_or_else(|| {
            debug!(id = image_id, "Using fallback pixels");
            fallback_pixels()
        });
        self.intern(ImageKey::Normal(image_id), pixels)
    }

    fn ensure_template(
        &mut self,
        sprite_id: u16,
        sprite_index: usize,
        colors: OutfitColors,
    ) -> Option<AtlasRegion> {
        let now = self.gc.now();
        let sprite = self.db.sprite_mut(sprite_id)?;
        let position = sprite.template_position(sprite_index, colors, &self.template_ids);
        let template = &mut sprite.templates[position];
        let template_id = template.id;
        template.residency.touch(now);
        if template.is_loaded() {
            if let Some(region) = template.residency.valid_region(&self.atlas, template_id) {
                return Some(region);
            }
            warn!(id = template_id, "Template region changed owner, reloading");
            if let Some(slot) = template.residency.clear_mapping() {
                self.gc.release(slot);
            }
        }

        let pixels = self
            .template_pixels(sprite_id, sprite_index, colors)
            .unwrap_or_else(fallback_pixels);
        let region = self.intern(
            ImageKey::Template {
                sprite: sprite_id,
                id: template_id,
            },
            pixels,
        )?;
        if let Some(sprite) = self.db.sprite_mut(sprite_id) {
            self.gc.register_sprite(sprite);
        }
        Some(region)
    }

    /// Base tile recolored through the mask tile one `width * height` step
    /// further along the sprite list.
    fn template_pixels(
        &mut self,
        sprite_id: u16,
        sprite_index: usize,
        colors: OutfitColors,
    ) -> Option<Vec<u8>> {
        let sprite = self.db.sprite(sprite_id)?;
        let base_id = sprite.image_id(sprite_index)?;
        let mask_index = sprite_index + sprite.width as usize * sprite.height as usize;
        let mask_id = sprite.image_id(mask_index);

        let mut rgba = self.image_rgba(base_id)?;
        match mask_id.and_then(|id| self.image_rgb(id)) {
            Some(mask) => outfit::colorize(&mut rgba, &mask, SPRITE_PIXEL_COUNT, colors, true),
            None => warn!(sprite = sprite_id, mask_index, "Template mask missing"),
        }
        Some(rgba)
    }

    fn intern(&mut self, key: ImageKey, pixels: Vec<u8>) -> Option<AtlasRegion> {
        let now = self.gc.now();
        let Some(region) = self.atlas.add(key.id(), TILE, TILE, &pixels) else {
            error!(id = key.id(), "Failed to add sprite to atlas, atlas full?");
            return None;
        };
        let Some(residency) = self.db.residency_mut(key) else {
            self.atlas.remove(&region);
            return None;
        };
        let slot = self.gc.register(key);
        residency.set_loaded(region, slot);
        residency.touch(now);
        Some(region)
    }

    fn compose_icon(&mut self, sprite_id: u16, size: IconSize) -> Option<Vec<u8>> {
        let sprite = self.db.sprite(sprite_id)?;
        let (width, height) = (sprite.width.max(1) as usize, sprite.height.max(1) as usize);
        let tiles: Vec<(usize, usize, Option<u32>)> = (0..width)
            .flat_map(|w| (0..height).map(move |h| (w, h)))
            .map(|(w, h)| {
                let index = sprite.wrap_index(sprite.get_index(w, h, 0, 0, 0, 0, 0));
                (w, h, sprite.image_id(index))
            })
            .collect();

        let side = width.max(height) * SPRITE_PIXELS;
        let mut canvas = vec![0u8; side * side * 4];
        for (w, h, image_id) in tiles {
            let Some(pixels) = image_id.and_then(|id| self.image_rgba(id)) else {
                continue;
            };
            let left = (width - 1 - w) * SPRITE_PIXELS;
            let top = (height - 1 - h) * SPRITE_PIXELS;
            for row in 0..SPRITE_PIXELS {
                for col in 0..SPRITE_PIXELS {
                    let src = (row * SPRITE_PIXELS + col) * 4;
                    if pixels[src + 3] == 0 {
                        continue;
                    }
                    let dst = ((top + row) * side + left + col) * 4;
                    canvas[dst..dst + 4].copy_from_slice(&pixels[src..src + 4]);
                }
            }
        }

        let target = size.pixels() as usize;
        let mut icon = vec![0u8; target * target * 4];
        for y in 0..target {
            for x in 0..target {
                let src = ((y * side / target) * side + x * side / target) * 4;
                let dst = (y * target + x) * 4;
                icon[dst..dst + 4].copy_from_slice(&canvas[src..src + 4]);
            }
        }
        Some(icon)
    }
}
