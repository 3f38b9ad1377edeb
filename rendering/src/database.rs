use crate::atlas::AtlasRegion;
use crate::sprite::editor::EditorSprite;
use crate::sprite::game_sprite::GameSprite;
use crate::sprite::image::{ImageKey, NormalImage, Residency};
use anyhow::{Context, bail};
use formats::dat::{DatCapabilities, DatFormat, MetadataFile};
use formats::spr::{self, SpriteDataFile};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The pixel-dump file currently backing the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpriteSource {
    pub path: Arc<PathBuf>,
    pub extended: bool,
    pub transparency: bool,
}

/// Id-indexed registry of game sprites, their images and the editor-only
/// sprites. Only the owner thread touches it.
#[derive(Default)]
pub struct SpriteDatabase {
    pub(crate) sprites: Vec<Option<GameSprite>>,
    pub(crate) images: Vec<Option<NormalImage>>,
    editor_sprites: BTreeMap<i32, EditorSprite>,
    item_count: u16,
    creature_count: u16,
    format: DatFormat,
    capabilities: DatCapabilities,
    pub(crate) source: Option<SpriteSource>,
    memcached: bool,
}

impl SpriteDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item_count(&self) -> u16 {
        self.item_count
    }

    pub fn creature_count(&self) -> u16 {
        self.creature_count
    }

    pub fn format(&self) -> DatFormat {
        self.format
    }

    pub fn capabilities(&self) -> DatCapabilities {
        self.capabilities
    }

    pub fn source(&self) -> Option<&SpriteSource> {
        self.source.as_ref()
    }

    pub fn is_memcached(&self) -> bool {
        self.memcached
    }

    pub fn sprite_count(&self) -> usize {
        self.sprites.iter().flatten().count()
    }

    pub fn image_count(&self) -> usize {
        self.images.iter().flatten().count()
    }

    /// Highest sprite id held by the registry.
    pub fn max_sprite_id(&self) -> u16 {
        self.sprites.len().saturating_sub(1) as u16
    }

    pub fn sprite(&self, id: u16) -> Option<&GameSprite> {
        self.sprites.get(id as usize)?.as_ref()
    }

    pub fn sprite_mut(&mut self, id: u16) -> Option<&mut GameSprite> {
        self.sprites.get_mut(id as usize)?.as_mut()
    }

    /// Creature ids are numbered after the items.
    pub fn creature_sprite(&self, id: u16) -> Option<&GameSprite> {
        self.sprite(id.checked_add(self.item_count)?)
    }

    pub fn image(&self, id: u32) -> Option<&NormalImage> {
        self.images.get(id as usize)?.as_ref()
    }

    pub fn image_mut(&mut self, id: u32) -> Option<&mut NormalImage> {
        self.images.get_mut(id as usize)?.as_mut()
    }

    pub fn editor_sprite(&self, id: i32) -> Option<&EditorSprite> {
        self.editor_sprites.get(&id)
    }

    pub fn editor_sprite_count(&self) -> usize {
        self.editor_sprites.len()
    }

    pub fn insert_sprite(&mut self, sprite: GameSprite) {
        let id = sprite.id as usize;
        if self.sprites.len() <= id {
            self.sprites.resize_with(id + 1, || None);
        }
        for &image_id in sprite.sprite_ids() {
            self.ensure_image(image_id);
        }
        self.sprites[id] = Some(sprite);
    }

    /// Editor sprites live under negative ids.
    pub fn insert_editor_sprite(&mut self, id: i32, sprite: EditorSprite) -> anyhow::Result<()> {
        if id >= 0 {
            bail!("editor sprite id {} must be negative", id);
        }
        self.editor_sprites.insert(id, sprite);
        Ok(())
    }

    fn ensure_image(&mut self, id: u32) {
        let slot = id as usize;
        if self.images.len() <= slot {
            self.images.resize_with(slot + 1, || None);
        }
        if self.images[slot].is_none() {
            self.images[slot] = Some(NormalImage::new(id));
        }
    }

    pub(crate) fn residency(&self, key: ImageKey) -> Option<&Residency> {
        match key {
            ImageKey::Normal(id) => self.image(id).map(NormalImage::residency),
            ImageKey::Template { sprite, id } => self
                .sprite(sprite)?
                .templates()
                .iter()
                .find(|t| t.id == id)
                .map(|t| t.residency()),
        }
    }

    pub(crate) fn residency_mut(&mut self, key: ImageKey) -> Option<&mut Residency> {
        match key {
            ImageKey::Normal(id) => self.image_mut(id).map(|image| &mut image.residency),
            ImageKey::Template { sprite, id } => self
                .sprite_mut(sprite)?
                .template_mut(id)
                .map(|t| &mut t.residency),
        }
    }

    pub(crate) fn cache_simple_region(&mut self, sprite_id: u16, image_id: u32, region: AtlasRegion) {
        let Some(image) = self.images.get(image_id as usize).and_then(Option::as_ref) else {
            return;
        };
        if let Some(Some(sprite)) = self.sprites.get_mut(sprite_id as usize) {
            sprite.cache_region(image, region);
        }
    }

    /// Builds game sprites from parsed metadata. Images are created on
    /// first reference.
    pub fn load_metadata(&mut self, metadata: &MetadataFile) {
        self.item_count = metadata.item_count;
        self.creature_count = metadata.creature_count;
        self.format = metadata.format;
        self.capabilities = metadata.capabilities;

        self.sprites = Vec::with_capacity(metadata.max_id() as usize + 1);
        for descriptor in &metadata.descriptors {
            self.insert_sprite(GameSprite::from_descriptor(descriptor));
        }
        info!(
            items = self.item_count,
            creatures = self.creature_count,
            images = self.image_count(),
            "Sprite metadata loaded"
        );
    }

    pub fn load_sprite_metadata(
        &mut self,
        path: impl AsRef<Path>,
        format: DatFormat,
        capabilities: DatCapabilities,
    ) -> anyhow::Result<Vec<String>> {
        let path = path.as_ref();
        let metadata = MetadataFile::open(path, format, capabilities)
            .with_context(|| format!("Failed to load metadata {}", path.display()))?;
        self.load_metadata(&metadata);
        Ok(metadata.warnings)
    }

    /// Points the registry at a pixel-dump file. In memcached mode every
    /// dump is read now and kept for the registry's lifetime.
    pub fn load_sprite_data(
        &mut self,
        path: impl AsRef<Path>,
        memcached: bool,
    ) -> anyhow::Result<Vec<String>> {
        let path = path.as_ref();
        let extended = self.capabilities.extended;
        let mut warnings = Vec::new();

        if memcached {
            let mut file = SpriteDataFile::open(path, extended)?;
            let count = file.header.count;
            for id in 1..=count {
                if let Some(dump) = file.take_dump(id) {
                    self.ensure_image(id);
                    if let Some(image) = self.image_mut(id) {
                        image.set_dump(dump, 0);
                    }
                }
            }
            warnings.append(&mut file.warnings);
            debug!(count, "Preloaded sprite dumps");
        } else {
            let header = spr::read_header(path, extended)?;
            debug!(count = header.count, signature = header.signature, "Sprite file header");
        }

        self.memcached = memcached;
        self.source = Some(SpriteSource {
            path: Arc::new(path.to_path_buf()),
            extended,
            transparency: self.capabilities.transparency,
        });
        info!(path = %path.display(), memcached, "Sprite data loaded");
        Ok(warnings)
    }

    /// Loads `<name>16.png`/`<name>32.png` pairs under consecutive negative
    /// ids starting at -1. Missing bitmaps are skipped with a warning.
    pub fn load_editor_sprites(&mut self, directory: &Path, names: &[String]) -> usize {
        let mut loaded = 0;
        for (index, name) in names.iter().enumerate() {
            let id = -(index as i32) - 1;
            match EditorSprite::load(directory, name) {
                Ok(sprite) => {
                    self.editor_sprites.insert(id, sprite);
                    loaded += 1;
                }
                Err(e) => warn!(id, name = %name, "Failed to load editor sprite: {:#}", e),
            }
        }
        loaded
    }

    /// Drops game sprites and images. Editor sprites stay.
    pub fn clear(&mut self) {
        self.sprites.clear();
        self.images.clear();
        self.source = None;
        self.memcached = false;
        self.item_count = 0;
        self.creature_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sprite::editor::RgbaBitmap;
    use formats::dat::{FrameGroup, SpriteDescriptor};

    fn descriptor(id: u16, ids: Vec<u32>) -> SpriteDescriptor {
        let group = FrameGroup {
            width: 1,
            height: 1,
            layers: 1,
            pattern_x: ids.len() as u8,
            pattern_y: 1,
            pattern_z: 1,
            frames: 1,
            sprite_ids: ids,
            ..Default::default()
        };
        SpriteDescriptor {
            id,
            groups: vec![group],
            ..Default::default()
        }
    }

    #[test]
    fn test_images_created_on_first_reference() {
        let mut db = SpriteDatabase::new();
        db.insert_sprite(GameSprite::from_descriptor(&descriptor(100, vec![3, 7])));
        db.insert_sprite(GameSprite::from_descriptor(&descriptor(101, vec![7])));

        assert_eq!(db.image_count(), 2);
        assert!(db.image(3).is_some());
        assert!(db.image(4).is_none());
        assert_eq!(db.sprite(101).map(|s| s.sprite_ids()), Some(&[7][..]));
        assert_eq!(db.max_sprite_id(), 101);
    }

    #[test]
    fn test_clear_keeps_editor_sprites() {
        let mut db = SpriteDatabase::new();
        db.insert_sprite(GameSprite::from_descriptor(&descriptor(100, vec![1])));
        let bitmap = RgbaBitmap::new(1, 1, vec![0; 4]).unwrap();
        db.insert_editor_sprite(-1, EditorSprite::new(None, Some(bitmap)))
            .unwrap();
        assert!(db.insert_editor_sprite(5, EditorSprite::default()).is_err());

        db.clear();
        assert_eq!(db.sprite_count(), 0);
        assert_eq!(db.image_count(), 0);
        assert!(db.editor_sprite(-1).is_some());
    }

    #[test]
    fn test_creature_ids_follow_items() {
        let mut db = SpriteDatabase::new();
        db.item_count = 100;
        db.insert_sprite(GameSprite::from_descriptor(&descriptor(101, vec![1])));
        assert_eq!(db.creature_sprite(1).map(|s| s.id), Some(101));
        assert!(db.creature_sprite(u16::MAX).is_none());
    }
}
