use crate::atlas::{AtlasRegion, RegionTable};
use crate::sprite::animator::Animator;
use crate::sprite::image::{NormalImage, TemplateIds, TemplateImage};
use crate::sprite::outfit::OutfitColors;
use formats::dat::{DatFlag, SpriteDescriptor, SpriteLight};
use glam::UVec2;

/// Software icon sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IconSize {
    Small,
    Large,
}

impl IconSize {
    pub fn pixels(&self) -> u32 {
        match self {
            IconSize::Small => 16,
            IconSize::Large => 32,
        }
    }

    fn slot(&self) -> usize {
        match self {
            IconSize::Small => 0,
            IconSize::Large => 1,
        }
    }
}

/// Requested position inside a sprite sheet. Out-of-range values wrap
/// instead of failing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpriteCoords {
    pub x: usize,
    pub y: usize,
    pub layer: usize,
    /// Stack count or fluid type; selects the sprite directly on 1x1 sheets.
    pub subtype: Option<usize>,
    pub pattern_x: usize,
    pub pattern_y: usize,
    pub pattern_z: usize,
    pub frame: usize,
}

#[derive(Clone, Copy, Debug)]
struct SimpleCache {
    region: AtlasRegion,
    image_id: u32,
    generation: u32,
}

/// Multi-frame, multi-layer sprite sheet built from a metadata descriptor.
pub struct GameSprite {
    pub id: u16,
    pub width: u8,
    pub height: u8,
    pub layers: u8,
    pub pattern_x: u8,
    pub pattern_y: u8,
    pub pattern_z: u8,
    pub frames: u8,
    pub numsprites: usize,
    pub draw_height: u16,
    pub draw_offset: UVec2,
    pub minimap_color: u16,
    pub light: Option<SpriteLight>,
    pub animator: Option<Animator>,
    pub flags: Vec<DatFlag>,
    pub(crate) sprite_list: Vec<u32>,
    pub(crate) templates: Vec<TemplateImage>,
    simple: Option<SimpleCache>,
    icons: [Option<Vec<u8>>; 2],
    pub(crate) resident: Option<crate::arena::SlotKey>,
}

impl GameSprite {
    pub fn from_descriptor(descriptor: &SpriteDescriptor) -> Self {
        let mut sprite = Self::empty(descriptor.id);
        sprite.draw_height = descriptor.elevation.unwrap_or(0);
        sprite.draw_offset = descriptor
            .displacement
            .map(|(x, y)| UVec2::new(x as u32, y as u32))
            .unwrap_or(UVec2::ZERO);
        sprite.minimap_color = descriptor.minimap_color.unwrap_or(0);
        sprite.light = descriptor.light;
        sprite.flags = descriptor.flags.clone();

        if let Some(group) = descriptor.primary() {
            sprite.width = group.width;
            sprite.height = group.height;
            sprite.layers = group.layers;
            sprite.pattern_x = group.pattern_x;
            sprite.pattern_y = group.pattern_y;
            sprite.pattern_z = group.pattern_z;
            sprite.frames = group.frames;
            sprite.numsprites = group.sprite_count();
            sprite.sprite_list = group.sprite_ids.clone();
            sprite.animator = group
                .timing
                .as_ref()
                .map(|timing| Animator::from_timing(group.frames as usize, timing));
        }
        sprite
    }

    pub fn empty(id: u16) -> Self {
        Self {
            id,
            width: 0,
            height: 0,
            layers: 0,
            pattern_x: 0,
            pattern_y: 0,
            pattern_z: 0,
            frames: 0,
            numsprites: 0,
            draw_height: 0,
            draw_offset: UVec2::ZERO,
            minimap_color: 0,
            light: None,
            animator: None,
            flags: Vec::new(),
            sprite_list: Vec::new(),
            templates: Vec::new(),
            simple: None,
            icons: [None, None],
            resident: None,
        }
    }

    pub fn sprite_ids(&self) -> &[u32] {
        &self.sprite_list
    }

    pub fn has_flag(&self, flag: DatFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_simple(&self) -> bool {
        self.numsprites == 1
            && self.frames == 1
            && self.layers == 1
            && self.width == 1
            && self.height == 1
            && !self.sprite_list.is_empty()
    }

    /// Row-major flat index over frame > pattern_z > pattern_y > pattern_x >
    /// layer > height > width.
    pub fn get_index(
        &self,
        width: usize,
        height: usize,
        layer: usize,
        pattern_x: usize,
        pattern_y: usize,
        pattern_z: usize,
        frame: usize,
    ) -> usize {
        if self.is_simple() || self.frames == 0 {
            return 0;
        }
        let frames = self.frames as usize;
        let mut index = if frames > 1 { frame % frames } else { 0 };
        index = index * self.pattern_z as usize + pattern_z;
        index = index * self.pattern_y as usize + pattern_y;
        index = index * self.pattern_x as usize + pattern_x;
        index = index * self.layers as usize + layer;
        index = index * self.height as usize + height;
        index * self.width as usize + width
    }

    /// Folds an index into `0..numsprites`.
    pub fn wrap_index(&self, index: usize) -> usize {
        match self.numsprites {
            0 | 1 => 0,
            n if index >= n => index % n,
            _ => index,
        }
    }

    /// Sprite-list index for a coordinate request, after wrapping.
    pub fn resolve_index(&self, coords: &SpriteCoords) -> usize {
        let index = match coords.subtype {
            Some(subtype) if self.width <= 1 && self.height <= 1 => subtype,
            _ => self.get_index(
                coords.x,
                coords.y,
                coords.layer,
                coords.pattern_x,
                coords.pattern_y,
                coords.pattern_z,
                coords.frame,
            ),
        };
        self.wrap_index(index)
    }

    /// Image id at a resolved index.
    pub fn image_id(&self, index: usize) -> Option<u32> {
        self.sprite_list.get(index).copied()
    }

    /// Cached region of a simple sprite, if its image is still resident
    /// under the same generation and still owns the region.
    pub(crate) fn cached_region<A: RegionTable>(
        &self,
        image: &NormalImage,
        atlas: &A,
    ) -> Option<AtlasRegion> {
        let cache = self.simple.as_ref()?;
        if image.id != cache.image_id
            || !image.is_loaded()
            || image.generation() != cache.generation
            || !atlas.is_owned_by(&cache.region, cache.image_id)
        {
            return None;
        }
        Some(cache.region)
    }

    pub(crate) fn cache_region(&mut self, image: &NormalImage, region: AtlasRegion) {
        if self.is_simple() {
            self.simple = Some(SimpleCache {
                region,
                image_id: image.id,
                generation: image.generation(),
            });
        }
    }

    /// Template for a base sprite index and outfit colors, created on first
    /// use. Hits move to the front of the list.
    pub(crate) fn template_position(
        &mut self,
        sprite_index: usize,
        colors: OutfitColors,
        ids: &TemplateIds,
    ) -> usize {
        if let Some(found) = self
            .templates
            .iter()
            .position(|t| t.matches(sprite_index, colors))
        {
            if found != 0 {
                self.templates.swap(0, found);
            }
            return 0;
        }
        self.templates
            .push(TemplateImage::new(ids.next(), sprite_index, colors));
        self.templates.len() - 1
    }

    pub fn templates(&self) -> &[TemplateImage] {
        &self.templates
    }

    pub(crate) fn template_mut(&mut self, id: u32) -> Option<&mut TemplateImage> {
        self.templates.iter_mut().find(|t| t.id == id)
    }

    pub fn icon(&self, size: IconSize) -> Option<&[u8]> {
        self.icons[size.slot()].as_deref()
    }

    pub(crate) fn set_icon(&mut self, size: IconSize, pixels: Vec<u8>) {
        self.icons[size.slot()] = Some(pixels);
    }

    pub fn has_icons(&self) -> bool {
        self.icons.iter().any(Option::is_some)
    }

    pub fn unload_icons(&mut self) {
        self.icons = [None, None];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formats::dat::FrameGroup;

    fn sprite(dims: [u8; 7]) -> GameSprite {
        let [width, height, layers, pattern_x, pattern_y, pattern_z, frames] = dims;
        let mut group = FrameGroup {
            width,
            height,
            layers,
            pattern_x,
            pattern_y,
            pattern_z,
            frames,
            ..Default::default()
        };
        group.sprite_ids = (1..=group.sprite_count() as u32).collect();
        let descriptor = SpriteDescriptor {
            id: 100,
            groups: vec![group],
            ..Default::default()
        };
        GameSprite::from_descriptor(&descriptor)
    }

    #[test]
    fn test_simple_sprite_index() {
        let s = sprite([1, 1, 1, 1, 1, 1, 1]);
        assert_eq!(s.numsprites, 1);
        assert!(s.is_simple());
        assert_eq!(s.get_index(0, 0, 0, 0, 0, 0, 0), 0);
        assert_eq!(s.resolve_index(&SpriteCoords { x: 3, frame: 9, ..Default::default() }), 0);
    }

    #[test]
    fn test_row_major_axes() {
        let s = sprite([2, 2, 2, 4, 1, 1, 3]);
        assert_eq!(s.numsprites, 96);
        assert_eq!(s.get_index(1, 0, 0, 0, 0, 0, 0), 1);
        assert_eq!(s.get_index(0, 1, 0, 0, 0, 0, 0), 2);
        assert_eq!(s.get_index(0, 0, 1, 0, 0, 0, 0), 4);
        assert_eq!(s.get_index(0, 0, 0, 1, 0, 0, 0), 8);
        assert_eq!(s.get_index(0, 0, 0, 0, 0, 0, 1), 32);
        // Frames wrap inside get_index itself.
        assert_eq!(s.get_index(0, 0, 0, 0, 0, 0, 4), 32);
        assert_eq!(s.get_index(1, 1, 1, 3, 0, 0, 2), 95);
    }

    #[test]
    fn test_out_of_range_index_wraps() {
        let s = sprite([1, 1, 1, 4, 1, 1, 1]);
        assert_eq!(s.numsprites, 4);
        let coords = SpriteCoords {
            pattern_x: 7,
            ..Default::default()
        };
        assert_eq!(s.get_index(0, 0, 0, 7, 0, 0, 0), 7);
        assert_eq!(s.resolve_index(&coords), 3);
        assert_eq!(s.image_id(3), Some(4));
    }

    #[test]
    fn test_subtype_selects_directly() {
        let s = sprite([1, 1, 1, 4, 2, 1, 1]);
        let coords = SpriteCoords {
            subtype: Some(9),
            ..Default::default()
        };
        assert_eq!(s.resolve_index(&coords), 1);
    }

    #[test]
    fn test_large_sheet_does_not_overflow() {
        let s = sprite([2, 2, 4, 4, 4, 4, 8]);
        assert_eq!(s.numsprites, 8192);
        assert_eq!(s.get_index(1, 1, 3, 3, 3, 3, 7), 8191);
    }

    #[test]
    fn test_template_move_to_front() {
        let mut s = sprite([1, 1, 2, 4, 1, 1, 1]);
        let ids = TemplateIds::default();
        let red = OutfitColors::new(94, 94, 94, 94);
        let blue = OutfitColors::new(88, 88, 88, 88);

        assert_eq!(s.template_position(0, red, &ids), 0);
        assert_eq!(s.template_position(0, blue, &ids), 1);
        let blue_id = s.templates()[1].id;

        assert_eq!(s.template_position(0, blue, &ids), 0);
        assert_eq!(s.templates()[0].id, blue_id);
        assert_eq!(s.templates().len(), 2, "hits must not add templates");

        // Same colors on a different base index is a different template.
        s.template_position(2, blue, &ids);
        assert_eq!(s.templates().len(), 3);
    }
}
