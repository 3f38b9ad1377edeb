/// Outfit color table, indexed by the 0..=132 color code.
pub const PALETTE: [u32; 133] = [
    0xFFFFFF, 0xFFD4BF, 0xFFE9BF, 0xFFFFBF, 0xE9FFBF, 0xD4FFBF, 0xBFFFBF, 0xBFFFD4, 0xBFFFE9,
    0xBFFFFF, 0xBFE9FF, 0xBFD4FF, 0xBFBFFF, 0xD4BFFF, 0xE9BFFF, 0xFFBFFF, 0xFFBFE9, 0xFFBFD4,
    0xFFBFBF, 0xDADADA, 0xBF9F8F, 0xBFAF8F, 0xBFBF8F, 0xAFBF8F, 0x9FBF8F, 0x8FBF8F, 0x8FBF9F,
    0x8FBFAF, 0x8FBFBF, 0x8FAFBF, 0x8F9FBF, 0x8F8FBF, 0x9F8FBF, 0xAF8FBF, 0xBF8FBF, 0xBF8FAF,
    0xBF8F9F, 0xBF8F8F, 0xB6B6B6, 0xBF7F5F, 0xBFAF8F, 0xBFBF5F, 0x9FBF5F, 0x7FBF5F, 0x5FBF5F,
    0x5FBF7F, 0x5FBF9F, 0x5FBFBF, 0x5F9FBF, 0x5F7FBF, 0x5F5FBF, 0x7F5FBF, 0x9F5FBF, 0xBF5FBF,
    0xBF5F9F, 0xBF5F7F, 0xBF5F5F, 0x919191, 0xBF6A3F, 0xBF943F, 0xBFBF3F, 0x94BF3F, 0x6ABF3F,
    0x3FBF3F, 0x3FBF6A, 0x3FBF94, 0x3FBFBF, 0x3F94BF, 0x3F6ABF, 0x3F3FBF, 0x6A3FBF, 0x943FBF,
    0xBF3FBF, 0xBF3F94, 0xBF3F6A, 0xBF3F3F, 0x6D6D6D, 0xFF5500, 0xFFAA00, 0xFFFF00, 0xAAFF00,
    0x54FF00, 0x00FF00, 0x00FF54, 0x00FFAA, 0x00FFFF, 0x00A9FF, 0x0055FF, 0x0000FF, 0x5500FF,
    0xA900FF, 0xFE00FF, 0xFF00AA, 0xFF0055, 0xFF0000, 0x484848, 0xBF3F00, 0xBF7F00, 0xBFBF00,
    0x7FBF00, 0x3FBF00, 0x00BF00, 0x00BF3F, 0x00BF7F, 0x00BFBF, 0x007FBF, 0x003FBF, 0x0000BF,
    0x3F00BF, 0x7F00BF, 0xBF00BF, 0xBF007F, 0xBF003F, 0xBF0000, 0x242424, 0x7F2A00, 0x7F5500,
    0x7F7F00, 0x557F00, 0x2A7F00, 0x007F00, 0x007F2A, 0x007F55, 0x007F7F, 0x00547F, 0x002A7F,
    0x00007F, 0x2A007F, 0x54007F, 0x7F007F, 0x7F0055, 0x7F002A, 0x7F0000,
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct OutfitColors {
    pub head: u8,
    pub body: u8,
    pub legs: u8,
    pub feet: u8,
}

impl OutfitColors {
    pub fn new(head: u8, body: u8, legs: u8, feet: u8) -> Self {
        Self {
            head,
            body,
            legs,
            feet,
        }
    }

    pub fn hash(&self) -> u32 {
        (self.head as u32) << 24
            | (self.body as u32) << 16
            | (self.legs as u32) << 8
            | self.feet as u32
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Outfit {
    pub look_type: u16,
    pub colors: OutfitColors,
    pub addons: u8,
    pub mount: u16,
}

impl Outfit {
    pub fn color_hash(&self) -> u32 {
        self.colors.hash()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MaskChannel {
    Head,
    Body,
    Legs,
    Feet,
}

fn classify(mask: &[u8]) -> Option<MaskChannel> {
    match (mask[0] != 0, mask[1] != 0, mask[2] != 0) {
        (true, true, false) => Some(MaskChannel::Head),
        (true, false, false) => Some(MaskChannel::Body),
        (false, true, false) => Some(MaskChannel::Legs),
        (false, false, true) => Some(MaskChannel::Feet),
        _ => None,
    }
}

fn palette_color(index: u8) -> u32 {
    PALETTE.get(index as usize).copied().unwrap_or(PALETTE[0])
}

/// Tints one RGB triple by a palette color, channel by channel.
pub fn colorize_pixel(color: u32, rgb: &mut [u8]) {
    let tint = [(color >> 16) & 0xff, (color >> 8) & 0xff, color & 0xff];
    for (channel, factor) in rgb.iter_mut().zip(tint) {
        *channel = (*channel as u32 * factor / 255) as u8;
    }
}

/// Recolors `dest` in place using an RGB `mask` of the same pixel count.
/// Alpha in `dest` is left as is.
pub fn colorize(
    dest: &mut [u8],
    mask: &[u8],
    pixel_count: usize,
    colors: OutfitColors,
    dest_has_alpha: bool,
) {
    let step = if dest_has_alpha { 4 } else { 3 };
    for (pixel, mask) in dest
        .chunks_exact_mut(step)
        .zip(mask.chunks_exact(3))
        .take(pixel_count)
    {
        let index = match classify(mask) {
            Some(MaskChannel::Head) => colors.head,
            Some(MaskChannel::Body) => colors.body,
            Some(MaskChannel::Legs) => colors.legs,
            Some(MaskChannel::Feet) => colors.feet,
            None => continue,
        };
        colorize_pixel(palette_color(index), &mut pixel[..3]);
    }
}
