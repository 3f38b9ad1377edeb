//! Run-length pixel codec for sprite dumps.
//!
//! A dump is a sequence of `(transparent: u16, colored: u16, colored * bpp bytes)`
//! runs covering a 32x32 sprite in row-major order. `bpp` is 4 when the asset
//! set carries an alpha channel and 3 otherwise. Runs that would write past the
//! sprite are clamped, runs that would read past the dump stop decoding, and the
//! uncovered tail is left transparent.

use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{info, warn};

pub const SPRITE_PIXELS: usize = 32;
pub const SPRITE_PIXEL_COUNT: usize = SPRITE_PIXELS * SPRITE_PIXELS;
pub const RGBA_SIZE: usize = SPRITE_PIXEL_COUNT * 4;
pub const RGB_SIZE: usize = SPRITE_PIXEL_COUNT * 3;

/// Color written for transparent pixels by [`decode_rgb`].
pub const COLOR_KEY: [u8; 3] = [0xff, 0x00, 0xff];

/// Ids at or below this are reserved and never reported as suspicious.
const DIAGNOSTIC_MIN_ID: u32 = 100;
const DIAGNOSTIC_LIMIT: u32 = 10;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeReport {
    /// A run pointed past the end of the output and was shortened.
    pub clamped: bool,
    /// The dump ended in the middle of a run.
    pub truncated: bool,
    pub all_transparent: bool,
    pub all_black: bool,
}

pub struct DecodedSprite {
    pub pixels: Vec<u8>,
    pub report: DecodeReport,
}

fn bytes_per_pixel(has_alpha: bool) -> usize {
    if has_alpha { 4 } else { 3 }
}

/// Core decode loop shared by the RGBA and keyed RGB outputs.
fn decode_into(
    dump: &[u8],
    has_alpha: bool,
    id: u32,
    out: &mut [u8],
    channels: usize,
    transparent: &[u8],
) -> DecodeReport {
    let bpp = bytes_per_pixel(has_alpha);
    let pixel_total = out.len() / channels;
    let mut report = DecodeReport::default();
    let mut read = 0usize;
    let mut written = 0usize;

    while read < dump.len() && written < pixel_total {
        if read + 1 >= dump.len() {
            report.truncated = true;
            break;
        }
        let mut transparent_run = u16::from_le_bytes([dump[read], dump[read + 1]]) as usize;
        read += 2;

        if written + transparent_run > pixel_total {
            warn!(
                id,
                run = transparent_run,
                written,
                "Sprite transparent run overruns the buffer, clamping"
            );
            report.clamped = true;
            transparent_run = pixel_total - written;
        }
        for pixel in out[written * channels..(written + transparent_run) * channels]
            .chunks_exact_mut(channels)
        {
            pixel.copy_from_slice(transparent);
        }
        written += transparent_run;

        if written >= pixel_total {
            break;
        }
        if read + 1 >= dump.len() {
            report.truncated = read < dump.len();
            break;
        }

        let mut colored_run = u16::from_le_bytes([dump[read], dump[read + 1]]) as usize;
        read += 2;

        if written + colored_run > pixel_total {
            warn!(
                id,
                run = colored_run,
                written,
                "Sprite colored run overruns the buffer, clamping"
            );
            report.clamped = true;
            colored_run = pixel_total - written;
        }
        if read + colored_run * bpp > dump.len() {
            warn!(
                id,
                run = colored_run,
                available = dump.len() - read,
                "Sprite colored run overruns the dump, stopping"
            );
            report.truncated = true;
            break;
        }

        for source in dump[read..read + colored_run * bpp].chunks_exact(bpp) {
            let pixel = &mut out[written * channels..(written + 1) * channels];
            pixel[..3].copy_from_slice(&source[..3]);
            if channels == 4 {
                pixel[3] = if has_alpha { source[3] } else { 0xff };
            }
            written += 1;
        }
        read += colored_run * bpp;
    }

    for pixel in out[written * channels..].chunks_exact_mut(channels) {
        pixel.copy_from_slice(transparent);
    }
    report
}

/// Decodes a dump into a 32x32 RGBA buffer. Transparent pixels are all zero.
pub fn decode_rgba(dump: &[u8], has_alpha: bool, id: u32) -> DecodedSprite {
    let mut pixels = vec![0u8; RGBA_SIZE];
    let mut report = decode_into(dump, has_alpha, id, &mut pixels, 4, &[0, 0, 0, 0]);

    report.all_transparent = pixels.chunks_exact(4).all(|p| p[3] == 0);
    report.all_black = !report.all_transparent
        && pixels
            .chunks_exact(4)
            .all(|p| p[3] == 0 || (p[0] == 0 && p[1] == 0 && p[2] == 0));

    DecodedSprite { pixels, report }
}

/// Decodes a dump into a 32x32 RGB buffer with transparent pixels painted
/// [`COLOR_KEY`]. Used for outfit masks.
pub fn decode_rgb(dump: &[u8], has_alpha: bool, id: u32) -> Vec<u8> {
    let mut pixels = vec![0u8; RGB_SIZE];
    decode_into(dump, has_alpha, id, &mut pixels, 3, &COLOR_KEY);
    pixels
}

/// Rate-limited reporting of decodes that look like a transparency-flag
/// mismatch. Shared between the decode worker and the owner thread.
#[derive(Debug, Default)]
pub struct DecodeDiagnostics {
    transparent: AtomicU32,
    black: AtomicU32,
}

impl DecodeDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, id: u32, report: &DecodeReport) {
        if id <= DIAGNOSTIC_MIN_ID {
            return;
        }
        if report.all_transparent {
            let seen = self.transparent.fetch_add(1, Ordering::Relaxed);
            if seen < DIAGNOSTIC_LIMIT {
                info!(id, "Sprite decoded fully transparent");
            }
        } else if report.all_black {
            let seen = self.black.fetch_add(1, Ordering::Relaxed);
            if seen < DIAGNOSTIC_LIMIT {
                warn!(
                    id,
                    "Sprite decoded to pure black, check the transparency setting"
                );
            }
        }
    }

    pub fn transparent_count(&self) -> u32 {
        self.transparent.load(Ordering::Relaxed)
    }

    pub fn black_count(&self) -> u32 {
        self.black.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal encoder: one run pair per maximal stretch of transparent then
    /// opaque pixels.
    fn encode(pixels: &[u8], has_alpha: bool) -> Vec<u8> {
        let bpp = bytes_per_pixel(has_alpha);
        let mut out = Vec::new();
        let mut i = 0;
        let count = pixels.len() / 4;
        while i < count {
            let start = i;
            while i < count && pixels[i * 4 + 3] == 0 {
                i += 1;
            }
            let transparent = i - start;
            let colored_start = i;
            while i < count && pixels[i * 4 + 3] != 0 {
                i += 1;
            }
            out.extend_from_slice(&(transparent as u16).to_le_bytes());
            out.extend_from_slice(&((i - colored_start) as u16).to_le_bytes());
            for p in colored_start..i {
                out.extend_from_slice(&pixels[p * 4..p * 4 + bpp]);
            }
        }
        out
    }

    #[test]
    fn test_decode_inverts_encode() {
        let mut pixels = vec![0u8; RGBA_SIZE];
        for (i, pixel) in pixels.chunks_exact_mut(4).enumerate() {
            if (i / 7) % 3 != 0 {
                pixel.copy_from_slice(&[(i % 251) as u8, (i % 13) as u8, 200, 255]);
            }
        }
        let decoded = decode_rgba(&encode(&pixels, false), false, 500);
        assert!(decoded.pixels == pixels, "RGB round trip differs");

        let mut translucent = pixels.clone();
        for pixel in translucent.chunks_exact_mut(4).filter(|p| p[3] != 0) {
            pixel[3] = 128;
        }
        let decoded = decode_rgba(&encode(&translucent, true), true, 500);
        assert!(decoded.pixels == translucent, "RGBA round trip differs");
        assert_eq!(decoded.report, DecodeReport::default());
    }

    #[test]
    fn test_transparent_then_colored_run() {
        let dump = [2, 0, 1, 0, 10, 20, 30];
        let decoded = decode_rgba(&dump, false, 1);
        assert_eq!(&decoded.pixels[0..8], &[0; 8]);
        assert_eq!(&decoded.pixels[8..12], &[10, 20, 30, 255]);
        assert!(decoded.pixels[12..].iter().all(|&b| b == 0));
        assert!(!decoded.report.truncated);
    }

    #[test]
    fn test_overrunning_run_is_clamped() {
        // 1020 transparent pixels then a colored run claiming 10 pixels.
        let mut dump = vec![];
        dump.extend_from_slice(&1020u16.to_le_bytes());
        dump.extend_from_slice(&10u16.to_le_bytes());
        dump.extend(std::iter::repeat_n(0x40, 10 * 3));
        let decoded = decode_rgba(&dump, false, 1);
        assert!(decoded.report.clamped);
        assert_eq!(decoded.pixels.len(), RGBA_SIZE);
        assert_eq!(&decoded.pixels[RGBA_SIZE - 4..], &[0x40, 0x40, 0x40, 255]);
    }

    #[test]
    fn test_transparent_run_past_end_fills_buffer() {
        let dump = [0xff, 0xff, 5, 0, 1, 2, 3];
        let decoded = decode_rgba(&dump, false, 1);
        assert!(decoded.report.clamped);
        assert!(decoded.report.all_transparent);
    }

    #[test]
    fn test_short_dump_stops_cleanly() {
        // Declares three colored pixels but carries only one.
        let dump = [1, 0, 3, 0, 9, 9, 9];
        let decoded = decode_rgba(&dump, false, 1);
        assert!(decoded.report.truncated);
        assert!(decoded.pixels.iter().all(|&b| b == 0));

        // A lone byte is not a run header.
        let decoded = decode_rgba(&[4], false, 1);
        assert!(decoded.report.truncated);
    }

    #[test]
    fn test_rgb_decode_keys_transparency() {
        let dump = [1, 0, 1, 0, 0, 255, 0];
        let pixels = decode_rgb(&dump, false, 1);
        assert_eq!(&pixels[0..3], &COLOR_KEY);
        assert_eq!(&pixels[3..6], &[0, 255, 0]);
        assert_eq!(&pixels[6..9], &COLOR_KEY);
    }

    #[test]
    fn test_black_sprite_report() {
        let dump = [0, 0, 2, 0, 0, 0, 0, 0, 0, 0];
        let decoded = decode_rgba(&dump, false, 900);
        assert!(decoded.report.all_black);

        let diagnostics = DecodeDiagnostics::new();
        for _ in 0..12 {
            diagnostics.observe(900, &decoded.report);
        }
        assert_eq!(diagnostics.black_count(), 12);
        assert_eq!(diagnostics.transparent_count(), 0);
    }
}
