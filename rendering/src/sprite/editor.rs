use anyhow::{Context, bail};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgbaBitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RgbaBitmap {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> anyhow::Result<Self> {
        if pixels.len() != (width * height * 4) as usize {
            bail!(
                "bitmap of {}x{} needs {} bytes, got {}",
                width,
                height,
                width * height * 4,
                pixels.len()
            );
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn load_png(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut decoder = png::Decoder::new(BufReader::new(file));
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let mut reader = decoder
            .read_info()
            .with_context(|| format!("reading {}", path.display()))?;

        let (width, height) = {
            let info = reader.info();
            (info.width, info.height)
        };
        let mut buf = vec![0; (width * height * 4) as usize];
        let frame = reader
            .next_frame(&mut buf)
            .with_context(|| format!("decoding {}", path.display()))?;
        buf.truncate(frame.buffer_size());

        let pixels = match frame.color_type {
            png::ColorType::Rgba => buf,
            png::ColorType::Rgb => buf
                .chunks_exact(3)
                .flat_map(|p| [p[0], p[1], p[2], 0xff])
                .collect(),
            png::ColorType::GrayscaleAlpha => buf
                .chunks_exact(2)
                .flat_map(|p| [p[0], p[0], p[0], p[1]])
                .collect(),
            png::ColorType::Grayscale => buf.iter().flat_map(|&v| [v, v, v, 0xff]).collect(),
            png::ColorType::Indexed => bail!("{}: palette was not expanded", path.display()),
        };
        Self::new(width, height, pixels)
    }
}

/// Editor-only sprite (brush markers, zone overlays) with a small and a
/// large bitmap. Lives under a negative id and survives asset reloads.
#[derive(Clone, Debug, Default)]
pub struct EditorSprite {
    small: Option<RgbaBitmap>,
    large: Option<RgbaBitmap>,
}

impl EditorSprite {
    pub fn new(small: Option<RgbaBitmap>, large: Option<RgbaBitmap>) -> Self {
        Self { small, large }
    }

    /// Loads `<name>16.png` and `<name>32.png` from `directory`; either may be
    /// missing.
    pub fn load(directory: &Path, name: &str) -> anyhow::Result<Self> {
        let load = |size: u32| -> anyhow::Result<Option<RgbaBitmap>> {
            let path = directory.join(format!("{}{}.png", name, size));
            if !path.exists() {
                return Ok(None);
            }
            RgbaBitmap::load_png(&path).map(Some)
        };
        let sprite = Self::new(load(16)?, load(32)?);
        if sprite.small.is_none() && sprite.large.is_none() {
            bail!("no bitmaps found for editor sprite '{}'", name);
        }
        Ok(sprite)
    }

    pub fn small(&self) -> Option<&RgbaBitmap> {
        self.small.as_ref()
    }

    pub fn large(&self) -> Option<&RgbaBitmap> {
        self.large.as_ref()
    }

    /// Pixels of the 32px bitmap.
    pub fn rgba_data(&self) -> Option<&RgbaBitmap> {
        self.large.as_ref()
    }

    pub fn unload(&mut self) {
        self.small = None;
        self.large = None;
    }
}
