use crate::cursor::BinaryCursor;
use anyhow::{Context, bail};
use std::io::{Read, Seek};
use std::path::Path;
use tracing::warn;

/// Hard limit on the sprite count a pixel-dump header may declare.
pub const MAX_SPRITES: u32 = 0x00FF_FFFF;

// Every dump is preceded by a 3-byte legacy color key.
const SPRITE_DATA_OFFSET: u64 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpriteFileHeader {
    pub signature: u32,
    pub count: u32,
}

impl SpriteFileHeader {
    pub fn read_from<R: Read + Seek>(
        cursor: &mut BinaryCursor<R>,
        extended: bool,
    ) -> anyhow::Result<Self> {
        let signature = cursor.u32().context("sprite file header")?;
        let count = cursor.id(extended).context("sprite file header")?;
        if count > MAX_SPRITES {
            bail!(
                "Sprite count {} exceeds limit (MAX_SPRITES={})",
                count,
                MAX_SPRITES
            );
        }
        Ok(Self { signature, count })
    }

    /// Byte size of the header for the given id width.
    pub fn size(extended: bool) -> u64 {
        if extended { 8 } else { 6 }
    }
}

pub fn read_header(path: impl AsRef<Path>, extended: bool) -> anyhow::Result<SpriteFileHeader> {
    let path = path.as_ref();
    let mut cursor = BinaryCursor::open(path)
        .with_context(|| format!("Failed to open file {} for reading", path.display()))?;
    SpriteFileHeader::read_from(&mut cursor, extended)
}

/// Reads the compressed dump of a single sprite by seeking through the
/// offset table. Id 0 and a zero offset are both an empty sprite.
pub fn load_dump(path: impl AsRef<Path>, extended: bool, id: u32) -> anyhow::Result<Vec<u8>> {
    if id == 0 {
        return Ok(Vec::new());
    }
    let mut cursor = BinaryCursor::open(path.as_ref())?;
    load_dump_from(&mut cursor, extended, id)
}

pub fn load_dump_from<R: Read + Seek>(
    cursor: &mut BinaryCursor<R>,
    extended: bool,
    id: u32,
) -> anyhow::Result<Vec<u8>> {
    if id == 0 {
        return Ok(Vec::new());
    }
    let signature_size = if extended { 4 } else { 2 };
    cursor
        .seek(signature_size + id as u64 * 4)
        .with_context(|| format!("offset table entry of sprite {}", id))?;
    let address = cursor
        .u32()
        .with_context(|| format!("offset table entry of sprite {}", id))?;
    if address == 0 {
        return Ok(Vec::new());
    }

    cursor
        .seek(address as u64 + SPRITE_DATA_OFFSET)
        .with_context(|| format!("dump address {} of sprite {}", address, id))?;
    let size = cursor.u16()?;
    let dump = cursor
        .bytes(size as usize)
        .with_context(|| format!("dump of sprite {} ({} bytes)", id, size))?;
    Ok(dump)
}

/// Every dump of a sprite file read up front ("memcached" mode).
#[derive(Debug)]
pub struct SpriteDataFile {
    pub header: SpriteFileHeader,
    /// Indexed by sprite id; slot 0 is always `None`.
    pub dumps: Vec<Option<Vec<u8>>>,
    pub warnings: Vec<String>,
}

impl SpriteDataFile {
    pub fn open(path: impl AsRef<Path>, extended: bool) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut cursor = BinaryCursor::open(path)
            .with_context(|| format!("Failed to open file {} for reading", path.display()))?;
        Self::read_from(&mut cursor, extended)
    }

    pub fn read_from<R: Read + Seek>(
        cursor: &mut BinaryCursor<R>,
        extended: bool,
    ) -> anyhow::Result<Self> {
        let header = SpriteFileHeader::read_from(cursor, extended)?;

        let mut indexes = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            indexes.push(cursor.u32().context("sprite offset table")?);
        }

        let mut dumps = vec![None; header.count as usize + 1];
        let mut warnings = Vec::new();
        for (slot, index) in indexes.into_iter().enumerate() {
            let id = slot + 1;
            if index == 0 {
                continue;
            }
            let seek_pos = index as u64 + SPRITE_DATA_OFFSET;
            if cursor.seek(seek_pos).is_err() {
                let message = format!(
                    "Failed to seek to sprite data at offset {} for id {}",
                    seek_pos, id
                );
                warn!("{}", message);
                warnings.push(message);
                continue;
            }
            let size = cursor.u16().with_context(|| format!("size of sprite {}", id))?;
            if size > 0 {
                dumps[id] = Some(
                    cursor
                        .bytes(size as usize)
                        .with_context(|| format!("dump of sprite {}", id))?,
                );
            }
        }

        Ok(Self {
            header,
            dumps,
            warnings,
        })
    }

    pub fn dump(&self, id: u32) -> Option<&[u8]> {
        self.dumps.get(id as usize)?.as_deref()
    }

    pub fn take_dump(&mut self, id: u32) -> Option<Vec<u8>> {
        self.dumps.get_mut(id as usize)?.take()
    }
}
