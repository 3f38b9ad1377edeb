#![allow(dead_code)]

use spritedeck::settings_types::AssetSettings;
use std::fs;
use std::path::PathBuf;

pub const FLAG_LAST: u8 = 0xff;

/// One metadata record for the 8.6 layout: flag bytes, then
/// `[width, height, layers, pattern_x, pattern_y, pattern_z, frames]`, then
/// one u16 image id per sprite.
#[derive(Clone, Debug)]
pub struct SpriteDef {
    pub flags: Vec<u8>,
    pub dims: [u8; 7],
    pub ids: Vec<u16>,
}

impl SpriteDef {
    pub fn simple(id: u16) -> Self {
        Self {
            flags: Vec::new(),
            dims: [1, 1, 1, 1, 1, 1, 1],
            ids: vec![id],
        }
    }

    pub fn sheet(dims: [u8; 7], first_id: u16) -> Self {
        let count: usize = dims.iter().map(|&d| d as usize).product();
        Self {
            flags: Vec::new(),
            dims,
            ids: (first_id..first_id + count as u16).collect(),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.flags);
        out.push(FLAG_LAST);
        let [w, h, layers, px, py, pz, frames] = self.dims;
        out.extend_from_slice(&[w, h]);
        if w > 1 || h > 1 {
            out.push(32);
        }
        out.extend_from_slice(&[layers, px, py, pz, frames]);
        for id in &self.ids {
            out.extend_from_slice(&id.to_le_bytes());
        }
    }
}

/// A per-test asset directory under the system temp dir.
pub struct Fixture {
    pub dir: PathBuf,
}

impl Fixture {
    pub fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("spritedeck-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        Self { dir }
    }

    pub fn metadata_bytes(items: &[SpriteDef], creatures: &[SpriteDef]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0x4a10_59e3u32.to_le_bytes());
        out.extend_from_slice(&(99 + items.len() as u16).to_le_bytes());
        out.extend_from_slice(&(creatures.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        for def in items.iter().chain(creatures) {
            def.encode(&mut out);
        }
        out
    }

    /// Items get ids from 100 up, creatures follow.
    pub fn write_metadata(&self, items: &[SpriteDef], creatures: &[SpriteDef]) -> PathBuf {
        let path = self.dir.join("Tibia.dat");
        fs::write(&path, Self::metadata_bytes(items, creatures)).unwrap();
        path
    }

    /// Dump `i` becomes image id `i + 1`. `None` writes a zero offset.
    pub fn write_sprites(&self, dumps: &[Option<Vec<u8>>]) -> PathBuf {
        let mut out = Vec::new();
        out.extend_from_slice(&0x4a10_59e4u32.to_le_bytes());
        out.extend_from_slice(&(dumps.len() as u16).to_le_bytes());

        let mut offset = 6 + dumps.len() * 4;
        for dump in dumps {
            match dump {
                Some(dump) => {
                    out.extend_from_slice(&(offset as u32).to_le_bytes());
                    offset += 5 + dump.len();
                }
                None => out.extend_from_slice(&0u32.to_le_bytes()),
            }
        }
        for dump in dumps.iter().flatten() {
            out.extend_from_slice(&[0xff, 0x00, 0xff]);
            out.extend_from_slice(&(dump.len() as u16).to_le_bytes());
            out.extend_from_slice(dump);
        }

        let path = self.dir.join("Tibia.spr");
        fs::write(&path, out).unwrap();
        path
    }

    pub fn settings(&self) -> AssetSettings {
        AssetSettings {
            directory: Some(self.dir.clone()),
            client_version: 860,
            editor_sprites: Vec::new(),
            ..Default::default()
        }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

/// A dump filling all 1024 pixels with one opaque color.
pub fn solid_dump(rgb: [u8; 3]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&1024u16.to_le_bytes());
    for _ in 0..1024 {
        out.extend_from_slice(&rgb);
    }
    out
}
