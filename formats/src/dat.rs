use crate::cursor::BinaryCursor;
use anyhow::{Context, bail};
use num_enum::TryFromPrimitive;
use std::io::{Read, Seek};
use std::path::Path;
use tracing::{debug, warn};

/// First id carried by a metadata file. Ids below are reserved.
pub const MIN_ID: u16 = 100;

const MAX_FLAGS: usize = 255;

/// Metadata layout eras, ordered oldest to newest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DatFormat {
    #[default]
    Unknown,
    V74,
    V755,
    V78,
    V86,
    V96,
    V1010,
    V1050,
    V1057,
}

impl DatFormat {
    pub fn from_client_version(version: u32) -> Self {
        match version {
            0..=739 => DatFormat::Unknown,
            740..=754 => DatFormat::V74,
            755..=779 => DatFormat::V755,
            780..=859 => DatFormat::V78,
            860..=959 => DatFormat::V86,
            960..=1009 => DatFormat::V96,
            1010..=1049 => DatFormat::V1010,
            1050..=1056 => DatFormat::V1050,
            _ => DatFormat::V1057,
        }
    }
}

/// Optional stream features. Defaults derive from the format; an OTFI file
/// may override them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DatCapabilities {
    pub extended: bool,
    pub transparency: bool,
    pub frame_durations: bool,
    pub frame_groups: bool,
}

impl DatCapabilities {
    pub fn for_format(format: DatFormat) -> Self {
        Self {
            extended: format >= DatFormat::V96,
            transparency: false,
            frame_durations: format >= DatFormat::V1050,
            frame_groups: format >= DatFormat::V1057,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum DatFlag {
    Ground = 0,
    GroundBorder = 1,
    OnBottom = 2,
    OnTop = 3,
    Container = 4,
    Stackable = 5,
    ForceUse = 6,
    MultiUse = 7,
    Writable = 8,
    WritableOnce = 9,
    FluidContainer = 10,
    Splash = 11,
    NotWalkable = 12,
    NotMoveable = 13,
    BlockProjectile = 14,
    NotPathable = 15,
    Pickupable = 16,
    Hangable = 17,
    HookSouth = 18,
    HookEast = 19,
    Rotateable = 20,
    Light = 21,
    DontHide = 22,
    Translucent = 23,
    Displacement = 24,
    Elevation = 25,
    LyingCorpse = 26,
    AnimateAlways = 27,
    MinimapColor = 28,
    LensHelp = 29,
    FullGround = 30,
    Look = 31,
    Cloth = 32,
    Market = 33,
    Usable = 34,
    Wrappable = 35,
    Unwrappable = 36,
    TopEffect = 37,
    FloorChange = 252,
    NoMoveAnimation = 253,
    Chargeable = 254,
    Last = 255,
}

/// Maps a raw flag byte of the given era onto the newest numbering.
pub fn remap_flag(format: DatFormat, raw: u8) -> u8 {
    let mut flag = raw;
    if format >= DatFormat::V1010 {
        if flag == 16 {
            flag = DatFlag::NoMoveAnimation as u8;
        } else if flag > 16 {
            flag -= 1;
        }
    } else if format >= DatFormat::V86 {
        // Current numbering.
    } else if format >= DatFormat::V78 {
        if flag == 8 {
            flag = DatFlag::Chargeable as u8;
        } else if flag > 8 {
            flag -= 1;
        }
    } else if format >= DatFormat::V755 {
        if flag == 23 {
            flag = DatFlag::FloorChange as u8;
        }
    } else if format >= DatFormat::V74 {
        flag = match flag {
            1..=15 => flag + 1,
            16 => DatFlag::Light as u8,
            17 => DatFlag::FloorChange as u8,
            18 => DatFlag::FullGround as u8,
            19 => DatFlag::Elevation as u8,
            20 => DatFlag::Displacement as u8,
            22 => DatFlag::MinimapColor as u8,
            23 => DatFlag::Rotateable as u8,
            24 => DatFlag::LyingCorpse as u8,
            25 => DatFlag::Hangable as u8,
            26 => DatFlag::HookSouth as u8,
            27 => DatFlag::HookEast as u8,
            28 => DatFlag::AnimateAlways as u8,
            other => other,
        };

        if flag == DatFlag::MultiUse as u8 {
            flag = DatFlag::ForceUse as u8;
        } else if flag == DatFlag::ForceUse as u8 {
            flag = DatFlag::MultiUse as u8;
        }
    }
    flag
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpriteLight {
    pub intensity: u8,
    pub color: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameDuration {
    pub min: u32,
    pub max: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameTiming {
    pub asynchronous: bool,
    pub loop_count: i32,
    pub start_frame: i8,
    /// Empty when the stream carries no per-frame durations.
    pub durations: Vec<FrameDuration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameGroup {
    pub group_type: u8,
    pub width: u8,
    pub height: u8,
    pub exact_size: Option<u8>,
    pub layers: u8,
    pub pattern_x: u8,
    pub pattern_y: u8,
    pub pattern_z: u8,
    pub frames: u8,
    pub timing: Option<FrameTiming>,
    pub sprite_ids: Vec<u32>,
}

impl FrameGroup {
    pub fn sprite_count(&self) -> usize {
        self.width as usize
            * self.height as usize
            * self.layers as usize
            * self.pattern_x as usize
            * self.pattern_y as usize
            * self.pattern_z as usize
            * self.frames as usize
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpriteDescriptor {
    pub id: u16,
    pub flags: Vec<DatFlag>,
    pub light: Option<SpriteLight>,
    pub displacement: Option<(u16, u16)>,
    pub elevation: Option<u16>,
    pub minimap_color: Option<u16>,
    pub market_name: Option<String>,
    pub groups: Vec<FrameGroup>,
}

impl SpriteDescriptor {
    /// The group the editor draws with (idle group for creatures).
    pub fn primary(&self) -> Option<&FrameGroup> {
        self.groups.first()
    }

    pub fn numsprites(&self) -> usize {
        self.primary().map(FrameGroup::sprite_count).unwrap_or(0)
    }

    pub fn has_flag(&self, flag: DatFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// Parses one descriptor record at a time. Non-fatal issues land in `warnings`.
pub struct DescriptorReader<'a, R> {
    cursor: &'a mut BinaryCursor<R>,
    format: DatFormat,
    capabilities: DatCapabilities,
    item_count: u16,
    pub warnings: Vec<String>,
}

impl<'a, R: Read + Seek> DescriptorReader<'a, R> {
    pub fn new(
        cursor: &'a mut BinaryCursor<R>,
        format: DatFormat,
        capabilities: DatCapabilities,
        item_count: u16,
    ) -> Self {
        Self {
            cursor,
            format,
            capabilities,
            item_count,
            warnings: Vec::new(),
        }
    }

    pub fn read_descriptor(&mut self, id: u16) -> anyhow::Result<SpriteDescriptor> {
        let mut descriptor = SpriteDescriptor {
            id,
            ..Default::default()
        };
        self.read_flags(&mut descriptor)
            .with_context(|| format!("flags of sprite {}", id))?;

        let grouped = self.capabilities.frame_groups && id > self.item_count;
        let group_count = if grouped { self.cursor.u8()? } else { 1 };

        for _ in 0..group_count {
            let group_type = if grouped { self.cursor.u8()? } else { 0 };
            let group = self
                .read_group(group_type)
                .with_context(|| format!("frame group {} of sprite {}", group_type, id))?;
            descriptor.groups.push(group);
        }

        if descriptor.groups.is_empty() {
            self.warn(format!("Metadata: sprite {} has no frame groups", id));
        }
        Ok(descriptor)
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    fn read_flags(&mut self, descriptor: &mut SpriteDescriptor) -> anyhow::Result<()> {
        for _ in 0..MAX_FLAGS {
            let raw = self.cursor.u8()?;
            if raw == DatFlag::Last as u8 {
                return Ok(());
            }

            let code = remap_flag(self.format, raw);
            let Ok(flag) = DatFlag::try_from(code) else {
                self.warn(format!("Metadata: Unknown flag: {}", code));
                continue;
            };

            match flag {
                DatFlag::Ground
                | DatFlag::Writable
                | DatFlag::WritableOnce
                | DatFlag::Cloth
                | DatFlag::LensHelp
                | DatFlag::Usable => self.cursor.skip(2)?,
                DatFlag::Light => {
                    let intensity = self.cursor.u16()?;
                    let color = self.cursor.u16()?;
                    descriptor.light = Some(SpriteLight {
                        intensity: intensity as u8,
                        color: color as u8,
                    });
                }
                DatFlag::Displacement => {
                    descriptor.displacement = if self.format >= DatFormat::V755 {
                        Some((self.cursor.u16()?, self.cursor.u16()?))
                    } else {
                        Some((8, 8))
                    };
                }
                DatFlag::Elevation => descriptor.elevation = Some(self.cursor.u16()?),
                DatFlag::MinimapColor => descriptor.minimap_color = Some(self.cursor.u16()?),
                DatFlag::Market => {
                    self.cursor.skip(6)?;
                    descriptor.market_name = Some(self.cursor.string()?);
                    self.cursor.skip(4)?;
                }
                _ => {}
            }
            descriptor.flags.push(flag);
        }

        // Flag list never terminated; the next byte is treated as geometry.
        self.warn(format!(
            "Metadata: sprite {} has more than {} flags",
            descriptor.id, MAX_FLAGS
        ));
        Ok(())
    }

    fn read_group(&mut self, group_type: u8) -> anyhow::Result<FrameGroup> {
        let width = self.cursor.u8()?;
        let height = self.cursor.u8()?;
        let exact_size = if width > 1 || height > 1 {
            Some(self.cursor.u8()?)
        } else {
            None
        };
        let layers = self.cursor.u8()?;
        let pattern_x = self.cursor.u8()?;
        let pattern_y = self.cursor.u8()?;
        let pattern_z = if self.format <= DatFormat::V74 {
            1
        } else {
            self.cursor.u8()?
        };
        let frames = self.cursor.u8()?;

        let timing = if frames > 1 {
            if self.capabilities.frame_durations {
                let asynchronous = self.cursor.u8()? == 1;
                let loop_count = self.cursor.i32()?;
                let start_frame = self.cursor.i8()?;
                let mut durations = Vec::with_capacity(frames as usize);
                for _ in 0..frames {
                    let min = self.cursor.u32()?;
                    let max = self.cursor.u32()?;
                    durations.push(FrameDuration {
                        min: min.min(max),
                        max,
                    });
                }
                Some(FrameTiming {
                    asynchronous,
                    loop_count,
                    start_frame,
                    durations,
                })
            } else {
                Some(FrameTiming::default())
            }
        } else {
            None
        };

        let mut group = FrameGroup {
            group_type,
            width,
            height,
            exact_size,
            layers,
            pattern_x,
            pattern_y,
            pattern_z,
            frames,
            timing,
            sprite_ids: Vec::new(),
        };

        let count = group.sprite_count();
        let id_size = if self.capabilities.extended { 4 } else { 2 };
        if (count as u64) * id_size > self.cursor.remaining() {
            bail!(
                "sprite list of {} entries overruns the stream ({} bytes left)",
                count,
                self.cursor.remaining()
            );
        }
        group.sprite_ids.reserve(count);
        for _ in 0..count {
            group
                .sprite_ids
                .push(self.cursor.id(self.capabilities.extended)?);
        }
        Ok(group)
    }
}

/// Parsed metadata stream: header counts plus one descriptor per id in
/// `MIN_ID..=item_count + creature_count`.
#[derive(Debug)]
pub struct MetadataFile {
    pub signature: u32,
    pub format: DatFormat,
    pub capabilities: DatCapabilities,
    pub item_count: u16,
    pub creature_count: u16,
    pub effect_count: u16,
    pub distance_count: u16,
    pub descriptors: Vec<SpriteDescriptor>,
    pub warnings: Vec<String>,
}

impl MetadataFile {
    pub fn open(
        path: impl AsRef<Path>,
        format: DatFormat,
        capabilities: DatCapabilities,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut cursor = BinaryCursor::open(path)
            .with_context(|| format!("Failed to open {} for reading", path.display()))?;
        Self::read_from(&mut cursor, format, capabilities)
    }

    pub fn read_from<R: Read + Seek>(
        cursor: &mut BinaryCursor<R>,
        format: DatFormat,
        capabilities: DatCapabilities,
    ) -> anyhow::Result<Self> {
        let signature = cursor.u32().context("metadata header")?;
        let item_count = cursor.u16().context("metadata header")?;
        let creature_count = cursor.u16().context("metadata header")?;
        let effect_count = cursor.u16().context("metadata header")?;
        let distance_count = cursor.u16().context("metadata header")?;

        let max_id = item_count as u32 + creature_count as u32;
        if max_id > u16::MAX as u32 {
            bail!(
                "sprite count overflow: {} items + {} creatures",
                item_count,
                creature_count
            );
        }
        let max_id = max_id as u16;

        debug!(
            signature,
            item_count,
            creature_count,
            ?format,
            "Reading metadata"
        );

        let mut reader = DescriptorReader::new(cursor, format, capabilities, item_count);
        let mut descriptors = Vec::with_capacity(max_id.saturating_sub(MIN_ID) as usize + 1);
        for id in MIN_ID..=max_id {
            let descriptor = reader
                .read_descriptor(id)
                .with_context(|| format!("metadata truncated at sprite {}", id))?;
            descriptors.push(descriptor);
        }
        let warnings = reader.warnings;

        Ok(Self {
            signature,
            format,
            capabilities,
            item_count,
            creature_count,
            effect_count,
            distance_count,
            descriptors,
            warnings,
        })
    }

    pub fn max_id(&self) -> u16 {
        self.item_count + self.creature_count
    }

    pub fn descriptor(&self, id: u16) -> Option<&SpriteDescriptor> {
        let index = id.checked_sub(MIN_ID)?;
        self.descriptors.get(index as usize)
    }
}
