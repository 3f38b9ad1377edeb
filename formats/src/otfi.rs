//! OTFI asset descriptor: an indentation-based text file naming the metadata
//! and sprite files of an asset set and overriding their stream features.
//!
//! ```text
//! DatSpr
//!   extended: true
//!   transparency: false
//!   metadata-file: "Tibia.dat"
//!   sprites-file: "Tibia.spr"
//! ```

use crate::dat::DatCapabilities;
use anyhow::{Context, anyhow, bail};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Otfi {
    pub extended: Option<bool>,
    pub transparency: Option<bool>,
    pub frame_durations: Option<bool>,
    pub frame_groups: Option<bool>,
    pub metadata_file: Option<String>,
    pub sprites_file: Option<String>,
}

fn parse_bool(key: &str, value: &str) -> anyhow::Result<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => bail!("'{}' expects a boolean, got '{}'", key, other),
    }
}

impl Otfi {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let mut lines = text
            .lines()
            .map(|line| line.split("//").next().unwrap_or_default())
            .filter(|line| !line.trim().is_empty());

        match lines.next().map(str::trim) {
            Some("DatSpr") => {}
            _ => bail!("'DatSpr' tag not found"),
        }

        let mut otfi = Otfi::default();
        for line in lines {
            if !line.starts_with(char::is_whitespace) {
                // Next top-level tag; only DatSpr is meaningful.
                break;
            }
            let (key, value) = line
                .trim()
                .split_once(':')
                .ok_or_else(|| anyhow!("malformed line '{}'", line.trim()))?;
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            match key {
                "extended" => otfi.extended = Some(parse_bool(key, value)?),
                "transparency" => otfi.transparency = Some(parse_bool(key, value)?),
                "frame-durations" => otfi.frame_durations = Some(parse_bool(key, value)?),
                "frame-groups" => otfi.frame_groups = Some(parse_bool(key, value)?),
                "metadata-file" => otfi.metadata_file = Some(value.to_string()),
                "sprites-file" => otfi.sprites_file = Some(value.to_string()),
                _ => {}
            }
        }
        Ok(otfi)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Overrides the format defaults with whatever this file sets.
    pub fn apply(&self, mut capabilities: DatCapabilities) -> DatCapabilities {
        if let Some(v) = self.extended {
            capabilities.extended = v;
        }
        if let Some(v) = self.transparency {
            capabilities.transparency = v;
        }
        if let Some(v) = self.frame_durations {
            capabilities.frame_durations = v;
        }
        if let Some(v) = self.frame_groups {
            capabilities.frame_groups = v;
        }
        capabilities
    }

    /// Resolves the named files against the directory holding the OTFI file,
    /// falling back to the given defaults.
    pub fn resolve_files(
        &self,
        directory: &Path,
        default_metadata: &str,
        default_sprites: &str,
    ) -> (PathBuf, PathBuf) {
        let metadata = self.metadata_file.as_deref().unwrap_or(default_metadata);
        let sprites = self.sprites_file.as_deref().unwrap_or(default_sprites);
        (directory.join(metadata), directory.join(sprites))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dat::DatFormat;

    #[test]
    fn test_parse_and_apply() {
        let text = "DatSpr\n  extended: true\n  transparency: true\n  frame-groups: false\n  metadata-file: \"items.dat\"\n";
        let otfi = Otfi::parse(text).unwrap();
        assert_eq!(otfi.metadata_file.as_deref(), Some("items.dat"));
        assert_eq!(otfi.sprites_file, None);

        let caps = otfi.apply(DatCapabilities::for_format(DatFormat::V1057));
        assert!(caps.extended);
        assert!(caps.transparency);
        assert!(caps.frame_durations);
        assert!(!caps.frame_groups);

        let (dat, spr) = otfi.resolve_files(Path::new("/assets"), "Tibia.dat", "Tibia.spr");
        assert_eq!(dat, Path::new("/assets/items.dat"));
        assert_eq!(spr, Path::new("/assets/Tibia.spr"));
    }

    #[test]
    fn test_missing_tag() {
        let err = Otfi::parse("Other\n  extended: true\n").unwrap_err();
        assert!(err.to_string().contains("DatSpr"));
    }

    #[test]
    fn test_bad_boolean() {
        assert!(Otfi::parse("DatSpr\n  extended: maybe\n").is_err());
    }
}
