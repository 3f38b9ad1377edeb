use rendering::TextureSettings;
use std::path::PathBuf;

/// Where an asset set lives and how its streams are laid out. Unset
/// capability overrides fall back to the OTFI file, then to the format.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AssetSettings {
    pub directory: Option<PathBuf>,
    pub otfi: Option<PathBuf>,
    pub metadata_file: String,
    pub sprites_file: String,
    pub client_version: u32,
    pub extended: Option<bool>,
    pub transparency: Option<bool>,
    pub frame_durations: Option<bool>,
    pub frame_groups: Option<bool>,
    pub editor_sprites_dir: Option<PathBuf>,
    pub editor_sprites: Vec<String>,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            directory: None,
            otfi: None,
            metadata_file: "Tibia.dat".to_string(),
            sprites_file: "Tibia.spr".to_string(),
            client_version: 1098,
            extended: None,
            transparency: None,
            frame_durations: None,
            frame_groups: None,
            editor_sprites_dir: None,
            editor_sprites: [
                "selection_marker",
                "spawn",
                "house_exit",
                "town_temple",
                "waypoint",
                "door_locked",
                "door_quest",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub textures: TextureSettings,
    pub assets: AssetSettings,
    pub logging: LoggingSettings,
}
