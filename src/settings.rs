pub use crate::settings_types::*;
use crate::storage_dir;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

impl Settings {
    pub fn default_path() -> PathBuf {
        storage_dir().join("settings.toml")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::default_path())
    }

    /// Reads settings from `path`, writing defaults there if it does not
    /// exist yet. Unreadable files fall back to defaults.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<Settings>(&content) {
                    Ok(s) => {
                        info!("Loaded settings from {:?}", path);
                        s
                    }
                    Err(e) => {
                        error!("Failed to parse {:?}: {}", path, e);
                        Settings::default()
                    }
                },
                Err(e) => {
                    error!("Failed to read {:?}: {}", path, e);
                    Settings::default()
                }
            }
        } else {
            info!("Creating default settings at {:?}", path);
            let default_settings = Settings::default();
            default_settings.save_to(path);
            default_settings
        }
    }

    pub fn save(&self) {
        self.save_to(&Self::default_path());
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match toml::to_string_pretty(self) {
            Ok(content) => {
                if let Err(e) = fs::write(path, content) {
                    error!("Failed to write {:?}: {}", path, e);
                } else {
                    info!("Saved settings to {:?}", path);
                }
            }
            Err(e) => error!("Failed to serialize settings: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("spritedeck-settings-{}-{}", name, std::process::id()))
            .join("settings.toml")
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let path = temp_path("missing");
        let _ = fs::remove_file(&path);

        let settings = Settings::load_from(&path);
        assert_eq!(settings, Settings::default());
        assert!(path.exists(), "defaults should be written back");
        assert_eq!(Settings::load_from(&path), settings);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = temp_path("partial");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            "[textures]\nlongevity_secs = 90\n\n[assets]\nclient_version = 860\n",
        )
        .unwrap();

        let settings = Settings::load_from(&path);
        assert_eq!(settings.textures.longevity_secs, 90);
        assert_eq!(settings.textures.clean_threshold, 2500);
        assert_eq!(settings.assets.client_version, 860);
        assert_eq!(settings.assets.sprites_file, "Tibia.spr");
        assert_eq!(settings.logging.filter, "info");
    }

    #[test]
    fn test_garbage_falls_back_to_defaults() {
        let path = temp_path("garbage");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "this is = = not toml").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }
}
