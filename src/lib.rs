pub use rendering::{AssetCache, TextureSettings};

pub mod assets;
pub mod logging;
pub mod settings;
pub mod settings_types;

pub fn storage_dir() -> std::path::PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
    path.push("spritedeck");
    let _ = std::fs::create_dir_all(&path);
    path
}
