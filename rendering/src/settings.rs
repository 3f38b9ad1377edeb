use serde::{Deserialize, Serialize};

/// Residency and eviction tuning for the sprite cache.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TextureSettings {
    pub texture_management: bool,
    pub clean_pulse_secs: u64,
    /// GPU residency window.
    pub longevity_secs: u64,
    /// Resident-image count below which the evictor does nothing.
    pub clean_threshold: usize,
    pub software_clean_threshold: usize,
    pub software_clean_size: usize,
    /// CPU-side compressed dump retention window.
    pub dump_longevity_secs: u64,
    /// Read every dump at load time and never drop them.
    pub memcached_sprites: bool,
    /// Preload requests beyond this many in flight are dropped.
    pub preload_queue_size: usize,
    pub atlas_size: u32,
    pub atlas_max_layers: usize,
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self {
            texture_management: true,
            clean_pulse_secs: 15,
            longevity_secs: 20,
            clean_threshold: 2500,
            software_clean_threshold: 1800,
            software_clean_size: 500,
            dump_longevity_secs: 5,
            memcached_sprites: false,
            preload_queue_size: crate::preloader::MAX_QUEUE_SIZE,
            atlas_size: 4096,
            atlas_max_layers: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings: TextureSettings = toml::from_str("longevity_secs = 60\n").unwrap();
        assert_eq!(settings.longevity_secs, 60);
        assert_eq!(settings.clean_pulse_secs, 15);
        assert!(settings.texture_management);
    }
}
