pub mod arena;
pub mod atlas;
pub mod cache;
pub mod database;
pub mod gc;
pub mod preloader;
pub mod settings;
pub mod sprite;

pub use atlas::{AtlasRegion, AtlasUpload, INVALID_OWNER, RegionTable, TextureAtlas};
pub use cache::AssetCache;
pub use database::{SpriteDatabase, SpriteSource};
pub use gc::TextureGc;
pub use preloader::SpritePreloader;
pub use settings::TextureSettings;
pub use sprite::{GameSprite, IconSize, ImageKey, Outfit, OutfitColors, SpriteCoords};
