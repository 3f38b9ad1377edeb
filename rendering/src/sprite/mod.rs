pub mod animator;
pub mod editor;
pub mod game_sprite;
pub mod image;
pub mod outfit;

pub use animator::Animator;
pub use editor::{EditorSprite, RgbaBitmap};
pub use game_sprite::{GameSprite, IconSize, SpriteCoords};
pub use image::{ImageKey, NormalImage, TemplateImage};
pub use outfit::{Outfit, OutfitColors};
