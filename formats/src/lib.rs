pub mod codec;
pub mod cursor;
pub mod dat;
pub mod otfi;
pub mod spr;

pub use cursor::{BinaryCursor, CursorError};
pub use dat::{DatCapabilities, DatFlag, DatFormat, MetadataFile, SpriteDescriptor};
