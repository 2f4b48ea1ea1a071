//! Property store: typed values, shared entries and copy-on-write maps.
//!
//! Properties describe the data flowing on a pid (stream type, codec,
//! timescale, dimensions...) and can also be attached to single packets.
//!
//! ```text
//!   pid current map ──Arc──► PropertyMap v2 ◄──Arc── packet #7
//!                                 │
//!                    merged by    ▼ reference
//!                            Arc<PropertyEntry> ◄── PropertyMap v1 ◄── packet #3
//! ```

pub mod codes;
mod key;
mod map;
mod value;

pub use key::PropertyKey;
pub use map::{HASH_TABLE_SIZE, PropertyEntry, PropertyMap, bucket_of};
pub use value::{Fraction, Fraction64, PropertyType, PropertyValue, Vec2, Vec2i, Vec3i, Vec4i};
