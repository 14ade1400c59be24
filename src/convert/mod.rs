//! Best-effort coercions between loosely typed values and typed records.

mod hydrate;
mod map;
mod scalar;

pub use hydrate::{from_map, MapField, MapRecord};
pub use map::{copy_map, transform_map, MapTransform};
pub use scalar::{to_bool, to_datetime, to_f32, to_f64, to_i64, to_string_value};
