pub mod id;
pub mod sync;
pub mod value;

// Re-exports
pub use id::{name_hash, ModelId};
pub use value::ValueType;
