//! Unified synchronization types shared by the runtime crates.
//!
//! We use parking_lot because:
//! - It has no poisoning (more ergonomic).
//! - Better performance in cases without contention.
//! - API compatible with std (mostly).

pub use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
pub use std::sync::Arc;

/// Alias for the common pattern Arc<Mutex<T>>
pub type SharedMut<T> = Arc<Mutex<T>>;

/// Helper to create SharedMut<T> easily
pub fn shared_mut<T>(value: T) -> SharedMut<T> {
    Arc::new(Mutex::new(value))
}
