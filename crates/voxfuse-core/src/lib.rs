pub mod allocator;
pub mod backend;
pub mod geometry;
pub mod lock;
pub mod work_timer;

pub use allocator::BlockAllocator;
pub use backend::{Backend, Sequential};
pub use lock::{LockCells, LockGuard};
pub use work_timer::WorkTimer;

#[cfg(feature = "parallel")]
pub use backend::Parallel;

use ahash::AHashSet;
pub type SmallKeyHashSet<K> = AHashSet<K>;

// Re-exports.
pub use approx;
pub use glam;
pub use static_assertions;
