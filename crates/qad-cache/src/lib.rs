//! Versioned, crash-safe result cache.
//!
//! One JSON snapshot per version tag (`answer_cache_<version>.json`),
//! rewritten atomically after every completion. An advisory `flock(2)` on a
//! sibling `.lock` file keeps two processes from writing the same namespace.

mod io;
pub mod lock;
pub mod store;

pub use lock::CacheLock;
pub use store::{
    CacheStats, ResultCache, cache_file_path, list_versions, read_entries, validate_version,
};
