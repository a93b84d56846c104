// Response caching module
// Author: kelexine (https://github.com/kelexine)

pub mod manager;
pub mod models;
pub mod ttl;

pub use manager::ApiCache;
pub use models::{
    CacheConfig, CacheEntry, CacheLookup, CacheStats, ErrorCallback, FetchOptions, SweepReport,
};
pub use ttl::TtlCache;
