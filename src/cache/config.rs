//! Cache configuration.
//!
//! Every structure is built from one `CacheConfig` at process start.

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_BASE_TTL: Duration = Duration::from_secs(3 * 60 * 60);
const DEFAULT_SORTED_SET_TTL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_PAGE_SIZE: usize = 5;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Sliding TTL of point-cache entries and blank markers.
    pub base_ttl: Duration,
    /// TTL of sorted structures, refreshed on every membership write.
    pub sorted_set_ttl: Duration,
    /// Items per timeline or offset page.
    pub page_size: NonZeroUsize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_ttl: DEFAULT_BASE_TTL,
            sorted_set_ttl: DEFAULT_SORTED_SET_TTL,
            page_size: NonZeroUsize::new(DEFAULT_PAGE_SIZE).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            base_ttl: settings.base_ttl,
            sorted_set_ttl: settings.sorted_set_ttl,
            page_size: settings.page_size,
        }
    }
}

impl CacheConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = NonZeroUsize::new(page_size).unwrap_or(NonZeroUsize::MIN);
        self
    }
}
