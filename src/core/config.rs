use std::time::Duration;

/// Engine-level tunables. Library *content* tunables (user categories,
/// saved searches, virtual libraries, ...) live in the Store's prefs
/// table and are loaded by `CacheController::init`, not here.
#[derive(Debug, Clone)]
pub struct Config {
    /// How often the Maintainer daemon wakes to drain its queues.
    pub maintainer_interval: Duration,
    /// Busy-timeout the Store driver is expected to apply on transient
    /// contention. The core does not enforce this itself.
    pub store_busy_timeout: Duration,
    /// Capacity of `format_metadata_cache` (per-book priority-code ->
    /// {size, path, mtime}).
    pub format_metadata_cache_size: usize,
    /// Capacity of `formatter_template_cache` (compiled display templates).
    pub formatter_template_cache_size: usize,
    /// One-shot: if true, `init()` runs `update_last_modified` over every
    /// book and clears the flag.
    pub update_all_last_mod_dates_on_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            maintainer_interval: Duration::from_secs(2),
            store_busy_timeout: Duration::from_secs(10),
            format_metadata_cache_size: 10_000,
            formatter_template_cache_size: 1_000,
            update_all_last_mod_dates_on_start: false,
        }
    }
}
