//! Log configuration.

/// On-disk entry encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Varint-framed binary entries: `varint(len) || payload`.
    #[default]
    Binary,
    /// One JSON line per entry: `{"index":"<n>","data":"<tag><body>"}`.
    ///
    /// The tag is `+` for UTF-8 payloads (inlined verbatim, without
    /// escaping `"` or `\` — payloads containing either will corrupt
    /// subsequent reads) and `$` for anything else (standard base64).
    Json,
}

/// Log configuration parameters.
#[derive(Debug, Clone)]
pub struct Options {
    /// Skip the durable flush after writes (default: false).
    ///
    /// When true, entries are only guaranteed to reach the OS page
    /// cache; a power failure may lose the most recent writes.
    pub no_sync: bool,

    /// Soft segment size threshold in bytes (default: 20 MiB).
    ///
    /// The tail segment is cycled when an append makes its buffer reach
    /// or cross this threshold, or when a batch begins with the buffer
    /// already strictly above it.
    pub segment_size: usize,

    /// Entry encoding (default: [`LogFormat::Binary`]).
    pub log_format: LogFormat,

    /// Maximum number of cached cold segments (default: 2, never 0).
    pub segment_cache_size: usize,

    /// Permit reads to alias internal buffers (default: false).
    ///
    /// Kept for format-level compatibility. Reads from this
    /// implementation always return independently owned bytes, which is
    /// a valid behavior under either setting.
    pub no_copy: bool,

    /// Unix mode for the log directory (default: `0o750`).
    pub dir_perms: u32,

    /// Unix mode for segment files (default: `0o640`).
    pub file_perms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            no_sync: false,
            segment_size: 20 * 1024 * 1024,
            log_format: LogFormat::Binary,
            segment_cache_size: 2,
            no_copy: false,
            dir_perms: 0o750,
            file_perms: 0o640,
        }
    }
}

impl Options {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the durable-flush suppression flag (builder pattern).
    pub fn with_no_sync(mut self, no_sync: bool) -> Self {
        self.no_sync = no_sync;
        self
    }

    /// Set the segment size threshold (builder pattern).
    pub fn with_segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    /// Set the entry encoding (builder pattern).
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Set the segment cache capacity (builder pattern).
    pub fn with_segment_cache_size(mut self, size: usize) -> Self {
        self.segment_cache_size = size;
        self
    }

    /// Validate configuration.
    ///
    /// [`Log::open`](crate::Log::open) coerces zero-valued fields back
    /// to their defaults; callers that would rather reject such a
    /// configuration outright can check here first.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.segment_size == 0 {
            return Err(OptionsError::ZeroSegmentSize);
        }
        if self.segment_cache_size == 0 {
            return Err(OptionsError::ZeroSegmentCacheSize);
        }
        Ok(())
    }

    /// Normalize zero-valued fields back to their defaults.
    ///
    /// Applied once at open. A zero cache capacity is forbidden, and a
    /// zero segment size would cycle on every append, so both fall back
    /// to the defaults rather than erroring.
    pub(crate) fn normalize(&mut self) {
        let defaults = Options::default();
        if self.segment_size == 0 {
            self.segment_size = defaults.segment_size;
        }
        if self.segment_cache_size == 0 {
            self.segment_cache_size = defaults.segment_cache_size;
        }
        if self.dir_perms == 0 {
            self.dir_perms = defaults.dir_perms;
        }
        if self.file_perms == 0 {
            self.file_perms = defaults.file_perms;
        }
    }

    /// Create a configuration optimized for testing (tiny segments, no
    /// fsync), so rotation paths are exercised quickly.
    pub fn for_testing() -> Self {
        Options {
            no_sync: true,
            segment_size: 64,
            ..Options::default()
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    /// Segment size threshold must be non-zero.
    #[error("segment size must be non-zero")]
    ZeroSegmentSize,

    /// Segment cache capacity must be non-zero.
    #[error("segment cache capacity must be non-zero")]
    ZeroSegmentCacheSize,
}

impl From<OptionsError> for crate::Error {
    fn from(err: OptionsError) -> Self {
        crate::Error::Invalid(err.to_string())
    }
}
