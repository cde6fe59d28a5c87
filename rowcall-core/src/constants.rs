//! Engine defaults and limits

// ============================================================================
// DISPATCH
// ============================================================================

/// Default number of calls in flight at once.
pub const DEFAULT_PARALLEL_WORKERS: usize = 4;

/// Default number of units per batch when the API supports batching.
pub const DEFAULT_BATCH_SIZE: usize = 10;

// ============================================================================
// OUTPUT COLUMNS
// ============================================================================

/// Default prefix for generated output columns.
pub const DEFAULT_COLUMN_PREFIX: &str = "api";

/// Maximum number of candidate names tried, the bare name included.
pub const MAX_COLUMN_NAME_ATTEMPTS: usize = 1000;

// ============================================================================
// RETRY
// ============================================================================

/// Default total attempts per call, including the first.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;

/// Default delay before the first retry (1 second).
pub const DEFAULT_RETRY_INITIAL_BACKOFF_MS: u64 = 1_000;

/// Default upper bound on any single retry delay (30 seconds).
pub const DEFAULT_RETRY_MAX_BACKOFF_MS: u64 = 30_000;

/// Default growth factor between consecutive retry delays.
pub const DEFAULT_RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// Prefix shared by every environment variable the engine reads.
pub const ENV_PREFIX: &str = "ROWCALL_";

/// Environment variable naming a TOML configuration file.
pub const ENV_CONFIG_PATH: &str = "ROWCALL_CONFIG";
