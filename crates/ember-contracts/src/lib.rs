//! Shared, version-pinned identifiers.
//!
//! These constants are the single source of truth for schema strings in CLI
//! reports, status codes crossing the C ABI, and the environment variables the
//! runtime reads. Generated programs link against the numeric values, so they
//! never change meaning once published.

pub const EMBER_DECODE_REPORT_SCHEMA_VERSION: &str = "ember.decode.report@0.1.0";
pub const EMBER_PIPELINE_REPORT_SCHEMA_VERSION: &str = "ember.pipeline.report@0.1.0";
pub const EMBER_ATTR_REPORT_SCHEMA_VERSION: &str = "ember.attr.report@0.1.0";

pub const LAYOUT_DESC_MAGIC: &[u8; 4] = b"EMLY";
pub const LAYOUT_DESC_VERSION: u32 = 1;

// Status codes returned by ABI entrypoints.
pub const EMBER_STATUS_OK: i32 = 0;
pub const EMBER_STATUS_DECODE_FAILED: i32 = 1;
pub const EMBER_STATUS_BAD_OUT_PTR: i32 = 2;
pub const EMBER_STATUS_TASK_FAILED: i32 = 3;
pub const EMBER_STATUS_BAD_HANDLE: i32 = 4;
pub const EMBER_STATUS_CHAN_CLOSED: i32 = 5;
pub const EMBER_STATUS_WOULD_BLOCK: i32 = 6;
pub const EMBER_STATUS_BAD_ARG: i32 = 7;
pub const EMBER_STATUS_INTERNAL: i32 = 9;

// Error codes carried in the `err` arm of ABI result structs.
pub const EMBER_ERR_ATTR_NOT_FOUND: u32 = 61_001;
pub const EMBER_ERR_NOT_AN_OBJECT: u32 = 61_002;
pub const EMBER_ERR_UNKNOWN_LAYOUT: u32 = 61_003;
pub const EMBER_ERR_KIND_MISMATCH: u32 = 61_004;
pub const EMBER_ERR_STALE_REF: u32 = 61_005;
pub const EMBER_ERR_OUT_OF_BOUNDS: u32 = 61_006;
pub const EMBER_ERR_ARENA_EXHAUSTED: u32 = 61_007;
pub const EMBER_ERR_BAD_LAYOUT: u32 = 61_010;
pub const EMBER_ERR_BAD_ARG: u32 = 61_011;
pub const EMBER_ERR_INTERNAL: u32 = 61_099;

pub const ENV_WORKERS: &str = "EMBER_WORKERS";
pub const ENV_ARENA_BYTES: &str = "EMBER_ARENA_BYTES";
pub const ENV_PROFILE: &str = "EMBER_PROFILE";
pub const ENV_DEBUG: &str = "EMBER_DEBUG";
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "EMBER_SHUTDOWN_TIMEOUT_MS";
