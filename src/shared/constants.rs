/// Default client chunk size (10MB)
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Default number of transfers allowed in `processing`/`merging` at once
pub const DEFAULT_MAX_CONCURRENT_TRANSFERS: usize = 5;

/// Default attempt bound for a single chunk
pub const DEFAULT_MAX_CHUNK_ATTEMPTS: u32 = 10;

/// Default upper bound on one chunk request
pub const DEFAULT_CHUNK_TIMEOUT_SECS: u64 = 5 * 60;

// =============================================================================
// CATALOG
// =============================================================================

/// Catalog entry kind for regular files (counted toward quota)
pub const KIND_FILE: &str = "file";

/// Catalog entry kind for folders (never counted toward quota)
pub const KIND_FOLDER: &str = "folder";

/// Content type used when the client sends no hint
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// =============================================================================
// STORAGE LAYOUT
// =============================================================================

/// Directory under the storage root holding per-session chunk areas
pub const UPLOADS_DIR: &str = "uploads";

/// Directory under the storage root holding assembled artifacts
pub const FILES_DIR: &str = "files";

/// Session metadata file inside a session area
pub const SESSION_META_FILE: &str = "session.json";

/// Extension of a stored chunk (`<ordinal>.chunk`)
pub const CHUNK_EXTENSION: &str = "chunk";

/// Role allowed to trigger an administrative session sweep
pub const ROLE_ADMIN: &str = "admin";
