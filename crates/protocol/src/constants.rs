//! Protocol-wide defaults.

/// Byte length every non-final primary packet must have: 8 MiB exactly.
pub const DEFAULT_GRANULARITY: usize = 8 * 1024 * 1024;

/// MIME type assumed when the caller does not declare one.
pub const DEFAULT_MIME_TYPE: &str = "audio/webm";

/// File extension used when the MIME type is not recognised.
pub const DEFAULT_EXTENSION: &str = ".webm";

/// Fallback title when a meeting title sanitizes to nothing.
pub const DEFAULT_TITLE: &str = "Reuniao";

/// Maximum length of a sanitized title.
pub const MAX_TITLE_LEN: usize = 80;
