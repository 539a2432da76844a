//! Limits applied to every route by the router's middleware stack.

use std::time::Duration;

/// Requests still running after this long are answered with 408.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest accepted request body. Journal topics are short free text.
pub const MAX_BODY_BYTES: usize = 64 * 1024;
