use std::time::{SystemTime, UNIX_EPOCH};

use verbatim_types::Ms;

/// Monotonic-enough millisecond clock for timestamps the controller stamps
/// itself (commit/event `at` fields for which no caller-supplied `recv_at`
/// exists, e.g. a forced commit arriving from the recovery engine's own
/// background task).
pub(crate) fn now_ms() -> Ms {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}
