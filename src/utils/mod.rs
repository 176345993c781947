//! Small shared helpers: serde adapters, duration formatting and atomic JSON files.

pub mod fs;
pub mod serde;

use std::time::Duration;

/// Render a duration for operators: `45s`, `12m 05s`, `1h 03m`
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
