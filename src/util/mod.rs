//! util: small helpers shared by the library and the CLI.
//!
//! Contains:
//! - now_secs(): current Unix time in seconds.
//! - format_size(): human-readable byte counts for reports.

/// Current Unix time in seconds.
#[inline]
pub fn now_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Bytes as a short human string, binary units ("0B", "512B", "1.5K", "20.0G").
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["K", "M", "G", "T", "P", "E"];
    if bytes < 1024 {
        return format!("{}B", bytes);
    }
    let mut v = bytes as f64 / 1024.0;
    let mut unit = 0;
    while v >= 1024.0 && unit + 1 < UNITS.len() {
        v /= 1024.0;
        unit += 1;
    }
    format!("{:.1}{}", v, UNITS[unit])
}
