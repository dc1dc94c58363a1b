//! Human-readable rendering of stream metrics

use std::time::Duration;

/// Render a bytes-per-second rate as "850 Kbps" or "4.2 Mbps"
pub fn format_bitrate(bytes_per_sec: u64) -> String {
    let kbps = bytes_per_sec as f64 * 8.0 / 1000.0;
    if kbps >= 1000.0 {
        format!("{:.1} Mbps", kbps / 1000.0)
    } else {
        format!("{:.0} Kbps", kbps)
    }
}

/// Render an elapsed time as MM:SS, or HH:MM:SS past the first hour
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let h = total / 3600;
    let m = (total / 60) % 60;
    let s = total % 60;

    if h > 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

/// Render an uptime as "1h 2m 3s", dropping leading zero units
pub fn format_uptime(d: Duration) -> String {
    let total = d.as_secs();
    let h = total / 3600;
    let m = (total / 60) % 60;
    let s = total % 60;

    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}
