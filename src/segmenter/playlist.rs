//! Live HLS media playlist rendering

use std::fmt::Write;

use chrono::{DateTime, SecondsFormat, Utc};

/// One completed segment as listed in the playlist
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub sequence: u64,
    pub duration_secs: f64,
    /// Wall-clock time of the first sample
    pub program_date_time: DateTime<Utc>,
}

impl PlaylistEntry {
    pub fn uri(&self) -> String {
        segment_name(self.sequence)
    }
}

/// File name of segment `sequence`
pub fn segment_name(sequence: u64) -> String {
    format!("seg{}.ts", sequence)
}

/// Parse a segment file name back into its sequence number
pub fn parse_segment_name(name: &str) -> Option<u64> {
    name.strip_prefix("seg")?.strip_suffix(".ts")?.parse().ok()
}

/// Render a sliding-window live playlist (no ENDLIST)
pub fn render_live(entries: &[PlaylistEntry], target_duration_secs: u64) -> String {
    let mut out = String::new();

    let target = entries
        .iter()
        .map(|e| e.duration_secs.ceil() as u64)
        .max()
        .unwrap_or(0)
        .max(target_duration_secs);
    let media_sequence = entries.first().map(|e| e.sequence).unwrap_or(0);

    let _ = writeln!(out, "#EXTM3U");
    let _ = writeln!(out, "#EXT-X-VERSION:3");
    let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", target);
    let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", media_sequence);

    for entry in entries {
        let _ = writeln!(
            out,
            "#EXT-X-PROGRAM-DATE-TIME:{}",
            entry
                .program_date_time
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        let _ = writeln!(out, "#EXTINF:{:.5},", entry.duration_secs);
        let _ = writeln!(out, "{}", entry.uri());
    }

    out
}
