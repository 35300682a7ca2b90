//! Lyric timeline helpers
//!
//! Line selection for timestamp tables and the fixed-width MMSS encoding
//! shared with rich lyric documents.

use crate::model::LyricLine;

/// Line active at `position` (seconds)
///
/// A line is active over `[start, end)`. When several lines overlap the
/// position, the one with the latest start wins; equal starts resolve to the
/// later line in the list.
pub fn active_line(lines: &[LyricLine], position: f64) -> Option<&LyricLine> {
    let mut best: Option<&LyricLine> = None;
    for line in lines {
        if line.start <= position && position < line.end {
            match best {
                Some(current) if current.start > line.start => {}
                _ => best = Some(line),
            }
        }
    }
    best
}

/// Index of the active line, for UIs that highlight by row
pub fn active_line_index(lines: &[LyricLine], position: f64) -> Option<usize> {
    let active = active_line(lines, position)?;
    lines.iter().position(|l| std::ptr::eq(l, active))
}

/// Encode a position as zero-padded `MMSS`
///
/// Minutes saturate at 99 so the result is always four digits, which keeps
/// lexicographic comparison equivalent to numeric comparison.
pub fn format_mmss(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let minutes = (total / 60).min(99);
    let secs = if total / 60 > 99 { 59 } else { total % 60 };
    format!("{:02}{:02}", minutes, secs)
}

/// True when `value` is a well-formed `MMSS` timing code
pub fn is_mmss(value: &str) -> bool {
    value.len() == 4 && value.bytes().all(|b| b.is_ascii_digit())
}
