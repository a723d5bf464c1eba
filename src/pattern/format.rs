// Delta-time text format
//
// One event per line:
//
//     class,timestamp,intensity,delta_time
//
// class is 0/1/2 (kick/snare/hat), timestamp is loop-relative seconds and
// delta_time is the gap to the next event, or for the last line the gap to
// the loop wraparound. The loop duration is therefore last.timestamp +
// last.delta_time and needs no separate field. Lines starting with '#' are
// comments; the writer emits a descriptive header there.

use std::fs;
use std::path::Path;

use super::{DrumEvent, DrumPattern};
use crate::analysis::classifier::DrumClass;
use crate::error::PatternError;

const HEADER_DURATION_PREFIX: &str = "# Total loop duration:";

/// Render a pattern in the delta-time text format
pub fn to_text(pattern: &DrumPattern) -> String {
    let mut out = String::new();
    out.push_str("# Track drum data\n");
    out.push_str("# Format: CLASS,TIMESTAMP,INTENSITY,DELTA_TIME\n");
    out.push_str("# Classes: 0=kick, 1=snare, 2=hat\n");
    out.push_str("# DELTA_TIME: time until next hit (last hit: time until loop end)\n");
    out.push_str(&format!(
        "{} {:.6} seconds\n",
        HEADER_DURATION_PREFIX, pattern.loop_duration
    ));

    for (event, delta) in pattern.events.iter().zip(pattern.delta_times()) {
        out.push_str(&format!(
            "{},{:.6},{:.6},{:.6}\n",
            event.class.index(),
            event.timestamp,
            event.intensity,
            delta
        ));
    }
    out
}

/// Parse the delta-time text format
///
/// Malformed lines are skipped with a warning. `source` names the input in
/// log lines and errors.
pub fn parse(text: &str, source: &str) -> Result<DrumPattern, PatternError> {
    let mut events = Vec::new();
    let mut last_delta = 0.0;
    let mut header_duration = None;

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix(HEADER_DURATION_PREFIX) {
            header_duration = rest
                .trim()
                .trim_end_matches("seconds")
                .trim()
                .parse::<f64>()
                .ok();
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        match parse_line(line) {
            Some((event, delta)) => {
                events.push(event);
                last_delta = delta;
            }
            None => log::warn!(
                "[Pattern] {}: skipping malformed line {}: {:?}",
                source,
                line_no + 1,
                line
            ),
        }
    }

    let header_duration = header_duration.filter(|d| d.is_finite() && *d > 0.0);
    let loop_duration = match events.last() {
        // A hitless loop still carries its length in the header
        None => header_duration.ok_or_else(|| PatternError::Empty {
            path: source.to_string(),
        })?,
        Some(last) => {
            let from_deltas = last.timestamp + last_delta;
            if from_deltas.is_finite() && from_deltas > 0.0 {
                from_deltas
            } else {
                let duration = header_duration.ok_or(PatternError::InvalidDuration {
                    duration: from_deltas,
                })?;
                log::warn!(
                    "[Pattern] {}: delta times give {:.6}s, using header duration {:.6}s",
                    source,
                    from_deltas,
                    duration
                );
                duration
            }
        }
    };

    let before = events.len();
    events.retain(|e| e.timestamp < loop_duration);
    if events.len() < before {
        log::warn!(
            "[Pattern] {}: dropped {} events at or past the {:.6}s loop end",
            source,
            before - events.len(),
            loop_duration
        );
    }

    let pattern = DrumPattern::new(events, loop_duration);
    log::debug!(
        "[Pattern] {}: {} events, loop {:.3}s",
        source,
        pattern.len(),
        pattern.loop_duration
    );
    Ok(pattern)
}

fn parse_line(line: &str) -> Option<(DrumEvent, f64)> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return None;
    }

    let class: DrumClass = parts[0].parse().ok()?;
    let timestamp: f64 = parts[1].parse().ok()?;
    let intensity: f32 = parts[2].parse().ok()?;
    let delta: f64 = parts[3].parse().ok()?;

    if !(timestamp.is_finite() && timestamp >= 0.0 && intensity.is_finite()) {
        return None;
    }
    if !(delta.is_finite() && delta >= 0.0) {
        return None;
    }

    Some((DrumEvent::new(class, timestamp, intensity), delta))
}

/// Read and parse a pattern file
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<DrumPattern, PatternError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|e| PatternError::Io {
        path: path.display().to_string(),
        details: e.to_string(),
    })?;
    parse(&text, &path.display().to_string())
}

/// Write a pattern file, creating parent directories as needed
pub fn save_file<P: AsRef<Path>>(path: P, pattern: &DrumPattern) -> Result<(), PatternError> {
    let path = path.as_ref();
    if !(pattern.loop_duration.is_finite() && pattern.loop_duration > 0.0) {
        return Err(PatternError::InvalidDuration {
            duration: pattern.loop_duration,
        });
    }

    let io_err = |e: std::io::Error| PatternError::Io {
        path: path.display().to_string(),
        details: e.to_string(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, to_text(pattern)).map_err(io_err)?;

    log::info!(
        "[Pattern] Saved {} events ({:.3}s loop) to {}",
        pattern.len(),
        pattern.loop_duration,
        path.display()
    );
    Ok(())
}
