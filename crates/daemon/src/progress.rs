use std::time::Duration;

/// One parsed encoder status line, e.g.
/// `frame= 1234 fps= 48 q=24.0 size=   10240KiB time=00:00:51.40 bitrate=1632.0kbits/s speed=2.01x`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    pub frame: u64,
    pub fps: Option<f64>,
    pub size_bytes: Option<u64>,
    pub time: Option<Duration>,
    pub speed: Option<f64>,
}

/// Parse a status line. Returns `None` for anything without a frame counter;
/// everything else is best-effort.
pub fn parse_progress_line(line: &str) -> Option<Progress> {
    let mut progress = Progress::default();
    let mut saw_frame = false;

    for (key, value) in key_values(line) {
        match key {
            "frame" => {
                progress.frame = value.parse().ok()?;
                saw_frame = true;
            }
            "fps" => progress.fps = value.parse().ok(),
            "size" | "Lsize" => progress.size_bytes = parse_size(value),
            "time" => progress.time = parse_timestamp(value),
            "speed" => progress.speed = value.trim_end_matches('x').parse().ok(),
            _ => {}
        }
    }

    saw_frame.then_some(progress)
}

/// Split `key=value` pairs, tolerating ffmpeg's padding (`frame=  12`)
fn key_values(line: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    let mut tokens = line.split_whitespace().peekable();

    while let Some(token) = tokens.next() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        if value.is_empty() {
            if let Some(next) = tokens.peek() {
                if !next.contains('=') {
                    pairs.push((key, *next));
                    tokens.next();
                }
            }
        } else {
            pairs.push((key, value));
        }
    }

    pairs
}

fn parse_size(value: &str) -> Option<u64> {
    if value == "N/A" {
        return None;
    }
    let split = value.find(|c: char| !c.is_ascii_digit() && c != '.').unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok()?;
    let multiplier = match unit {
        "" | "B" => 1.0,
        "kB" => 1000.0,
        "KiB" => 1024.0,
        "MB" => 1000.0 * 1000.0,
        "MiB" => 1024.0 * 1024.0,
        "GB" => 1000.0 * 1000.0 * 1000.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((number * multiplier) as u64)
}

/// `HH:MM:SS.ms`
fn parse_timestamp(value: &str) -> Option<Duration> {
    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let secs = parts.next()?;
    let (whole, fraction) = secs.split_once('.').unwrap_or((secs, ""));
    if parts.next().is_some() || fraction.len() > 9 {
        return None;
    }
    let seconds: u64 = whole.parse().ok()?;
    let nanos: u32 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<9}", fraction).parse().ok()?
    };
    Some(Duration::new(hours * 3600 + minutes * 60 + seconds, nanos))
}
