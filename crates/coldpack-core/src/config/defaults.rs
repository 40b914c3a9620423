use std::time::Duration;

use coldpack_types::{ColdpackError, Result};

pub(super) fn default_free_space_polling_time() -> String {
    "1 min".to_string()
}

pub(super) fn default_free_space_safety_margin_bytes() -> u64 {
    1024 * 1024 // 1 MiB
}

pub(super) fn default_finalizer_polling_time() -> String {
    "5 min".to_string()
}

pub(super) fn default_finalizer_max_waiting_time() -> String {
    "2 d".to_string()
}

pub(super) fn default_deletion_polling_time() -> String {
    "5 min".to_string()
}

pub(super) fn default_deletion_timeout() -> String {
    "1 d".to_string()
}

/// Parse a simple human duration like "5 min", "30m", "4 h", "10 sec" or
/// "2d". A bare number is taken as seconds.
pub fn parse_human_duration(raw: &str) -> Result<Duration> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(ColdpackError::Config("duration must not be empty".into()));
    }

    let digits_end = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (num_str, suffix) = input.split_at(digits_end);
    let value: u64 = num_str
        .parse()
        .map_err(|_| ColdpackError::Config(format!("invalid duration: '{raw}'")))?;

    let secs = match suffix.trim() {
        "" | "s" | "sec" | "second" | "seconds" => value,
        "m" | "min" | "minute" | "minutes" => value * 60,
        "h" | "hour" | "hours" => value * 3600,
        "d" | "day" | "days" => value * 86_400,
        other => {
            return Err(ColdpackError::Config(format!(
                "unknown duration unit '{other}' in '{raw}'"
            )))
        }
    };

    Ok(Duration::from_secs(secs))
}
