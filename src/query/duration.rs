use std::time::Duration;

use crate::error::AppError;

/// Parses literals like `30s`, `5m`, `2h`, `500ms`, `100us`, `100ns`. No
/// bare numbers — a unit suffix is always required.
pub fn parse_duration(input: &str) -> Result<Duration, AppError> {
    let input = input.trim();
    let split_at = input.find(|c: char| !c.is_ascii_digit()).ok_or_else(|| {
        AppError::BadRequest(format!("invalid duration literal: {input}"))
    })?;
    let (digits, unit) = input.split_at(split_at);
    if digits.is_empty() {
        return Err(AppError::BadRequest(format!("invalid duration literal: {input}")));
    }
    let n: u64 = digits
        .parse()
        .map_err(|_| AppError::BadRequest(format!("invalid duration literal: {input}")))?;

    match unit {
        "ns" => Ok(Duration::from_nanos(n)),
        "us" => Ok(Duration::from_micros(n)),
        "ms" => Ok(Duration::from_millis(n)),
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        other => Err(AppError::BadRequest(format!("unknown duration unit: {other}"))),
    }
}
