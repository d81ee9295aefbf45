//! Time range and span handling
//!
//! Relative forms (`-5m`, `-24h`, `now`) are resolved to absolute
//! millisecond epochs once at query start; nothing downstream ever
//! re-evaluates "now".

use chrono::{DateTime, Utc};

use crate::dsl::ast::{Span, TimeRange};
use crate::{Result, SiftError};

/// Caller-supplied time window, as received from the API layer.
#[derive(Debug, Clone)]
pub struct TimeRangeSpec {
    pub earliest: String,
    pub latest: String,
}

impl TimeRangeSpec {
    pub fn new(earliest: impl Into<String>, latest: impl Into<String>) -> Self {
        Self {
            earliest: earliest.into(),
            latest: latest.into(),
        }
    }

    /// Resolve both bounds against the same "now" so `-5m`..`now` is an
    /// exact five-minute window.
    pub fn resolve(&self) -> Result<TimeRange> {
        let now = Utc::now().timestamp_millis();
        self.resolve_at(now)
    }

    pub fn resolve_at(&self, now_ms: i64) -> Result<TimeRange> {
        let earliest_ms = resolve_bound(&self.earliest, now_ms)?;
        let latest_ms = resolve_bound(&self.latest, now_ms)?;
        if earliest_ms > latest_ms {
            return Err(SiftError::Validation(format!(
                "time range is inverted: {} > {}",
                self.earliest, self.latest
            )));
        }
        Ok(TimeRange {
            earliest_ms,
            latest_ms,
        })
    }
}

/// One bound: `now`, `-5m`, RFC 3339, or a raw epoch (seconds or millis).
fn resolve_bound(text: &str, now_ms: i64) -> Result<i64> {
    let text = text.trim();
    if text.is_empty() || text == "now" {
        return Ok(now_ms);
    }
    if let Some(rel) = text.strip_prefix('-') {
        let dur = parse_duration_ms(rel).ok_or_else(|| {
            SiftError::Validation(format!("invalid relative time: {}", text))
        })?;
        return Ok(now_ms - dur);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(epoch) = text.parse::<i64>() {
        // Heuristic: values this large are already milliseconds.
        return Ok(if epoch > 100_000_000_000 {
            epoch
        } else {
            epoch * 1000
        });
    }
    Err(SiftError::Validation(format!(
        "unrecognized time bound: {}",
        text
    )))
}

/// `5m` / `90s` / `2h` / `1d` / `1w` → milliseconds.
pub fn parse_duration_ms(s: &str) -> Option<i64> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit())?;
    let value: i64 = s[..split].parse().ok()?;
    let ms = match &s[split..] {
        "s" | "sec" => value * 1000,
        "m" | "min" => value * 60 * 1000,
        "h" | "hr" => value * 60 * 60 * 1000,
        "d" => value * 24 * 60 * 60 * 1000,
        "w" => value * 7 * 24 * 60 * 60 * 1000,
        _ => return None,
    };
    Some(ms)
}

/// A `span=` argument: a time duration or a bare numeric bucket width.
pub fn parse_span(s: &str) -> Option<Span> {
    if let Ok(n) = s.parse::<f64>() {
        if n > 0.0 {
            return Some(Span::Numeric(n));
        }
        return None;
    }
    parse_duration_ms(s).map(Span::Time)
}

/// Truncate a millisecond epoch down to its span boundary.
pub fn truncate_to_span(ts_ms: i64, span_ms: i64) -> i64 {
    if span_ms <= 0 {
        return ts_ms;
    }
    ts_ms.div_euclid(span_ms) * span_ms
}

/// Render an epoch-millis value as RFC 3339 for display.
pub fn format_timestamp(ts_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts_ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_else(|| ts_ms.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_relative_bounds() {
        let range = TimeRangeSpec::new("-5m", "now").resolve_at(NOW).unwrap();
        assert_eq!(range.latest_ms, NOW);
        assert_eq!(range.earliest_ms, NOW - 5 * 60 * 1000);
    }

    #[test]
    fn test_absolute_bounds() {
        let range = TimeRangeSpec::new("2023-11-14T00:00:00Z", "2023-11-14T01:00:00Z")
            .resolve_at(NOW)
            .unwrap();
        assert_eq!(range.latest_ms - range.earliest_ms, 3_600_000);
    }

    #[test]
    fn test_epoch_bounds() {
        let range = TimeRangeSpec::new("1700000000", "1700000060000")
            .resolve_at(NOW)
            .unwrap();
        assert_eq!(range.earliest_ms, 1_700_000_000_000);
        assert_eq!(range.latest_ms, 1_700_000_060_000);
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert!(TimeRangeSpec::new("now", "-1h").resolve_at(NOW).is_err());
    }

    #[test]
    fn test_parse_span() {
        assert_eq!(parse_span("5m"), Some(Span::Time(300_000)));
        assert_eq!(parse_span("1h"), Some(Span::Time(3_600_000)));
        assert_eq!(parse_span("100"), Some(Span::Numeric(100.0)));
        assert_eq!(parse_span("banana"), None);
    }

    #[test]
    fn test_truncate_to_span() {
        assert_eq!(truncate_to_span(1_700_000_123_456, 60_000), 1_700_000_100_000);
    }
}
