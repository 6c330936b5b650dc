// ABOUTME: Trigger phrase detection and parameter parsing for history queries
// ABOUTME: Turns "<trigger> 100" / "<trigger> 12小时" into a count or a duration

use crate::config::RoomHistoryConfig;
use crate::engine::FilterSpec;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// Tokens that mark the trailing number as a duration in hours
pub const DURATION_MARKERS: &[&str] = &["小时", "hours", "hour", "hrs", "hr", "h"];

/// Parameters extracted from a trigger message.
///
/// After a non-default parse exactly one of `limit` / `hours` is set. The
/// defaults set both: a time-windowed query capped at a count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryParams {
    pub limit: Option<usize>,
    pub hours: Option<u32>,
}

impl QueryParams {
    pub fn defaults(config: &RoomHistoryConfig) -> Self {
        Self {
            limit: Some(config.default_limit),
            hours: Some(config.default_hours),
        }
    }

    /// Human-readable description used in report headers
    pub fn describe(&self) -> String {
        match (self.limit, self.hours) {
            (Some(limit), Some(hours)) => {
                format!("last {} messages within {} hours", limit, hours)
            }
            (Some(limit), None) => format!("last {} messages", limit),
            (None, Some(hours)) => format!("last {} hours", hours),
            (None, None) => "all messages".to_string(),
        }
    }

    /// Filter for the engine. An unset limit becomes `unbounded_limit` and
    /// the time floor does the real bounding.
    pub fn to_filter_spec(&self, unbounded_limit: usize) -> FilterSpec {
        let spec = FilterSpec::new(self.limit.unwrap_or(unbounded_limit).max(1));
        match self.hours {
            Some(hours) => spec.within(Duration::from_secs(u64::from(hours) * 3600)),
            None => spec,
        }
    }
}

/// True if the body carries the trigger phrase anywhere
pub fn contains_trigger(body: &str, trigger: &str) -> bool {
    !trigger.is_empty() && body.contains(trigger)
}

static DIGIT_RUN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\d+").ok());

/// ASCII or full-width (U+FF10..U+FF19) digit value
fn digit_value(c: char) -> Option<char> {
    match c {
        '0'..='9' => Some(c),
        '０'..='９' => char::from_digit(c as u32 - '０' as u32, 10),
        _ => None,
    }
}

/// First run of digits as a number. Full-width digits from CJK input
/// methods count; any other script's digits make the run unusable.
fn first_number<T: std::str::FromStr>(text: &str) -> Option<T> {
    let run = (*DIGIT_RUN).as_ref()?.find(text)?.as_str();
    let ascii = run.chars().map(digit_value).collect::<Option<String>>()?;
    ascii.parse().ok()
}

fn has_duration_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    DURATION_MARKERS.iter().any(|m| lower.contains(m))
}

/// Parse the parameters that follow the trigger phrase.
///
/// - nothing after the trigger: both defaults
/// - a duration marker present: first digit run as `hours`
/// - otherwise: first digit run as `limit`
/// - no usable number (missing, zero, or overflowing): both defaults
pub fn parse_query_params(content: &str, config: &RoomHistoryConfig) -> QueryParams {
    let params = content.replace(&config.trigger_keyword, "");
    let params = params.trim();

    if params.is_empty() {
        return QueryParams::defaults(config);
    }

    let parsed = if has_duration_marker(params) {
        first_number::<u32>(params)
            .filter(|h| *h > 0)
            .map(|hours| QueryParams {
                limit: None,
                hours: Some(hours),
            })
    } else {
        first_number::<usize>(params)
            .filter(|l| *l > 0)
            .map(|limit| QueryParams {
                limit: Some(limit),
                hours: None,
            })
    };

    parsed.unwrap_or_else(|| {
        tracing::debug!(params = %params, "No usable number after trigger, using defaults");
        QueryParams::defaults(config)
    })
}
