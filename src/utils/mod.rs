use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;

pub const DISPLAY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SPARK_BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

static MARKDOWN_HEADING: OnceLock<Regex> = OnceLock::new();
static WHITESPACE_RUN: OnceLock<Regex> = OnceLock::new();

fn markdown_heading_re() -> &'static Regex {
    MARKDOWN_HEADING.get_or_init(|| Regex::new(r"(?m)^#{1,6}\s.*$").expect("static pattern"))
}

fn whitespace_run_re() -> &'static Regex {
    WHITESPACE_RUN.get_or_init(|| Regex::new(r"\s+").expect("static pattern"))
}

/// Parses the timestamp shapes the backend emits: RFC 3339 with an offset,
/// zone-less `LocalDateTime` values with optional fractions, and bare dates.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let raw = value.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn fmt_date_time(value: Option<&NaiveDateTime>) -> String {
    match value {
        Some(dt) => dt.format(DISPLAY_DATE_FORMAT).to_string(),
        None => String::new(),
    }
}

pub fn round(n: f64, digits: u32) -> f64 {
    let k = 10f64.powi(digits as i32);
    (n * k).round() / k
}

/// Average of the finite values, rounded to one digit.
pub fn avg(nums: &[f64]) -> Option<f64> {
    let valid: Vec<f64> = nums.iter().copied().filter(|x| x.is_finite()).collect();
    if valid.is_empty() {
        return None;
    }
    Some(round(valid.iter().sum::<f64>() / valid.len() as f64, 1))
}

pub fn sum(nums: &[f64]) -> Option<f64> {
    let valid: Vec<f64> = nums.iter().copied().filter(|x| x.is_finite()).collect();
    if valid.is_empty() {
        return None;
    }
    Some(valid.iter().sum())
}

/// RFC 4180 field escape. `None` renders as an empty field.
pub fn csv_escape(value: Option<&str>) -> String {
    let s = match value {
        Some(s) => s,
        None => return String::new(),
    };
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn collapse_whitespace(value: &str) -> String {
    whitespace_run_re().replace_all(value, " ").trim().to_string()
}

/// Drops markdown heading lines and compacts the rest onto one line.
pub fn strip_markdown_headings(value: &str) -> String {
    let without = markdown_heading_re().replace_all(value, "");
    collapse_whitespace(&without)
}

/// Renders numbers without a trailing `.0` for whole values.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", round(n, 2))
    }
}

pub fn format_signed(n: f64) -> String {
    if n >= 0.0 {
        format!("+{}", format_number(n))
    } else {
        format_number(n)
    }
}

pub fn sparkline(values: &[f64]) -> String {
    let valid: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if valid.is_empty() {
        return String::new();
    }
    let max = valid.iter().copied().fold(f64::MIN, f64::max);
    let min = valid.iter().copied().fold(f64::MAX, f64::min);
    let top = SPARK_BARS.len() - 1;
    valid
        .iter()
        .map(|v| {
            if max == min {
                SPARK_BARS[top / 2]
            } else {
                let idx = ((v - min) / (max - min) * top as f64).round() as usize;
                SPARK_BARS[idx.min(top)]
            }
        })
        .collect()
}

pub fn parse_id_csv(value: &str) -> Result<Vec<i64>, String> {
    let raw = value.trim();
    if raw.is_empty() {
        return Err("id list is empty".to_string());
    }
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for part in raw.split(',') {
        let item = part.trim();
        if item.is_empty() {
            continue;
        }
        let id: i64 = item.parse().map_err(|_| format!("invalid id '{item}'"))?;
        if seen.insert(id) {
            out.push(id);
        }
    }
    if out.is_empty() {
        return Err("id list is empty".to_string());
    }
    Ok(out)
}
