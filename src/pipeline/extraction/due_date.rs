//! Due-date extraction ("Vencimento").

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::{Captures, Regex};

use super::strategy::{first_hit, Strategy};

const DATE: &str = r"(\d{1,2}[/.\-]\d{1,2}[/.\-]\d{2,4})";

static DUE_DATE_STRATEGIES: LazyLock<Vec<Strategy<NaiveDate>>> = LazyLock::new(|| {
    vec![
        Strategy::new(
            "due_date_label",
            &format!(r"(?i)data\s+de\s+vencimento[^\d\n]{{0,20}}{DATE}"),
            parse_group,
        ),
        Strategy::new("due_inline", &format!(r"(?i)vencimento[^\d\n]{{0,20}}{DATE}"), parse_group),
        Strategy::new(
            "due_next_line",
            &format!(r"(?i)vencimento[^\n]*\n[^\d\n]{{0,40}}{DATE}"),
            parse_group,
        ),
        Strategy::new("venc_abbrev", &format!(r"(?i)\bvenc\.?[^\d\n]{{0,10}}{DATE}"), parse_group),
    ]
});

static DATE_PARTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{2}|\d{4})$").expect("Invalid date pattern")
});

fn parse_group(caps: &Captures<'_>) -> Option<NaiveDate> {
    parse_flexible_date(caps.get(1)?.as_str())
}

/// Parse `d/m/y` with `/`, `.` or `-` separators and a 2- or 4-digit year.
/// Two-digit years are taken as 20xx.
pub fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let caps = DATE_PARTS.captures(raw.trim())?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year_raw = &caps[3];
    let mut year: i32 = year_raw.parse().ok()?;
    if year_raw.len() == 2 {
        year += 2000;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn extract_due_date(text: &str) -> Option<NaiveDate> {
    let hit = first_hit(&DUE_DATE_STRATEGIES, text)?;
    tracing::debug!(strategy = hit.strategy, "Due date found");
    Some(hit.value)
}
