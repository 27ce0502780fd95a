// period.rs
// Reporting period selection from query parameters.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeriodQuery {
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub all_time: Option<String>,
}

/// Inclusive period: `end` is the last microsecond of its day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Period {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub label: String,
    pub from: String,
    pub to: String,
}

impl Period {
    fn new(start: NaiveDateTime, end: NaiveDateTime, label: String) -> Self {
        Period {
            from: start.date().format("%Y-%m-%d").to_string(),
            to: end.date().format("%Y-%m-%d").to_string(),
            start,
            end,
            label,
        }
    }

    /// `YYYY-MM` keys of every month the period touches.
    pub fn months(&self) -> Vec<String> {
        months_between(self.start.date(), self.end.date())
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Validates a payroll month string (`YYYY-MM`, years 2000..=2100).
pub fn normalize_month(raw: &str) -> Result<String, String> {
    let raw = raw.trim();
    let bytes = raw.as_bytes();
    if raw.len() != 7 || bytes[4] != b'-' {
        return Err("Invalid month format. Use YYYY-MM.".to_string());
    }
    let year: i32 = raw[..4]
        .parse()
        .map_err(|_| "Invalid month format. Use YYYY-MM.".to_string())?;
    let month: u32 = raw[5..]
        .parse()
        .map_err(|_| "Invalid month format. Use YYYY-MM.".to_string())?;
    if !(1..=12).contains(&month) {
        return Err("Invalid month.".to_string());
    }
    if !(2000..=2100).contains(&year) {
        return Err("Invalid year.".to_string());
    }
    Ok(raw.to_string())
}

pub fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN))
}

pub fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

pub fn months_between(start: NaiveDate, end: NaiveDate) -> Vec<String> {
    let mut months = Vec::new();
    let (mut y, mut m) = (start.year(), start.month());
    while (y, m) <= (end.year(), end.month()) {
        months.push(format!("{y:04}-{m:02}"));
        if m == 12 {
            y += 1;
            m = 1;
        } else {
            m += 1;
        }
    }
    months
}

fn year_period(year: i32) -> Option<Period> {
    let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let end = NaiveDate::from_ymd_opt(year, 12, 31)?;
    Some(Period::new(
        start_of_day(start),
        end_of_day(end),
        format!("{year} Full Year"),
    ))
}

fn default_period(now: NaiveDateTime) -> Period {
    let year = now.year();
    year_period(year).unwrap_or_else(|| Period::new(now, now, format!("{year} Full Year")))
}

fn custom_period(a: NaiveDate, b: NaiveDate) -> Period {
    let (start, end) = if b < a { (b, a) } else { (a, b) };
    let label = format!(
        "{} - {}",
        start.format("%d %b %Y"),
        end.format("%d %b %Y")
    );
    Period::new(start_of_day(start), end_of_day(end), label)
}

fn is_truthy(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|v| v.trim().to_lowercase()).as_deref(),
        Some("1" | "true" | "yes")
    )
}

/// Resolves the query into a period. `now` is injected so callers and tests agree on "today".
pub fn parse_period(q: &PeriodQuery, now: NaiveDateTime) -> Period {
    let range = q
        .range
        .as_deref()
        .map(|r| r.trim().to_lowercase())
        .unwrap_or_default();
    let from = q.from.as_deref().and_then(parse_date);
    let to = q.to.as_deref().and_then(parse_date);
    let year = q
        .year
        .as_deref()
        .and_then(|y| y.trim().parse::<i32>().ok())
        .and_then(year_period);

    if range == "all_time" || is_truthy(q.all_time.as_deref()) {
        let start = NaiveDate::from_ymd_opt(2000, 1, 1)
            .map(start_of_day)
            .unwrap_or(now);
        return Period::new(start, now, "All Time".to_string());
    }

    match range.as_str() {
        "this_month" => {
            let first = now.date().with_day(1).unwrap_or(now.date());
            Period::new(
                start_of_day(first),
                end_of_day(now.date()),
                first.format("%B %Y").to_string(),
            )
        }
        "year" => year.unwrap_or_else(|| default_period(now)),
        "custom" => match (from, to) {
            (Some(a), Some(b)) => custom_period(a, b),
            _ => default_period(now),
        },
        _ => {
            if let Some(p) = year {
                return p;
            }
            match (from, to) {
                (Some(a), Some(b)) => custom_period(a, b),
                _ => default_period(now),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
    }

    fn query(range: &str, year: &str, from: &str, to: &str) -> PeriodQuery {
        let opt = |s: &str| (!s.is_empty()).then(|| s.to_string());
        PeriodQuery {
            range: opt(range),
            year: opt(year),
            from: opt(from),
            to: opt(to),
            all_time: None,
        }
    }

    #[test]
    fn period_serializes_with_its_bounds() {
        let p = parse_period(&query("custom", "", "2024-02-01", "2024-02-29"), now());
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["from"], "2024-02-01");
        assert_eq!(v["start"], "2024-02-01T00:00:00");
        assert!(v["end"].as_str().unwrap().starts_with("2024-02-29T23:59:59"));
    }

    #[test]
    fn defaults_to_current_full_year() {
        let p = parse_period(&PeriodQuery::default(), now());
        assert_eq!(p.label, "2024 Full Year");
        assert_eq!(p.from, "2024-01-01");
        assert_eq!(p.to, "2024-12-31");
        assert_eq!(p.end.time(), NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap());
    }

    #[test]
    fn custom_range_is_swapped_and_inclusive() {
        let p = parse_period(&query("custom", "", "2024-03-31", "2024-01-01"), now());
        assert_eq!(p.label, "01 Jan 2024 - 31 Mar 2024");
        assert_eq!(p.from, "2024-01-01");
        assert_eq!(p.to, "2024-03-31");
        assert_eq!(p.months(), vec!["2024-01", "2024-02", "2024-03"]);
    }

    #[test]
    fn named_ranges() {
        assert_eq!(parse_period(&query("all_time", "", "", ""), now()).label, "All Time");
        assert_eq!(parse_period(&query("this_month", "", "", ""), now()).label, "March 2024");
        assert_eq!(parse_period(&query("year", "2022", "", ""), now()).label, "2022 Full Year");
        assert_eq!(parse_period(&query("year", "abc", "", ""), now()).label, "2024 Full Year");
        assert_eq!(parse_period(&query("", "2021", "", ""), now()).label, "2021 Full Year");
    }

    #[test]
    fn from_and_to_without_range_act_as_custom() {
        let p = parse_period(&query("", "", "2024-02-01", "2024-02-10"), now());
        assert_eq!(p.label, "01 Feb 2024 - 10 Feb 2024");
        let p = parse_period(&query("", "", "2024-02-01", ""), now());
        assert_eq!(p.label, "2024 Full Year");
    }

    #[test]
    fn month_validation() {
        assert_eq!(normalize_month("2024-07").unwrap(), "2024-07");
        assert!(normalize_month("2024-13").is_err());
        assert!(normalize_month("1999-01").is_err());
        assert!(normalize_month("202407").is_err());
    }

    #[test]
    fn months_cross_year_boundary() {
        let a = NaiveDate::from_ymd_opt(2023, 11, 20).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(months_between(a, b), vec!["2023-11", "2023-12", "2024-01"]);
    }
}
