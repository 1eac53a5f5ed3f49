use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeDelta, TimeZone, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForecastKind {
    Daily,
    Hourly,
}

impl ForecastKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ForecastKind::Daily => "daily",
            ForecastKind::Hourly => "hourly",
        }
    }
}

impl fmt::Display for ForecastKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One slot of a provider forecast, either a day or an hour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    pub datetime: DateTime<FixedOffset>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default, rename = "templow", alias = "temperature_low")]
    pub temperature_low: Option<f64>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub precipitation_probability: Option<f64>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

fn parse_weekday(token: &str) -> Option<Weekday> {
    match token {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Resolves `today`, `tomorrow` or a weekday name into a calendar date
/// relative to `now`. A weekday resolves to its next occurrence, which is
/// today when `now` already falls on it.
///
/// Returns `None` for anything else; the caller then skips date filtering.
pub fn resolve_target_date<Tz: TimeZone>(token: &str, now: &DateTime<Tz>) -> Option<NaiveDate> {
    let token = token.trim().to_lowercase();
    let today = now.date_naive();

    match token.as_str() {
        "today" => Some(today),
        "tomorrow" => today.succ_opt(),
        other => {
            let target = parse_weekday(other)?;
            let days_ahead = (target.num_days_from_monday() + 7
                - today.weekday().num_days_from_monday())
                % 7;
            today.checked_add_signed(TimeDelta::days(days_ahead.into()))
        }
    }
}

/// Keeps the entries that fall on `target` once converted to `tz`, in their
/// original order.
pub fn filter_by_date<Tz: TimeZone>(
    entries: Vec<ForecastEntry>,
    target: NaiveDate,
    tz: &Tz,
) -> Vec<ForecastEntry> {
    entries
        .into_iter()
        .filter(|entry| entry.datetime.with_timezone(tz).date_naive() == target)
        .collect()
}

/// Labels an hourly slot as the hour it starts through the next one, e.g.
/// `3pm-4pm`.
pub fn time_label<Tz>(datetime: &DateTime<FixedOffset>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let start = datetime.with_timezone(tz);
    let end = start.clone() + TimeDelta::hours(1);

    format!(
        "{}-{}",
        start.format("%-I%P"),
        end.format("%-I%P")
    )
}

/// Labels a daily slot with its weekday, prefixed with `Today` when it falls
/// on the same date as `now`.
pub fn date_label<Tz>(datetime: &DateTime<FixedOffset>, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let local = datetime.with_timezone(&now.timezone());
    let weekday = local.format("%A").to_string();

    if local.date_naive() == now.date_naive() {
        format!("Today ({})", weekday)
    } else {
        weekday
    }
}

/// Describes a precipitation chance in words. Each bucket's upper bound is
/// inclusive.
pub fn precipitation_likelihood(chance: f64) -> &'static str {
    if chance <= 0.0 {
        "none"
    } else if chance <= 5.0 {
        "very unlikely"
    } else if chance <= 15.0 {
        "unlikely"
    } else if chance <= 30.0 {
        "possible"
    } else if chance <= 50.0 {
        "moderate"
    } else if chance <= 70.0 {
        "likely"
    } else if chance <= 85.0 {
        "very likely"
    } else if chance <= 95.0 {
        "extremely likely"
    } else {
        "almost guaranteed"
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn at(rfc3339: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn entry(datetime: &str) -> ForecastEntry {
        serde_json::from_value(json!({ "datetime": datetime })).unwrap()
    }

    // 2024-01-01 is a Monday
    fn monday_morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn today_and_tomorrow() {
        let now = monday_morning();
        assert_eq!(resolve_target_date("today", &now), Some(date(2024, 1, 1)));
        assert_eq!(resolve_target_date("tomorrow", &now), Some(date(2024, 1, 2)));
        assert_eq!(resolve_target_date("Tomorrow", &now), Some(date(2024, 1, 2)));
    }

    #[test]
    fn same_weekday_resolves_to_today() {
        assert_eq!(
            resolve_target_date("monday", &monday_morning()),
            Some(date(2024, 1, 1))
        );
    }

    #[test]
    fn past_weekday_wraps_to_next_week() {
        let tuesday = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();
        assert_eq!(resolve_target_date("monday", &tuesday), Some(date(2024, 1, 8)));
        assert_eq!(resolve_target_date("SUNDAY", &tuesday), Some(date(2024, 1, 7)));
        assert_eq!(resolve_target_date("wednesday", &tuesday), Some(date(2024, 1, 3)));
    }

    #[test]
    fn tomorrow_crosses_year_end() {
        let eve = Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap();
        assert_eq!(resolve_target_date("tomorrow", &eve), Some(date(2024, 1, 1)));
    }

    #[test]
    fn unknown_token_selects_nothing() {
        let now = monday_morning();
        assert_eq!(resolve_target_date("week", &now), None);
        assert_eq!(resolve_target_date("mon", &now), None);
        assert_eq!(resolve_target_date("next friday", &now), None);
    }

    #[test]
    fn filter_keeps_matching_local_dates_in_order() {
        let entries = vec![
            entry("2024-01-01T22:00:00+00:00"),
            entry("2024-01-02T03:00:00+00:00"),
            entry("2024-01-02T01:00:00+00:00"),
            entry("2024-01-03T00:00:00+00:00"),
        ];

        let filtered = filter_by_date(entries, date(2024, 1, 2), &Utc);

        assert_eq!(
            filtered.iter().map(|e| e.datetime).collect::<Vec<_>>(),
            vec![at("2024-01-02T03:00:00+00:00"), at("2024-01-02T01:00:00+00:00")]
        );
    }

    #[test]
    fn filter_uses_the_local_timezone() {
        let entries = vec![entry("2024-01-02T03:00:00+00:00")];
        let new_york = FixedOffset::west_opt(5 * 3600).unwrap();

        assert_eq!(filter_by_date(entries.clone(), date(2024, 1, 1), &new_york).len(), 1);
        assert!(filter_by_date(entries, date(2024, 1, 2), &new_york).is_empty());
    }

    #[test]
    fn hour_labels() {
        assert_eq!(time_label(&at("2024-01-01T15:00:00+00:00"), &Utc), "3pm-4pm");
        assert_eq!(time_label(&at("2024-01-01T11:00:00+00:00"), &Utc), "11am-12pm");
        assert_eq!(time_label(&at("2024-01-01T23:00:00+00:00"), &Utc), "11pm-12am");
        assert_eq!(time_label(&at("2024-01-01T00:00:00+00:00"), &Utc), "12am-1am");
    }

    #[test]
    fn hour_labels_follow_the_local_timezone() {
        let berlin = FixedOffset::east_opt(3600).unwrap();
        assert_eq!(time_label(&at("2024-01-01T15:00:00+00:00"), &berlin), "4pm-5pm");
    }

    #[test]
    fn date_labels() {
        let now = Utc.with_ymd_and_hms(2024, 1, 4, 10, 0, 0).unwrap();
        assert_eq!(date_label(&at("2024-01-04T00:00:00+00:00"), &now), "Today (Thursday)");
        assert_eq!(date_label(&at("2024-01-05T00:00:00+00:00"), &now), "Friday");
    }

    #[test]
    fn precipitation_boundaries() {
        let cases = [
            (0.0, "none"),
            (1.0, "very unlikely"),
            (5.0, "very unlikely"),
            (6.0, "unlikely"),
            (15.0, "unlikely"),
            (16.0, "possible"),
            (30.0, "possible"),
            (31.0, "moderate"),
            (50.0, "moderate"),
            (51.0, "likely"),
            (70.0, "likely"),
            (71.0, "very likely"),
            (85.0, "very likely"),
            (86.0, "extremely likely"),
            (95.0, "extremely likely"),
            (96.0, "almost guaranteed"),
            (100.0, "almost guaranteed"),
        ];

        for (chance, expected) in cases {
            assert_eq!(precipitation_likelihood(chance), expected, "chance {}", chance);
        }
    }

    #[test]
    fn entry_reads_home_assistant_fields() {
        let entry: ForecastEntry = serde_json::from_value(json!({
            "datetime": "2024-01-01T12:00:00+00:00",
            "temperature": 8.5,
            "templow": 2,
            "condition": "rainy",
            "precipitation_probability": 60,
            "wind_speed": 12.0,
        }))
        .unwrap();

        assert_eq!(entry.temperature, Some(8.5));
        assert_eq!(entry.temperature_low, Some(2.0));
        assert_eq!(entry.condition.as_deref(), Some("rainy"));
        assert_eq!(entry.precipitation_probability, Some(60.0));
        assert_eq!(entry.attributes.get("wind_speed"), Some(&json!(12.0)));
    }

    #[test]
    fn entry_accepts_temperature_low_alias_and_nulls() {
        let entry: ForecastEntry = serde_json::from_value(json!({
            "datetime": "2024-01-01T12:00:00Z",
            "temperature": null,
            "temperature_low": 1.5,
        }))
        .unwrap();

        assert_eq!(entry.temperature, None);
        assert_eq!(entry.temperature_low, Some(1.5));
        assert_eq!(entry.condition, None);
    }
}
