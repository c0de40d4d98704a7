use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::Row;
use crate::models::Event;
use crate::scraping::base;

const UNTITLED: &str = "Untitled Event";
const UNKNOWN_LOCATION: &str = "TBA";
const UNKNOWN_HOST: &str = "Unknown";
const MIDNIGHT: &str = "00:00:00";

/// Optional reshaping of rows for stores with typed columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Coercions {
    /// Rewrite dates to ISO `YYYY-MM-DD` in this year.
    pub date_year: Option<i32>,
    pub price_numeric: bool,
    /// Rewrite times to 24-hour `HH:MM:SS`.
    pub coerce_time: bool,
    pub no_nulls: bool,
}

pub fn to_payload(event: &Event, coercions: &Coercions) -> Row {
    let mut row = event.to_row();

    if let Some(year) = coercions.date_year {
        let date = iso_date(&event.event_date, year)
            .map(Value::String)
            .unwrap_or(Value::Null);
        row.insert("event_date".into(), date);
    }
    if coercions.price_numeric {
        row.insert(
            "price".into(),
            numeric_price(&event.price).unwrap_or(Value::Null),
        );
    }
    if coercions.coerce_time {
        let time = time_24h(&event.event_time)
            .map(Value::String)
            .unwrap_or(Value::Null);
        row.insert("event_time".into(), time);
    }

    if coercions.no_nulls {
        fill_text(&mut row, "event_name", UNTITLED);
        fill_text(&mut row, "event_location", UNKNOWN_LOCATION);
        fill_text(&mut row, "hosted_by", UNKNOWN_HOST);
        if let Some(year) = coercions.date_year {
            fill_null(&mut row, "event_date", Value::String(format!("{year:04}-10-01")));
        }
        if coercions.coerce_time {
            fill_null(&mut row, "event_time", Value::String(MIDNIGHT.into()));
        }
        if coercions.price_numeric {
            fill_null(&mut row, "price", Value::from(0));
        }
    }
    row
}

fn fill_text(row: &mut Row, column: &str, default: &str) {
    let empty = match row.get(column) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    };
    if empty {
        row.insert(column.into(), Value::String(default.into()));
    }
}

fn fill_null(row: &mut Row, column: &str, default: Value) {
    if matches!(row.get(column), None | Some(Value::Null)) {
        row.insert(column.into(), default);
    }
}

/// `Oct-10-2025` or `Fri Oct 10` to `YYYY-10-10` in `year`.
pub fn iso_date(date: &str, year: i32) -> Option<String> {
    let mut month = None;
    let mut day = None;
    for token in date.split(|c: char| c == '-' || c.is_whitespace()) {
        let token = token.trim_matches(',');
        if month.is_none() {
            if let Some(m) = base::month_number(token) {
                month = Some(m);
                continue;
            }
        }
        if day.is_none() && base::is_day_of_month(token) {
            day = token.parse::<u32>().ok();
        }
    }
    let parsed = NaiveDate::from_ymd_opt(year, month?, day?)?;
    Some(parsed.format("%Y-%m-%d").to_string())
}

pub fn numeric_price(price: &str) -> Option<Value> {
    let trimmed = price.trim().replace(',', "");
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(whole) = trimmed.parse::<i64>() {
        return Some(Value::from(whole));
    }
    let amount = trimmed.parse::<f64>().ok()?;
    Number::from_f64(amount).map(Value::Number)
}

/// `6:30 pm` to `18:30:00`.
pub fn time_24h(time: &str) -> Option<String> {
    let found = base::find_first_time(time)?;
    let (clock, meridiem) = found.split_once(' ')?;
    let (hour, minute) = clock.split_once(':')?;
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    if hour == 0 || hour > 12 || minute > 59 {
        return None;
    }
    let hour = match (meridiem, hour) {
        ("am", 12) => 0,
        ("am", h) => h,
        ("pm", 12) => 12,
        ("pm", h) => h + 12,
        _ => return None,
    };
    Some(format!("{hour:02}:{minute:02}:00"))
}

/// First row wins per conflict value; rows without one are kept.
pub fn dedupe_rows(rows: Vec<Row>, conflict_column: Option<&str>) -> Vec<Row> {
    let Some(column) = conflict_column else {
        return rows;
    };
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| match row.get(column) {
            None | Some(Value::Null) => true,
            Some(value) => seen.insert(value.to_string()),
        })
        .collect()
}

/// Human label for a row in diagnostics.
pub fn row_label(row: &Row, conflict_column: Option<&str>) -> String {
    conflict_column
        .and_then(|column| row.get(column))
        .or_else(|| row.get("event_name"))
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Event {
        Event {
            event_name: "Demo Night".into(),
            event_date: "Oct-10-2025".into(),
            event_time: "6:30 pm".into(),
            price: "12.50".into(),
            ..Event::default()
        }
    }

    #[test]
    fn untouched_without_toggles() {
        let row = to_payload(&sample(), &Coercions::default());
        assert_eq!(row["event_date"], json!("Oct-10-2025"));
        assert_eq!(row["price"], json!("12.50"));
        assert_eq!(row["event_name_and_link"], json!("Demo Night | "));
    }

    #[test]
    fn coerces_typed_columns() {
        let coercions = Coercions {
            date_year: Some(2025),
            price_numeric: true,
            coerce_time: true,
            no_nulls: false,
        };
        let row = to_payload(&sample(), &coercions);
        assert_eq!(row["event_date"], json!("2025-10-10"));
        assert_eq!(row["event_time"], json!("18:30:00"));
        assert_eq!(row["price"], json!(12.5));

        let mut blank = Event::default();
        blank.price = "0".into();
        let row = to_payload(&blank, &coercions);
        assert_eq!(row["event_date"], Value::Null);
        assert_eq!(row["event_time"], Value::Null);
        assert_eq!(row["price"], json!(0));
        assert_eq!(row["event_name_and_link"], Value::Null);
    }

    #[test]
    fn no_nulls_fills_defaults() {
        let coercions = Coercions {
            date_year: Some(2025),
            price_numeric: true,
            coerce_time: true,
            no_nulls: true,
        };
        let row = to_payload(&Event::default(), &coercions);
        assert_eq!(row["event_name"], json!("Untitled Event"));
        assert_eq!(row["event_location"], json!("TBA"));
        assert_eq!(row["hosted_by"], json!("Unknown"));
        assert_eq!(row["event_date"], json!("2025-10-01"));
        assert_eq!(row["event_time"], json!("00:00:00"));
        assert_eq!(row["price"], json!(0));
    }

    #[test]
    fn date_and_time_forms() {
        assert_eq!(iso_date("Fri Oct 3", 2025).as_deref(), Some("2025-10-03"));
        assert_eq!(iso_date("Feb-30-2025", 2025), None);
        assert_eq!(iso_date("garbage", 2025), None);
        assert_eq!(time_24h("12:05 am").as_deref(), Some("00:05:00"));
        assert_eq!(time_24h("12:00 pm").as_deref(), Some("12:00:00"));
        assert_eq!(time_24h("TBA"), None);
    }

    #[test]
    fn rows_dedupe_on_conflict_value() {
        let rows = vec![
            json!({"k": "a", "n": 1}),
            json!({"k": null, "n": 2}),
            json!({"k": "a", "n": 3}),
            json!({"k": null, "n": 4}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect::<Vec<_>>();
        let kept = dedupe_rows(rows, Some("k"));
        let ns: Vec<_> = kept.iter().map(|r| r["n"].clone()).collect();
        assert_eq!(ns, vec![json!(1), json!(2), json!(4)]);
    }
}
