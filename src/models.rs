use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::scraping::base;

pub const KEY_SEPARATOR: &str = " | ";

/// Flat-table column order shared by the CSV file and the remote rows.
pub const COLUMNS: [&str; 17] = [
    "event_name",
    "event_date",
    "event_time",
    "event_location",
    "event_description",
    "hosted_by",
    "price",
    "event_url",
    "event_tags",
    "usage_tags",
    "industry_tags",
    "event_type",
    "outfit_category",
    "women_specific",
    "invite_only",
    "event_name_and_link",
    "updated_at",
];

pub const BOOL_COLUMNS: [&str; 2] = ["women_specific", "invite_only"];

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Event {
    pub event_name: String,
    pub event_date: String, // Mon-DD-YYYY
    pub event_time: String, // H:MM am|pm, or empty
    pub event_location: String,
    pub event_description: String,
    pub hosted_by: String,
    pub price: String, // bare number, "0" when free or unknown
    pub event_url: String,
    pub event_tags: Vec<String>,
    pub usage_tags: Vec<String>,
    pub industry_tags: Vec<String>,
    pub event_type: String,
    pub outfit_category: String,
    pub women_specific: bool,
    pub invite_only: bool,
    pub updated_at: String,
}

impl Event {
    /// `name | url`, or `None` when both halves are empty.
    pub fn identity_key(&self) -> Option<String> {
        let name = self.event_name.trim();
        let url = self.event_url.trim();
        if name.is_empty() && url.is_empty() {
            return None;
        }
        Some(format!("{name}{KEY_SEPARATOR}{url}"))
    }

    /// Every column as JSON; list columns as arrays, booleans as booleans.
    pub fn to_row(&self) -> Map<String, Value> {
        let mut row = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let key = self
            .identity_key()
            .map(Value::String)
            .unwrap_or(Value::Null);
        row.insert("event_name_and_link".to_string(), key);
        row
    }

    /// Lenient inverse of [`Event::to_row`]: accepts native JSON values or the
    /// flat-text forms found in CSV files and text-typed tables.
    pub fn from_row(row: &Map<String, Value>) -> Self {
        let text = |column: &str| row.get(column).map(value_text).unwrap_or_default();
        let list = |column: &str| row.get(column).map(value_list).unwrap_or_default();
        let flag = |column: &str| row.get(column).map(value_bool).unwrap_or(false);
        Event {
            event_name: text("event_name"),
            event_date: text("event_date"),
            event_time: text("event_time"),
            event_location: text("event_location"),
            event_description: text("event_description"),
            hosted_by: text("hosted_by"),
            price: text("price"),
            event_url: text("event_url"),
            event_tags: list("event_tags"),
            usage_tags: list("usage_tags"),
            industry_tags: list("industry_tags"),
            event_type: text("event_type"),
            outfit_category: text("outfit_category"),
            women_specific: flag("women_specific"),
            invite_only: flag("invite_only"),
            updated_at: text("updated_at"),
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) if s.eq_ignore_ascii_case("nan") => String::new(),
        Value::String(s) => s.trim().to_string(),
        // Hosts were once stored as {"name": ...}.
        Value::Object(map) => map.get("name").map(value_text).unwrap_or_default(),
        other => other.to_string(),
    }
}

fn value_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => base::coerce_bool(s),
        _ => false,
    }
}

fn value_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(value_text)
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => parse_list_text(s),
        _ => Vec::new(),
    }
}

/// Parses a JSON array, tolerating the single-quoted form older files used.
pub fn parse_list_text(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.starts_with('[') || !trimmed.ends_with(']') {
        return Vec::new();
    }
    let parsed = serde_json::from_str::<Vec<String>>(trimmed)
        .or_else(|_| serde_json::from_str::<Vec<String>>(&trimmed.replace('\'', "\"")));
    match parsed {
        Ok(items) => items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(err) => {
            tracing::warn!("could not parse tag list {trimmed:?}: {err}");
            Vec::new()
        }
    }
}
