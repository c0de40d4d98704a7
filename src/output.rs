use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::models::{Event, COLUMNS};
use crate::utils;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Flat text form of one row: lists as JSON arrays, booleans as `true`/`false`.
pub fn flat_record(event: &Event) -> Vec<String> {
    let row = event.to_row();
    COLUMNS
        .iter()
        .map(|column| match row.get(*column) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        })
        .collect()
}

pub fn write_csv(path: &Path, events: &[Event]) -> Result<(), OutputError> {
    utils::ensure_parent(path);
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(COLUMNS)?;
    for event in events {
        writer.write_record(flat_record(event))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_csv(path: &Path) -> Result<Vec<Event>, OutputError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let mut events = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| (header.trim().to_string(), Value::String(value.to_string())))
            .collect();
        events.push(Event::from_row(&row));
    }
    Ok(events)
}

pub fn to_json(events: &[Event]) -> Result<String, OutputError> {
    Ok(serde_json::to_string_pretty(events)?)
}

pub fn write_json(path: &Path, events: &[Event]) -> Result<(), OutputError> {
    utils::ensure_parent(path);
    let mut file = File::create(path)?;
    file.write_all(to_json(events)?.as_bytes())?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Appends events to a CSV file as they are produced, flushing after each
/// row so an interrupted run leaves a valid file behind.
pub struct CsvCheckpoint {
    path: PathBuf,
    writer: csv::Writer<File>,
    seen: HashSet<String>,
    written: usize,
}

impl CsvCheckpoint {
    pub fn create(path: &Path) -> Result<Self, OutputError> {
        utils::ensure_parent(path);
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(COLUMNS)?;
        writer.flush()?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            seen: HashSet::new(),
            written: 0,
        })
    }

    /// Writes `event` unless its identity was already written. Keyless events
    /// are always written.
    pub fn append(&mut self, event: &Event) -> Result<bool, OutputError> {
        if let Some(key) = event.identity_key() {
            if !self.seen.insert(key) {
                return Ok(false);
            }
        }
        self.writer.write_record(flat_record(event))?;
        self.writer.flush()?;
        self.written += 1;
        debug!(path = %self.path.display(), written = self.written, "checkpointed event");
        Ok(true)
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> Event {
        Event {
            event_name: name.into(),
            event_url: format!("https://lu.ma/{name}"),
            event_description: "Line one, \"quoted\"\nline two".into(),
            usage_tags: vec!["networking".into()],
            women_specific: true,
            ..Event::default()
        }
    }

    #[test]
    fn csv_uses_fixed_columns_and_flat_forms() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("events.csv");
        write_csv(&path, &[sample("a")]).expect("write");

        let text = std::fs::read_to_string(&path).expect("read");
        let header = text.lines().next().expect("header");
        assert_eq!(header, COLUMNS.join(","));
        assert!(text.contains(r#""[""networking""]""#));
        assert!(text.contains(",true,false,"));

        let back = read_csv(&path).expect("read back");
        assert_eq!(back, vec![sample("a")]);
    }

    #[test]
    fn checkpoint_skips_repeated_identities() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.csv");
        let mut checkpoint = CsvCheckpoint::create(&path).expect("create");
        assert!(checkpoint.append(&sample("a")).expect("append"));
        assert!(!checkpoint.append(&sample("a")).expect("append"));
        assert!(checkpoint.append(&Event::default()).expect("append"));
        assert!(checkpoint.append(&Event::default()).expect("append"));
        assert_eq!(checkpoint.written(), 3);

        // Readable while the writer is still open.
        assert_eq!(read_csv(&path).expect("read").len(), 3);
    }

    #[test]
    fn json_is_an_array_of_events() {
        let json = to_json(&[sample("a")]).expect("json");
        let value: Value = serde_json::from_str(&json).expect("parse");
        assert_eq!(value[0]["event_name"], "a");
        assert_eq!(value[0]["usage_tags"][0], "networking");
    }
}
