use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::models::{Event, KEY_SEPARATOR};
use crate::store::StoredRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepPolicy {
    #[default]
    First,
    Last,
}

/// Which fields make two rows "the same event".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum DedupeBy {
    #[default]
    NameAndLink,
    Url,
    Name,
    NameDate,
    NameLocation,
}

impl DedupeBy {
    pub fn key(self, event: &Event) -> Option<String> {
        let name = event.event_name.trim().to_lowercase();
        let url = event.event_url.trim();
        let joined = |other: &str| {
            let other = other.trim();
            (!name.is_empty() && !other.is_empty())
                .then(|| format!("{name}{KEY_SEPARATOR}{}", other.to_lowercase()))
        };
        match self {
            DedupeBy::NameAndLink => event.identity_key(),
            DedupeBy::Url => (!url.is_empty()).then(|| url.to_string()),
            DedupeBy::Name => (!name.is_empty()).then(|| name.clone()),
            DedupeBy::NameDate => joined(&event.event_date),
            DedupeBy::NameLocation => joined(&event.event_location),
        }
    }
}

#[derive(Debug)]
pub struct Deduplicated {
    pub events: Vec<Event>,
    pub removed: usize,
}

/// Keeps one event per key. Events without a key always survive. Survivors
/// stay in input order.
pub fn dedupe(events: Vec<Event>, keep: KeepPolicy, by: DedupeBy) -> Deduplicated {
    let keys: Vec<Option<String>> = events.iter().map(|event| by.key(event)).collect();
    let winners: HashSet<usize> = match keep {
        KeepPolicy::First => {
            let mut seen: HashSet<&str> = HashSet::new();
            let mut winners = HashSet::new();
            for (idx, key) in keys.iter().enumerate() {
                let fresh = match key {
                    Some(key) => seen.insert(key.as_str()),
                    None => true,
                };
                if fresh {
                    winners.insert(idx);
                }
            }
            winners
        }
        KeepPolicy::Last => {
            let mut last: HashMap<&str, usize> = HashMap::new();
            for (idx, key) in keys.iter().enumerate() {
                if let Some(key) = key {
                    last.insert(key.as_str(), idx);
                }
            }
            keys.iter()
                .enumerate()
                .filter(|(idx, key)| match key {
                    Some(key) => last.get(key.as_str()) == Some(idx),
                    None => true,
                })
                .map(|(idx, _)| idx)
                .collect()
        }
    };

    let total = events.len();
    let events: Vec<Event> = events
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| winners.contains(idx))
        .map(|(_, event)| event)
        .collect();
    let removed = total - events.len();
    Deduplicated { events, removed }
}

/// Groups of duplicated keys, for dry-run reporting.
pub fn duplicate_groups(events: &[Event], by: DedupeBy) -> Vec<(String, usize)> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for key in events.iter().filter_map(|event| by.key(event)) {
        let count = counts.entry(key.clone()).or_insert(0);
        if *count == 0 {
            order.push(key);
        }
        *count += 1;
    }
    order
        .into_iter()
        .filter_map(|key| {
            let count = counts.get(&key).copied().unwrap_or(0);
            (count > 1).then_some((key, count))
        })
        .collect()
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub groups: usize,
    pub keep: Vec<String>,
    pub delete: Vec<String>,
}

/// Scores how complete a stored record looks. `newest_day` is the most recent
/// update day among the records it competes with.
pub fn quality_score(event: &Event, newest_day: Option<NaiveDate>) -> u32 {
    let mut score = 0;
    let name = event.event_name.trim();
    let name_len = name.chars().count();
    if name_len > 10 {
        score += 10;
    }
    if name_len > 20 {
        score += 5;
    }
    if !name.starts_with('[') && !name.ends_with(']') {
        score += 20;
    }
    if event.event_description.trim().chars().count() > 50 {
        score += 10;
    }
    let location = event.event_location.trim();
    if !location.is_empty() && !location.eq_ignore_ascii_case("nan") {
        score += 5;
    }
    if newest_day.is_some() && updated_day(event) == newest_day {
        score += 15;
    }
    score
}

/// Offset timestamps are compared as UTC days; naive ones (no offset) and
/// bare dates are taken as written.
fn updated_day(event: &Event) -> Option<NaiveDate> {
    let stamp = event.updated_at.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(stamp) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.date());
    }
    stamp
        .get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

fn reconcile_url(event: &Event) -> Option<&str> {
    let url = event.event_url.trim();
    (!url.is_empty() && url != "#").then_some(url)
}

/// For every URL shared by several stored records, keeps the best-scoring one
/// and marks the rest for deletion. Ties go to the earlier record.
pub fn plan_reconciliation(records: &[StoredRecord]) -> ReconcilePlan {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&StoredRecord>> = HashMap::new();
    for record in records {
        let Some(url) = reconcile_url(&record.event) else {
            continue;
        };
        let group = groups.entry(url).or_default();
        if group.is_empty() {
            order.push(url);
        }
        group.push(record);
    }

    let mut plan = ReconcilePlan::default();
    for url in order {
        let Some(group) = groups.get(url) else {
            continue;
        };
        if group.len() < 2 {
            continue;
        }
        plan.groups += 1;
        let newest_day = group.iter().filter_map(|r| updated_day(&r.event)).max();
        let mut best = 0;
        let mut best_score = quality_score(&group[0].event, newest_day);
        for (idx, record) in group.iter().enumerate().skip(1) {
            let score = quality_score(&record.event, newest_day);
            if score > best_score {
                best = idx;
                best_score = score;
            }
        }
        for (idx, record) in group.iter().enumerate() {
            if idx == best {
                plan.keep.push(record.id.clone());
            } else {
                plan.delete.push(record.id.clone());
            }
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, url: &str) -> Event {
        Event {
            event_name: name.into(),
            event_url: url.into(),
            ..Event::default()
        }
    }

    fn record(id: &str, event: Event) -> StoredRecord {
        StoredRecord {
            id: id.into(),
            event,
        }
    }

    #[test]
    fn first_seen_wins_by_default() {
        let mut first = event("A", "u1");
        first.price = "1".into();
        let mut second = event("A", "u1");
        second.price = "2".into();
        let batch = vec![first, event("B", "u2"), second];

        let out = dedupe(batch.clone(), KeepPolicy::default(), DedupeBy::default());
        assert_eq!(out.removed, 1);
        let kept: Vec<_> = out
            .events
            .iter()
            .filter(|e| e.identity_key().as_deref() == Some("A | u1"))
            .collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].price, "1");

        let out = dedupe(batch, KeepPolicy::Last, DedupeBy::NameAndLink);
        assert_eq!(out.events.len(), 2);
        assert_eq!(out.events[0].event_name, "B");
        assert_eq!(out.events[1].price, "2");
    }

    #[test]
    fn keyless_events_pass_through() {
        let batch = vec![Event::default(), Event::default(), event("A", "")];
        let out = dedupe(batch, KeepPolicy::First, DedupeBy::NameAndLink);
        assert_eq!(out.events.len(), 3);
        assert_eq!(out.removed, 0);
    }

    #[test]
    fn alternative_keys() {
        let mut a = event("Demo Night", "u1");
        a.event_date = "Oct-10-2025".into();
        let mut b = event("demo night", "u2");
        b.event_date = "Oct-10-2025".into();
        let batch = vec![a, b];
        assert_eq!(
            dedupe(batch.clone(), KeepPolicy::First, DedupeBy::NameDate).removed,
            1
        );
        assert_eq!(dedupe(batch.clone(), KeepPolicy::First, DedupeBy::Url).removed, 0);
        assert_eq!(
            duplicate_groups(&batch, DedupeBy::Name),
            vec![("demo night".to_string(), 2)]
        );
    }

    #[test]
    fn reconciliation_keeps_most_complete_record() {
        let mut placeholder = event("[Untitled]", "https://lu.ma/x");
        placeholder.updated_at = "2025-10-01T08:00:00+00:00".into();
        let mut rich = event("AI Founders Breakfast at SoMa", "https://lu.ma/x");
        rich.event_description = "A long description of the breakfast, the speakers and the venue.".into();
        rich.event_location = "SoMa".into();
        rich.updated_at = "2025-09-20T08:00:00+00:00".into();
        let mut lone = event("Lone", "https://lu.ma/y");
        lone.updated_at = "2025-10-01T08:00:00+00:00".into();

        let records = vec![
            record("1", placeholder),
            record("2", rich),
            record("3", lone),
            record("4", event("Hash link", "#")),
            record("5", event("Hash link", "#")),
        ];
        let plan = plan_reconciliation(&records);
        assert_eq!(plan.groups, 1);
        assert_eq!(plan.keep, vec!["2"]);
        assert_eq!(plan.delete, vec!["1"]);
    }

    #[test]
    fn ties_keep_earlier_record() {
        let records = vec![
            record("10", event("Same", "u")),
            record("11", event("Same", "u")),
        ];
        let plan = plan_reconciliation(&records);
        assert_eq!(plan.keep, vec!["10"]);
        assert_eq!(plan.delete, vec!["11"]);
    }

    #[test]
    fn naive_timestamps_favour_newest_record() {
        let mut older = event("Same", "u");
        older.updated_at = "2025-09-01T10:00:00.123456".into();
        let mut newer = event("Same", "u");
        newer.updated_at = "2025-09-22T10:00:00.123456".into();
        let plan = plan_reconciliation(&[record("1", older), record("2", newer)]);
        assert_eq!(plan.keep, vec!["2"]);
        assert_eq!(plan.delete, vec!["1"]);

        let mut dated = event("Same", "u");
        dated.updated_at = "2025-09-22 08:15:00".into();
        assert_eq!(updated_day(&dated), NaiveDate::from_ymd_opt(2025, 9, 22));
    }

    #[test]
    fn score_components() {
        let mut e = event("A sufficiently long event name", "u");
        assert_eq!(quality_score(&e, None), 35);
        e.event_location = "nan".into();
        assert_eq!(quality_score(&e, None), 35);
        e.updated_at = "2025-10-01T23:00:00-07:00".into();
        let day = NaiveDate::from_ymd_opt(2025, 10, 2);
        assert_eq!(quality_score(&e, day), 50);
    }
}
