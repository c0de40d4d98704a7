use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use tech_week_scrape_lib::browser::{StaticCard, StaticPage};
use tech_week_scrape_lib::config::{AppConfig, ScrollConfig};
use tech_week_scrape_lib::dedupe::KeepPolicy;
use tech_week_scrape_lib::harvest;
use tech_week_scrape_lib::llm::{Categorization, TagClassifier};
use tech_week_scrape_lib::output::{self, CsvCheckpoint};
use tech_week_scrape_lib::scraping::card::CardExtractor;
use tech_week_scrape_lib::scraping::collector::Pause;
use tech_week_scrape_lib::scraping::details::{DetailEnricher, DetailSource, Details};

/// Answers every request with HTTP 500.
fn failing_host() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(
                b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\nConnection: close\r\n\r\noops",
            );
        }
    });
    format!("http://{addr}")
}

struct NoPause;

impl Pause for NoPause {
    fn pause(&self, _duration: Duration) {}
}

struct FixedDetails;

impl DetailSource for FixedDetails {
    fn details(&self, url: &str) -> Details {
        Details {
            description: format!("Founders and investors meet at {url} for an evening."),
            host: "Acme".into(),
            price: "$15".into(),
        }
    }
}

struct WomenInAi;

impl TagClassifier for WomenInAi {
    fn classify(&self, description: &str, _name: &str, _host: &str) -> Categorization {
        if description.is_empty() {
            return Categorization::default();
        }
        Categorization {
            industry_tags: vec!["ai".into()],
            event_type: "networking".into(),
            women_specific: true,
            ..Categorization::default()
        }
    }
}

const CALENDAR_HTML: &str = r#"
<html><body><div class="calendar-events-list">
  <div class="calendar-events-item">
    <a class="event-link" href="/e/one"><h3 fs-list-field="name">Women in AI Mixer</h3></a>
    <div class="date-wrapper"><div>Mon</div><div>Oct</div><div>6</div>
      <div class="text-style-nowrap">6:00 PM</div></div>
    <div class="calendar-info-wrapper"><div class="is-mobile">Mission</div></div>
  </div>
  <div class="calendar-events-item">
    <a class="event-link" href="/e/two"><h3 fs-list-field="name">Private Dinner</h3></a>
    <div class="date-wrapper"><div>Tue</div><div>Oct</div><div>7</div>
      <div class="text-style-nowrap">Invite Only</div></div>
  </div>
  <div class="calendar-events-item">
    <a class="event-link" href="/e/one"><h3 fs-list-field="name">Women in AI Mixer</h3></a>
    <div class="date-wrapper"><div>Mon</div><div>Oct</div><div>6</div></div>
  </div>
</div></body></html>
"#;

fn quick_config() -> AppConfig {
    AppConfig {
        calendar_url: "https://www.tech-week.com/calendar/sf".into(),
        scroll: ScrollConfig {
            max_cycles: 10,
            stable_rounds: 2,
            scroll_delay_ms: 0,
            load_more_delay_ms: 0,
            dwell_ms: 0,
            poll_interval_ms: 0,
            ..ScrollConfig::default()
        },
        ..AppConfig::default()
    }
}

#[test]
fn failing_host_page_degrades_to_card_fields() {
    let host = failing_host();
    let card = StaticCard::from_html(format!(
        r#"<div class="calendar-events-item">
             <a class="event-link" href="{host}/event"><h3>Rooftop Demo Night</h3></a>
             <div class="date-wrapper"><div>Fri</div><div>Oct</div><div>10</div>
               <div class="text-style-nowrap">7:30 pm</div></div>
             <div class="calendar-info-wrapper"><div class="is-mobile"></div></div>
           </div>"#
    ));

    let enricher = DetailEnricher::new(Duration::from_secs(5)).expect("client");
    let extractor = CardExtractor::new(&enricher, "https://www.tech-week.com/calendar/sf", 2025);
    let event = extractor.extract(&card);

    assert_eq!(event.event_name, "Rooftop Demo Night");
    assert_eq!(event.event_location, "");
    assert_eq!(event.event_description, "");
    assert_eq!(event.hosted_by, "");
    assert_eq!(event.price, "0");
    assert_eq!(event.event_time, "7:30 pm");
    assert!(!event.invite_only);
    assert_eq!(event.event_date, "Oct-10-2025");
}

#[test]
fn harvest_streams_classifies_and_dedupes() {
    let config = quick_config();
    let mut page = StaticPage::from_html(CALENDAR_HTML);
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("events.csv");
    let mut checkpoint = CsvCheckpoint::create(&path).expect("checkpoint");
    let mut streamed = 0;

    let events = harvest(
        &config,
        &mut page,
        &FixedDetails,
        Some(&WomenInAi),
        KeepPolicy::First,
        NoPause,
        |event| {
            streamed += 1;
            checkpoint.append(event).expect("append");
        },
    );

    assert_eq!(streamed, 3);
    // The checkpoint already dropped the repeated card.
    assert_eq!(output::read_csv(&path).expect("read").len(), 2);

    assert_eq!(events.len(), 2);
    let mixer = &events[0];
    assert_eq!(mixer.event_url, "https://www.tech-week.com/e/one");
    assert_eq!(mixer.event_time, "6:00 pm");
    assert_eq!(mixer.price, "15");
    assert_eq!(mixer.event_location, "Mission");
    assert!(mixer.women_specific);
    assert_eq!(mixer.industry_tags, vec!["ai"]);

    let dinner = &events[1];
    assert!(dinner.invite_only);
    assert_eq!(dinner.event_time, "");
    assert_eq!(dinner.event_location, "");
}

#[test]
fn empty_calendar_times_out_to_nothing() {
    let mut config = quick_config();
    config.scroll.first_item_timeout_secs = 0;
    let mut page = StaticPage::from_html("<html><body><p>Loading…</p></body></html>");
    let events = harvest(
        &config,
        &mut page,
        &FixedDetails,
        None,
        KeepPolicy::First,
        NoPause,
        |_| {},
    );
    assert!(events.is_empty());
}
