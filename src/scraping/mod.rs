pub mod base;
pub mod card;
pub mod collector;
pub mod details;

use tracing::info;

use crate::browser::Page;
use crate::config::AppConfig;
use crate::models::Event;
use card::CardExtractor;
use collector::{Collection, Pause, StableScrollCollector};
use details::DetailSource;

/// Loads the calendar on `page`, then extracts and enriches every card.
/// `on_event` sees each event as soon as it exists.
pub fn collect_calendar<G, D, P, F>(
    config: &AppConfig,
    page: &mut G,
    details: &D,
    pause: P,
    on_event: F,
) -> Collection
where
    G: Page,
    D: DetailSource + ?Sized,
    P: Pause,
    F: FnMut(&Event),
{
    let extractor = CardExtractor::new(details, config.calendar_url.as_str(), config.event_year);
    let mut collector = StableScrollCollector::new(&config.scroll, pause);
    let collection = collector.collect(page, &config.calendar_url, &extractor, on_event);
    info!(
        termination = ?collection.termination,
        cycles = collection.cycles,
        items = collection.item_count,
        events = collection.events.len(),
        "calendar collected"
    );
    collection
}
