use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use super::card::CardExtractor;
use super::details::DetailSource;
use crate::browser::{Locator, Page, Scroll};
use crate::config::ScrollConfig;
use crate::models::Event;

pub const ITEM_SELECTOR: &str = ".calendar-events-item";

pub const LOAD_MORE_LOCATORS: [Locator; 8] = [
    Locator::with_text("button", "load more"),
    Locator::with_text("button", "load"),
    Locator::css(r#"[fs-list-load="more"]"#),
    Locator::css(r#"[fs-list-element="load-more"]"#),
    Locator::css(r#"[data-fs-list-element="load-more"]"#),
    Locator::css(r#"button[class*="load"]"#),
    Locator::css(r#"button[class*="more"]"#),
    Locator::with_text("a", "load more"),
];

const SCROLL_STEP_PAUSE: Duration = Duration::from_millis(200);
const SCROLL_STEP_PIXELS: i64 = 1000;
const PROGRESS_EVERY: u32 = 10;

static PAGINATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*/\s*(\d+)").expect("valid pagination regex"));

/// Blocking wait used between polls and after interactions.
pub trait Pause {
    fn pause(&self, duration: Duration);
}

pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    WaitingForFirstItem,
    Loading { cycle: u32, stable_rounds: u32 },
    Stable,
    CycleLimited,
    TimedOut,
}

/// Why the loading loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Stable,
    PaginationEnd,
    CycleLimit,
    TimedOut,
}

#[derive(Debug)]
pub struct Collection {
    pub termination: Termination,
    pub cycles: u32,
    pub item_count: usize,
    pub events: Vec<Event>,
}

/// Counts consecutive unchanged item counts. Stability needs the streak to
/// reach `threshold` with the count above `min_items`.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
    threshold: u32,
    min_items: usize,
    stable_rounds: u32,
    last_count: Option<usize>,
}

impl StabilityTracker {
    pub fn new(threshold: u32, min_items: usize) -> Self {
        Self {
            threshold,
            min_items,
            stable_rounds: 0,
            last_count: None,
        }
    }

    /// Records one count reading and reports whether the page is now stable.
    pub fn observe(&mut self, count: usize) -> bool {
        if self.last_count == Some(count) {
            self.stable_rounds += 1;
        } else {
            self.stable_rounds = 0;
        }
        self.last_count = Some(count);
        self.is_stable()
    }

    pub fn is_stable(&self) -> bool {
        match self.last_count {
            Some(count) => self.stable_rounds >= self.threshold && count > self.min_items,
            None => false,
        }
    }

    pub fn stable_rounds(&self) -> u32 {
        self.stable_rounds
    }
}

/// `current / total` as shown by paginated list widgets.
pub fn parse_pagination(text: &str) -> Option<(u32, u32)> {
    let caps = PAGINATION_RE.captures(text)?;
    let current = caps[1].parse().ok()?;
    let total = caps[2].parse().ok()?;
    Some((current, total))
}

pub struct StableScrollCollector<'a, P: Pause> {
    config: &'a ScrollConfig,
    pause: P,
    state: LoadState,
}

impl<'a, P: Pause> StableScrollCollector<'a, P> {
    pub fn new(config: &'a ScrollConfig, pause: P) -> Self {
        Self {
            config,
            pause,
            state: LoadState::WaitingForFirstItem,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Loads the listing, then extracts every card. `on_event` sees each event
    /// as soon as it is built.
    pub fn collect<G, D, F>(
        &mut self,
        page: &mut G,
        url: &str,
        extractor: &CardExtractor<'_, D>,
        mut on_event: F,
    ) -> Collection
    where
        G: Page,
        D: DetailSource + ?Sized,
        F: FnMut(&Event),
    {
        let (termination, cycles, item_count) = self.load(page, url);
        if termination == Termination::TimedOut {
            return Collection {
                termination,
                cycles,
                item_count,
                events: Vec::new(),
            };
        }

        let cards = match page.cards(ITEM_SELECTOR) {
            Ok(cards) => cards,
            Err(err) => {
                warn!("unable to enumerate cards: {err}");
                Vec::new()
            }
        };
        info!(cards = cards.len(), "extracting cards");

        let mut events = Vec::with_capacity(cards.len());
        for (idx, card) in cards.iter().enumerate() {
            let event = extractor.extract(card);
            debug!(index = idx, name = %event.event_name, "extracted card");
            on_event(&event);
            events.push(event);
        }

        Collection {
            termination,
            cycles,
            item_count,
            events,
        }
    }

    /// Drives the page until the item count settles. Returns the termination
    /// reason, cycles run and the last item count.
    pub fn load<G: Page>(&mut self, page: &mut G, url: &str) -> (Termination, u32, usize) {
        self.state = LoadState::WaitingForFirstItem;
        if let Err(err) = page.goto(url) {
            warn!("calendar did not render: {err}");
            self.state = LoadState::TimedOut;
            return (Termination::TimedOut, 0, 0);
        }

        let first_count = match self.wait_for_first_item(page) {
            Some(count) => count,
            None => {
                warn!(
                    timeout_secs = self.config.first_item_timeout_secs,
                    "no listing items appeared"
                );
                self.state = LoadState::TimedOut;
                return (Termination::TimedOut, 0, 0);
            }
        };
        info!(count = first_count, "first listing items rendered");

        let mut tracker = StabilityTracker::new(self.config.stable_rounds, self.config.min_items);
        let mut count = first_count;
        for cycle in 0..self.config.max_cycles {
            self.state = LoadState::Loading {
                cycle,
                stable_rounds: tracker.stable_rounds(),
            };

            self.click_load_more(page);
            self.scroll(page);

            match page.count(ITEM_SELECTOR) {
                Ok(current) => {
                    count = current;
                    tracker.observe(current);
                }
                Err(err) => debug!(cycle, "item count unavailable: {err}"),
            }

            if cycle % PROGRESS_EVERY == 0 {
                info!(
                    cycle,
                    count,
                    stable_rounds = tracker.stable_rounds(),
                    "loading listing"
                );
            }

            if self.config.pagination_shortcut && self.pagination_exhausted(page) {
                info!(count, cycle, "reached end of pagination");
                self.state = LoadState::Stable;
                return (Termination::PaginationEnd, cycle + 1, count);
            }

            if tracker.is_stable() {
                info!(
                    count,
                    stable_rounds = tracker.stable_rounds(),
                    "listing stable"
                );
                self.state = LoadState::Stable;
                return (Termination::Stable, cycle + 1, count);
            }

            if self.config.dwell_every > 0 && (cycle + 1) % self.config.dwell_every == 0 {
                self.pause.pause(self.config.dwell());
            }
        }

        warn!(
            count,
            max_cycles = self.config.max_cycles,
            "cycle limit reached before listing settled"
        );
        self.state = LoadState::CycleLimited;
        (Termination::CycleLimit, self.config.max_cycles, count)
    }

    fn wait_for_first_item<G: Page>(&self, page: &mut G) -> Option<usize> {
        let limit = self.config.first_item_timeout();
        let interval = self.config.poll_interval();
        let mut waited = Duration::ZERO;
        loop {
            match page.count(ITEM_SELECTOR) {
                Ok(count) if count > 0 => return Some(count),
                Ok(_) => {}
                Err(err) => debug!("item count unavailable while waiting: {err}"),
            }
            if waited >= limit || interval.is_zero() {
                return None;
            }
            self.pause.pause(interval);
            waited += interval;
        }
    }

    fn click_load_more<G: Page>(&self, page: &mut G) -> bool {
        for locator in LOAD_MORE_LOCATORS.iter() {
            match page.click_if_visible(locator) {
                Ok(true) => {
                    debug!(selector = locator.css, text = ?locator.text, "clicked load more");
                    self.pause.pause(self.config.load_more_delay());
                    return true;
                }
                Ok(false) => {}
                Err(err) => debug!(selector = locator.css, "load more lookup failed: {err}"),
            }
        }
        false
    }

    fn scroll<G: Page>(&self, page: &mut G) {
        let steps = [
            Scroll::ToBottom,
            Scroll::ByViewport,
            Scroll::ByPixels(SCROLL_STEP_PIXELS),
        ];
        for (idx, step) in steps.iter().enumerate() {
            if let Err(err) = page.scroll(*step) {
                debug!(?step, "scroll failed: {err}");
            }
            if idx + 1 < steps.len() {
                self.pause.pause(SCROLL_STEP_PAUSE);
            }
        }
        self.pause.pause(self.config.scroll_delay());
    }

    fn pagination_exhausted<G: Page>(&self, page: &mut G) -> bool {
        let text = match page.body_text() {
            Ok(text) => text,
            Err(err) => {
                debug!("page text unavailable: {err}");
                return false;
            }
        };
        let Some((current, total)) = parse_pagination(&text) else {
            return false;
        };
        if current < total {
            return false;
        }
        let load_more_left = LOAD_MORE_LOCATORS
            .iter()
            .any(|locator| page.has_element(locator).unwrap_or(false));
        !load_more_left
    }
}
