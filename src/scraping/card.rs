use chrono::Utc;
use tracing::debug;

use super::base;
use super::details::{DetailSource, Details};
use crate::browser::{BrowserError, CardHandle};
use crate::models::Event;

pub const NAME_SELECTOR: &str = r#"h3[fs-list-field="name"], h3"#;
pub const TIME_SELECTOR: &str = ".date-wrapper .text-style-nowrap";
pub const DATE_TOKEN_SELECTOR: &str = ".date-wrapper *";
pub const LOCATION_SELECTOR: &str = ".calendar-info-wrapper .is-mobile";
pub const LINK_SELECTOR: &str = "a.event-link";

const TOKEN_SEPARATOR: &str = "·";

/// Turns one rendered listing card into an [`Event`]. Categorical fields are
/// left empty; classification is a separate pass.
pub struct CardExtractor<'a, D: DetailSource + ?Sized> {
    details: &'a D,
    base_url: String,
    year: i32,
}

impl<'a, D: DetailSource + ?Sized> CardExtractor<'a, D> {
    pub fn new(details: &'a D, base_url: impl Into<String>, year: i32) -> Self {
        Self {
            details,
            base_url: base_url.into(),
            year,
        }
    }

    pub fn extract<C: CardHandle + ?Sized>(&self, card: &C) -> Event {
        let name = field("name", card.text(NAME_SELECTOR)).unwrap_or_default();
        let time_text = field("time", card.texts(TIME_SELECTOR))
            .into_iter()
            .find(|text| !text.trim().is_empty())
            .unwrap_or_default();
        let tokens = field("date", card.texts(DATE_TOKEN_SELECTOR));
        let date = base::assemble_date(
            tokens
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty() && *t != TOKEN_SEPARATOR),
        );
        let location = field("location", card.text(LOCATION_SELECTOR)).unwrap_or_default();
        let href = field("link", card.attr(LINK_SELECTOR, "href"));
        let url = base::absolute_url(&self.base_url, href).unwrap_or_default();

        let details = if url.is_empty() {
            Details::default()
        } else {
            self.details.details(&url)
        };

        let description = base::clean_text(&details.description);
        let (event_time, invite_only) =
            base::clean_time(&base::clean_text(&time_text), &description);

        Event {
            event_name: base::clean_text(&name),
            event_date: base::format_date_with_year(&base::clean_text(&date), self.year),
            event_time,
            event_location: base::clean_text(&location),
            event_description: description,
            hosted_by: base::clean_text(&details.host),
            price: base::clean_price(&base::clean_text(&details.price)),
            event_url: url,
            invite_only,
            updated_at: Utc::now().to_rfc3339(),
            ..Event::default()
        }
    }
}

fn field<T: Default>(name: &str, result: Result<T, BrowserError>) -> T {
    result.unwrap_or_else(|err| {
        debug!(field = name, "card field unavailable: {err}");
        T::default()
    })
}
