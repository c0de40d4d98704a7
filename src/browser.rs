//! The page-rendering capability the collector drives.
//!
//! The collector only needs to navigate, count nodes, press "load more"
//! controls, scroll and finally walk the rendered cards. Anything that can do
//! that (a headless browser session, a recorded fixture, a plain HTTP fetch)
//! implements [`Page`].

use std::time::Duration;

use reqwest::blocking::Client;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::scraping::base;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("invalid selector `{0}`")]
    Selector(String),
    #[error("page not loaded")]
    NotLoaded,
    #[error("page script failed: {0}")]
    Script(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scroll {
    ToBottom,
    ByViewport,
    ByPixels(i64),
}

/// CSS selector with an optional case-insensitive text filter, e.g. "a button
/// whose text contains `load more`".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locator {
    pub css: &'static str,
    pub text: Option<&'static str>,
}

impl Locator {
    pub const fn css(css: &'static str) -> Self {
        Self { css, text: None }
    }

    pub const fn with_text(css: &'static str, text: &'static str) -> Self {
        Self {
            css,
            text: Some(text),
        }
    }

    fn accepts(&self, element_text: &str) -> bool {
        match self.text {
            Some(needle) => element_text
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            None => true,
        }
    }
}

pub trait CardHandle {
    /// Text of the first node matching `css`, whitespace-collapsed.
    fn text(&self, css: &str) -> Result<Option<String>, BrowserError>;
    /// Text of every node matching `css`, in document order.
    fn texts(&self, css: &str) -> Result<Vec<String>, BrowserError>;
    fn attr(&self, css: &str, name: &str) -> Result<Option<String>, BrowserError>;
}

pub trait Page {
    type Card: CardHandle;

    fn goto(&mut self, url: &str) -> Result<(), BrowserError>;
    fn count(&mut self, css: &str) -> Result<usize, BrowserError>;
    /// Clicks the first visible match. `Ok(false)` when nothing clickable matched.
    fn click_if_visible(&mut self, locator: &Locator) -> Result<bool, BrowserError>;
    fn has_element(&mut self, locator: &Locator) -> Result<bool, BrowserError>;
    fn scroll(&mut self, scroll: Scroll) -> Result<(), BrowserError>;
    fn body_text(&mut self) -> Result<String, BrowserError>;
    fn cards(&mut self, css: &str) -> Result<Vec<Self::Card>, BrowserError>;
}

fn parse_selector(css: &str) -> Result<Selector, BrowserError> {
    Selector::parse(css).map_err(|_| BrowserError::Selector(css.to_string()))
}

fn element_text(element: ElementRef<'_>) -> String {
    base::clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

/// A page rendered from a single HTTP response. Nothing is clickable and
/// scrolling changes nothing, so the item count is stable from the first read.
pub struct StaticPage {
    client: Option<Client>,
    document: Option<Html>,
}

impl StaticPage {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: Some(base::http_client(timeout)?),
            document: None,
        })
    }

    pub fn from_html(html: &str) -> Self {
        Self {
            client: None,
            document: Some(Html::parse_document(html)),
        }
    }

    fn document(&self) -> Result<&Html, BrowserError> {
        self.document.as_ref().ok_or(BrowserError::NotLoaded)
    }

    fn matches(&self, locator: &Locator) -> Result<usize, BrowserError> {
        let selector = parse_selector(locator.css)?;
        let document = self.document()?;
        Ok(document
            .select(&selector)
            .filter(|el| locator.accepts(&element_text(*el)))
            .count())
    }
}

impl Page for StaticPage {
    type Card = StaticCard;

    fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        let Some(client) = self.client.as_ref() else {
            // Fixture pages are already loaded.
            return self.document().map(|_| ());
        };
        let html = base::fetch_html(client, url).map_err(|err| BrowserError::Navigation {
            url: url.to_string(),
            reason: format!("{err:#}"),
        })?;
        self.document = Some(Html::parse_document(&html));
        Ok(())
    }

    fn count(&mut self, css: &str) -> Result<usize, BrowserError> {
        let selector = parse_selector(css)?;
        Ok(self.document()?.select(&selector).count())
    }

    fn click_if_visible(&mut self, _locator: &Locator) -> Result<bool, BrowserError> {
        self.document()?;
        Ok(false)
    }

    fn has_element(&mut self, locator: &Locator) -> Result<bool, BrowserError> {
        Ok(self.matches(locator)? > 0)
    }

    fn scroll(&mut self, _scroll: Scroll) -> Result<(), BrowserError> {
        self.document().map(|_| ())
    }

    fn body_text(&mut self) -> Result<String, BrowserError> {
        let document = self.document()?;
        Ok(element_text(document.root_element()))
    }

    fn cards(&mut self, css: &str) -> Result<Vec<StaticCard>, BrowserError> {
        let selector = parse_selector(css)?;
        let document = self.document()?;
        Ok(document
            .select(&selector)
            .map(|el| StaticCard { html: el.html() })
            .collect())
    }
}

/// One card, detached from its page as an HTML fragment.
#[derive(Debug, Clone)]
pub struct StaticCard {
    html: String,
}

impl StaticCard {
    pub fn from_html(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    fn with_matches<T>(
        &self,
        css: &str,
        f: impl FnOnce(&mut dyn Iterator<Item = ElementRef<'_>>) -> T,
    ) -> Result<T, BrowserError> {
        let selector = parse_selector(css)?;
        let fragment = Html::parse_fragment(&self.html);
        let mut matches = fragment.select(&selector);
        Ok(f(&mut matches))
    }
}

impl CardHandle for StaticCard {
    fn text(&self, css: &str) -> Result<Option<String>, BrowserError> {
        self.with_matches(css, |matches| matches.next().map(element_text))
    }

    fn texts(&self, css: &str) -> Result<Vec<String>, BrowserError> {
        self.with_matches(css, |matches| matches.map(element_text).collect())
    }

    fn attr(&self, css: &str, name: &str) -> Result<Option<String>, BrowserError> {
        self.with_matches(css, |matches| {
            matches
                .next()
                .and_then(|el| el.value().attr(name))
                .map(str::to_string)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_HTML: &str = r#"
    <html><body>
      <div class="list">
        <div class="calendar-events-item"><h3>One</h3><a class="event-link" href="https://lu.ma/one">go</a></div>
        <div class="calendar-events-item"><h3>Two</h3></div>
      </div>
      <button class="btn">Load More</button>
      <p>Page 1 / 3</p>
    </body></html>
    "#;

    #[test]
    fn static_page_counts_and_detaches_cards() {
        let mut page = StaticPage::from_html(SAMPLE_HTML);
        page.goto("ignored").expect("fixture goto");
        assert_eq!(page.count(".calendar-events-item").expect("count"), 2);
        assert!(page
            .has_element(&Locator::with_text("button", "load more"))
            .expect("locator"));
        assert!(!page
            .has_element(&Locator::with_text("button", "subscribe"))
            .expect("locator"));
        assert!(!page
            .click_if_visible(&Locator::css("button"))
            .expect("click"));
        assert!(page.body_text().expect("body").contains("1 / 3"));

        let cards = page.cards(".calendar-events-item").expect("cards");
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].text("h3").expect("name").as_deref(), Some("One"));
        assert_eq!(
            cards[0].attr("a.event-link", "href").expect("href").as_deref(),
            Some("https://lu.ma/one")
        );
        assert_eq!(cards[1].attr("a.event-link", "href").expect("href"), None);
    }

    #[test]
    fn bad_selector_is_an_error_not_a_panic() {
        let card = StaticCard::from_html("<div><h3>x</h3></div>");
        assert!(matches!(card.text("h3[["), Err(BrowserError::Selector(_))));
    }

    #[test]
    fn unloaded_page_reports_not_loaded() {
        let mut page = StaticPage {
            client: None,
            document: None,
        };
        assert!(matches!(page.count("div"), Err(BrowserError::NotLoaded)));
    }
}
