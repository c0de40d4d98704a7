use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use super::base;

const MIN_PARAGRAPH_CHARS: usize = 60;
const MAX_DESCRIPTION_CHARS: usize = 500;
const MAX_AUTHOR_CHARS: usize = 120;

static OG_DESCRIPTION_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="og:description"]"#).expect("og description selector")
});
static META_DESCRIPTION_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[name="description"]"#).expect("meta description selector")
});
static META_AUTHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="author"]"#).expect("meta author selector"));
static PARAGRAPH_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p").expect("paragraph selector"));

// Text from every matching region is pooled, in this order.
static PRICE_REGION_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "[class*=price]",
        "[class*=ticket]",
        "[class*=fee]",
        "[data-test*=price]",
        "[data-automation*=price]",
    ]
    .iter()
    .map(|css| Selector::parse(css).expect("price region selector"))
    .collect()
});

static HOST_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)Hosted by[:\s]+(.+)",
        r"(?i)Organizer[:\s]+(.+)",
        r"(?i)Organised by[:\s]+(.+)",
        r"(?i)Organized by[:\s]+(.+)",
        r"(?i)By[:\s]+(.+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("host pattern"))
    .collect()
});

static FREE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bfree\b").expect("free regex"));
static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\s?\d{1,3}(?:[,.]\d{3})*(?:\.\d{2})?").expect("amount regex")
});
static RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\s?\d+[\s\-–]+\$\s?\d+").expect("range regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Details {
    pub description: String,
    pub host: String,
    pub price: String,
}

/// Anything that can turn an event link into `(description, host, price)`.
/// Implementations never fail: a bad page yields empty fields.
pub trait DetailSource {
    fn details(&self, url: &str) -> Details;
}

pub struct DetailEnricher {
    client: Client,
}

impl DetailEnricher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: base::http_client(timeout)?,
        })
    }
}

impl DetailSource for DetailEnricher {
    fn details(&self, url: &str) -> Details {
        match base::fetch_html(&self.client, url) {
            Ok(html) => {
                let details = extract_details(&html);
                debug!(
                    url,
                    has_description = !details.description.is_empty(),
                    has_host = !details.host.is_empty(),
                    price = %details.price,
                    "enriched event page"
                );
                details
            }
            Err(err) => {
                warn!(url, "detail fetch failed: {err:#}");
                Details::default()
            }
        }
    }
}

pub fn extract_details(html: &str) -> Details {
    let document = Html::parse_document(html);
    let page_text = page_text(&document);
    Details {
        description: base::clean_text(&description(&document)),
        host: base::clean_text(&host(&document, &page_text)),
        price: base::clean_text(&price(&document, &page_text)),
    }
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
}

fn description(document: &Html) -> String {
    if let Some(content) = meta_content(document, &OG_DESCRIPTION_SELECTOR) {
        return content;
    }
    if let Some(content) = meta_content(document, &META_DESCRIPTION_SELECTOR) {
        return content;
    }
    document
        .select(&PARAGRAPH_SELECTOR)
        .map(|p| base::clean_text(&p.text().collect::<Vec<_>>().join(" ")))
        .find(|text| text.chars().count() >= MIN_PARAGRAPH_CHARS)
        .map(|text| base::truncate_chars(&text, MAX_DESCRIPTION_CHARS))
        .unwrap_or_default()
}

fn host(document: &Html, page_text: &str) -> String {
    let from_text = HOST_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(page_text)
            .map(|caps| base::clean_text(&caps[1]))
    });
    let host = match from_text {
        Some(found) => found,
        None => meta_content(document, &META_AUTHOR_SELECTOR)
            .map(|author| base::truncate_chars(&base::clean_text(&author), MAX_AUTHOR_CHARS))
            .unwrap_or_default(),
    };
    // Emoji-only or punctuation-only "hosts" are noise.
    if host.chars().any(char::is_alphabetic) {
        host
    } else {
        String::new()
    }
}

fn price(document: &Html, page_text: &str) -> String {
    let regions: Vec<String> = PRICE_REGION_SELECTORS
        .iter()
        .flat_map(|selector| document.select(selector))
        .map(|el| base::clean_text(&el.text().collect::<Vec<_>>().join(" ")))
        .filter(|text| !text.is_empty())
        .collect();
    let haystack = if regions.is_empty() {
        page_text.to_string()
    } else {
        regions.join("\n")
    };
    if FREE_RE.is_match(&haystack) {
        return "Free".to_string();
    }
    if let Some(found) = AMOUNT_RE.find(&haystack) {
        return found.as_str().to_string();
    }
    RANGE_RE
        .find(&haystack)
        .map(|found| found.as_str().to_string())
        .unwrap_or_default()
}

/// Visible text, one trimmed text node per line; script and style bodies
/// are skipped.
fn page_text(document: &Html) -> String {
    document
        .root_element()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent()?.value().as_element()?.name();
            if matches!(parent, "script" | "style" | "noscript" | "template") {
                return None;
            }
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect::<Vec<_>>()
        .join("\n")
}
