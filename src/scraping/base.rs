use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};

pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

/// Year stamped onto calendar dates, which the listing renders without one.
pub const DEFAULT_YEAR: i32 = 2025;

pub const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

pub const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

const INVITE_PHRASES: [&str; 5] = [
    "invite only",
    "invitation only",
    "by invitation",
    "private",
    "exclusive",
];

// Descriptions also use "limited-availability" for gated events; the time
// field never does.
const DESCRIPTION_INVITE_PHRASES: [&str; 6] = [
    "invite only",
    "invitation only",
    "by invitation",
    "private",
    "exclusive",
    "limited-availability",
];

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2}):(\d{2})\s*(am|pm)\b").expect("valid time regex")
});
static PRICE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}(?:,\d{3})+|\d+)(\.\d{1,2})?").expect("valid price regex")
});
static DAY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,2}$").expect("valid day regex"));

pub fn clean_text(input: &str) -> String {
    WHITESPACE_RE.replace_all(input, " ").trim().to_string()
}

/// Truncates on a character boundary.
pub fn truncate_chars(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}

pub fn month_number(token: &str) -> Option<u32> {
    let prefix: String = token.chars().take(3).collect();
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .map(|idx| idx as u32 + 1)
}

pub fn is_weekday(token: &str) -> bool {
    WEEKDAYS.contains(&token)
}

pub fn is_month(token: &str) -> bool {
    MONTHS.contains(&token)
}

pub fn is_day_of_month(token: &str) -> bool {
    DAY_RE.is_match(token)
}

/// Picks the first weekday, month and day-of-month tokens (in that order of
/// appearance per kind) and joins whichever were found.
pub fn assemble_date<'a, I>(tokens: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut dow = None;
    let mut month = None;
    let mut dom = None;
    for token in tokens {
        let token = token.trim();
        if dow.is_none() && is_weekday(token) {
            dow = Some(token);
        } else if month.is_none() && is_month(token) {
            month = Some(token);
        } else if dom.is_none() && is_day_of_month(token) {
            dom = Some(token);
        }
    }
    [dow, month, dom]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn format_date(tokens: &str) -> String {
    format_date_with_year(tokens, DEFAULT_YEAR)
}

/// "Fri Oct 10" -> "Oct-10-2025". Anything without a recognizable month and
/// day comes back untouched.
pub fn format_date_with_year(tokens: &str, year: i32) -> String {
    let mut month = None;
    let mut day = None;
    for part in tokens.split_whitespace() {
        if month.is_none() && month_number(part).is_some() && !is_weekday(part) {
            month = Some(&part[..3]);
        } else if month.is_some() && day.is_none() && is_day_of_month(part) {
            day = part.parse::<u32>().ok().filter(|d| (1..=31).contains(d));
        }
    }
    match (month, day) {
        (Some(month), Some(day)) => format!("{month}-{day:02}-{year:04}"),
        _ => tokens.to_string(),
    }
}

pub fn clean_price(input: &str) -> String {
    let price = input.trim();
    if price.eq_ignore_ascii_case("free") {
        return "0".to_string();
    }
    match PRICE_RE.captures(price) {
        Some(caps) => {
            let whole = caps[1].replace(',', "");
            let fraction = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            format!("{whole}{fraction}")
        }
        None => "0".to_string(),
    }
}

/// Returns `(time, invite_only)`. An invite-only marker in the time field wins
/// over any clock time; an empty time field defers to the description.
pub fn clean_time(input: &str, description: &str) -> (String, bool) {
    let time = input.trim();
    if time.is_empty() {
        let invite_only = contains_phrase(description, &DESCRIPTION_INVITE_PHRASES);
        return (String::new(), invite_only);
    }
    if contains_phrase(time, &INVITE_PHRASES) {
        return (String::new(), true);
    }
    match find_first_time(time) {
        Some(found) => (found, false),
        None => (String::new(), false),
    }
}

pub fn find_first_time(text: &str) -> Option<String> {
    TIME_RE.captures(text).map(|caps| {
        format!(
            "{}:{} {}",
            &caps[1],
            &caps[2],
            caps[3].to_ascii_lowercase()
        )
    })
}

fn contains_phrase(text: &str, phrases: &[&str]) -> bool {
    if text.is_empty() {
        return false;
    }
    let lowered = text.to_lowercase();
    phrases.iter().any(|phrase| lowered.contains(phrase))
}

/// Lenient truthiness for flat-file booleans ("true", "1", "yes").
pub fn coerce_bool(input: &str) -> bool {
    matches!(
        input.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y"
    )
}

pub fn absolute_url(base: &str, href: Option<String>) -> Option<String> {
    let href = href?;
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    let base_url = reqwest::Url::parse(base).ok()?;
    base_url.join(href).ok().map(|u| u.to_string())
}

pub fn http_client(timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .build()
        .context("unable to build http client")
}

pub fn fetch_html(client: &Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("request failed for {url}"))?;
    let response = response
        .error_for_status()
        .with_context(|| format!("non-success status for {url}"))?;
    response
        .text()
        .with_context(|| format!("unable to read response body for {url}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_and_is_idempotent() {
        let samples = ["  a \n\t b  ", "", "   ", "already clean", "x\u{a0}\u{a0}y"];
        for sample in samples {
            let once = clean_text(sample);
            assert_eq!(clean_text(&once), once);
        }
        assert_eq!(clean_text("  a \n\t b  "), "a b");
    }

    #[test]
    fn prices_reduce_to_bare_numbers() {
        assert_eq!(clean_price("Free"), "0");
        assert_eq!(clean_price("FREE"), "0");
        assert_eq!(clean_price("$12.50"), "12.50");
        assert_eq!(clean_price(""), "0");
        assert_eq!(clean_price("$10-$20"), "10");
        assert_eq!(clean_price("$1,200"), "1200");
        assert_eq!(clean_price("Donation"), "0");
    }

    #[test]
    fn time_field_and_invite_markers() {
        assert_eq!(clean_time("Invite Only", ""), (String::new(), true));
        assert_eq!(clean_time("6:00 pm", ""), ("6:00 pm".to_string(), false));
        assert_eq!(
            clean_time("", "This is invitation only."),
            (String::new(), true)
        );
        assert_eq!(
            clean_time("Doors 6:30PM", ""),
            ("6:30 pm".to_string(), false)
        );
        assert_eq!(clean_time("TBD", "private dinner"), (String::new(), false));
        assert_eq!(clean_time("", ""), (String::new(), false));
    }

    #[test]
    fn dates_get_a_year_and_padding() {
        let formatted = format_date("Fri Oct 10");
        assert_eq!(formatted, "Oct-10-2025");
        assert!(formatted.ends_with("-2025"));
        assert_eq!(format_date("Sat Nov 1"), "Nov-01-2025");
        assert_eq!(format_date_with_year("Oct 3", 2026), "Oct-03-2026");
        assert_eq!(format_date("garbage"), "garbage");
        assert_eq!(format_date("Fri Oct"), "Fri Oct");
        assert_eq!(format_date(""), "");
    }

    #[test]
    fn assembles_partial_dates_from_tokens() {
        assert_eq!(assemble_date(["Fri", "·", "Oct", "10", "6:00 pm"]), "Fri Oct 10");
        assert_eq!(assemble_date(["Oct", "10"]), "Oct 10");
        assert_eq!(assemble_date(["10", "Fri"]), "Fri 10");
        assert_eq!(assemble_date(Vec::<&str>::new()), "");
    }

    #[test]
    fn resolves_relative_links() {
        assert_eq!(
            absolute_url("https://www.tech-week.com/calendar/sf", Some("/e/abc".into())),
            Some("https://www.tech-week.com/e/abc".to_string())
        );
        assert_eq!(
            absolute_url("https://x.test/", Some("https://lu.ma/e".into())),
            Some("https://lu.ma/e".to_string())
        );
        assert_eq!(absolute_url("https://x.test/", Some("  ".into())), None);
    }
}
