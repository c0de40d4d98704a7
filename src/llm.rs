use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::Event;
use crate::scraping::base;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
    #[error("classifier response malformed: {0}")]
    Malformed(String),
}

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_MAX_TOKENS: u32 = 500;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MIN_DESCRIPTION_CHARS: usize = 10;
const PROMPT_DESCRIPTION_CHARS: usize = 800;

pub const USAGE_VOCABULARY: [&str; 10] = [
    "find-cofounder",
    "find-angels",
    "find-advisors",
    "find-users",
    "get-user-feedback",
    "find-investors",
    "find-talent",
    "learn-skills",
    "industry-insights",
    "networking",
];

pub const INDUSTRY_VOCABULARY: [&str; 40] = [
    "ai",
    "machine-learning",
    "fintech",
    "healthtech",
    "biotech",
    "edtech",
    "climate-tech",
    "cleantech",
    "proptech",
    "legaltech",
    "insurtech",
    "cybersecurity",
    "devtools",
    "saas",
    "hardware",
    "robotics",
    "gaming",
    "media",
    "e-commerce",
    "marketplace",
    "startup",
    "enterprise",
    "consumer",
    "b2b",
    "b2c",
    "venture-capital",
    "angel-investing",
    "consulting",
    "legal",
    "marketing",
    "design",
    "web3",
    "blockchain",
    "crypto",
    "sustainability",
    "finance",
    "healthcare",
    "education",
    "real-estate",
    "government",
];

pub const EVENT_TYPES: [&str; 11] = [
    "networking",
    "panel",
    "workshop",
    "hackathon",
    "demo-day",
    "dinner",
    "conference",
    "meetup",
    "pitch",
    "social",
    "other",
];

pub const OUTFIT_CATEGORIES: [&str; 5] = [
    "business-casual",
    "casual",
    "activity",
    "daytime-social",
    "evening-social",
];

const SYSTEM_PROMPT: &str = "You are an expert at categorizing tech events. Analyze the event and return a JSON object with all requested categorizations.";

/// Every categorical field produced for one event in a single call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Categorization {
    pub event_tags: Vec<String>,
    pub usage_tags: Vec<String>,
    pub industry_tags: Vec<String>,
    pub event_type: String,
    pub outfit_category: String,
    pub women_specific: bool,
    pub invite_only: bool,
}

impl Categorization {
    /// Attaches the labels to `event`. The classifier can only add an
    /// invite-only flag, never clear one read from the card.
    pub fn apply_to(self, event: &mut Event) {
        event.event_tags = self.event_tags;
        event.usage_tags = self.usage_tags;
        event.industry_tags = self.industry_tags;
        event.event_type = self.event_type;
        event.outfit_category = self.outfit_category;
        event.women_specific = self.women_specific;
        event.invite_only = event.invite_only || self.invite_only;
    }
}

/// Never fails: transport or parse problems yield [`Categorization::default`].
pub trait TagClassifier {
    fn classify(&self, description: &str, name: &str, host: &str) -> Categorization;
}

pub struct LlmClassifier {
    model: String,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    client: Client,
}

impl LlmClassifier {
    pub fn from_env() -> Result<Self, ClassifyError> {
        let base_url =
            std::env::var("LLM_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let api_key = std::env::var("LLM_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty());
        let temperature = std::env::var("LLM_TEMPERATURE")
            .ok()
            .and_then(|s| s.parse::<f32>().ok())
            .unwrap_or(DEFAULT_TEMPERATURE);
        let max_tokens = std::env::var("LLM_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ClassifyError::Unavailable(err.to_string()))?;

        Ok(Self {
            model,
            base_url,
            api_key,
            temperature,
            max_tokens,
            client,
        })
    }

    fn request(&self, description: &str, name: &str, host: &str) -> Result<String, ClassifyError> {
        let base = self.base_url.trim_end_matches('/');
        let url = format!("{}/chat/completions", base);

        let payload = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                {
                    "role": "system",
                    "content": SYSTEM_PROMPT,
                },
                {
                    "role": "user",
                    "content": build_user_prompt(description, name, host),
                }
            ],
        });

        let mut request = self.client.post(url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .map_err(|err| ClassifyError::Unavailable(err.to_string()))?;

        let status = response.status();
        let text_body = response
            .text()
            .map_err(|err| ClassifyError::Unavailable(err.to_string()))?;

        if !status.is_success() {
            return Err(ClassifyError::Unavailable(format!(
                "HTTP {}: {}",
                status,
                base::truncate_chars(&text_body, 300)
            )));
        }

        let value: Value = serde_json::from_str(&text_body)
            .map_err(|err| ClassifyError::Malformed(err.to_string()))?;

        value
            .get("choices")
            .and_then(|choices| choices.as_array())
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ClassifyError::Malformed("response missing content".to_string()))
    }
}

impl TagClassifier for LlmClassifier {
    fn classify(&self, description: &str, name: &str, host: &str) -> Categorization {
        if description.trim().chars().count() < MIN_DESCRIPTION_CHARS {
            debug!(name, "description too short to classify");
            return Categorization::default();
        }
        match self
            .request(description, name, host)
            .and_then(|text| parse_categorization(&text))
        {
            Ok(categorization) => categorization,
            Err(err) => {
                warn!(name, "classification failed: {err}");
                Categorization::default()
            }
        }
    }
}

/// Classifies every event in place; returns how many came back non-empty.
pub fn classify_all<C: TagClassifier + ?Sized>(classifier: &C, events: &mut [Event]) -> usize {
    let mut tagged = 0;
    let total = events.len();
    for (idx, event) in events.iter_mut().enumerate() {
        let categorization = classifier.classify(
            &event.event_description,
            &event.event_name,
            &event.hosted_by,
        );
        if categorization != Categorization::default() {
            tagged += 1;
        }
        categorization.apply_to(event);
        debug!(index = idx + 1, total, name = %event.event_name, "classified");
    }
    tagged
}

/// Parses the model's reply, tolerating a fenced code block. Labels outside a
/// closed vocabulary are dropped.
pub fn parse_categorization(text: &str) -> Result<Categorization, ClassifyError> {
    let body = strip_fences(text);
    let value: Value =
        serde_json::from_str(body).map_err(|err| ClassifyError::Malformed(err.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| ClassifyError::Malformed("expected a JSON object".to_string()))?;

    let labels = |key: &str| -> Vec<String> {
        match object.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(normalize_label)
                .filter(|label| !label.is_empty())
                .collect(),
            Some(Value::String(one)) => {
                let label = normalize_label(one);
                if label.is_empty() {
                    Vec::new()
                } else {
                    vec![label]
                }
            }
            _ => Vec::new(),
        }
    };
    let single = |key: &str, vocabulary: &[&str]| -> String {
        let label = object
            .get(key)
            .and_then(Value::as_str)
            .map(normalize_label)
            .unwrap_or_default();
        if vocabulary.contains(&label.as_str()) {
            label
        } else {
            String::new()
        }
    };
    let flag = |key: &str| -> bool {
        match object.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => base::coerce_bool(s),
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            _ => false,
        }
    };

    Ok(Categorization {
        event_tags: dedup_preserving_order(labels("event_tags")),
        usage_tags: within(labels("usage_tags"), &USAGE_VOCABULARY),
        industry_tags: within(labels("industry_tags"), &INDUSTRY_VOCABULARY),
        event_type: single("event_type", &EVENT_TYPES[..]),
        outfit_category: single("outfit_category", &OUTFIT_CATEGORIES[..]),
        women_specific: flag("women_specific"),
        invite_only: flag("invite_only"),
    })
}

fn strip_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```json") {
        body = rest;
    } else if let Some(rest) = body.strip_prefix("```") {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

fn normalize_label(label: &str) -> String {
    base::clean_text(label).to_lowercase().replace([' ', '_'], "-")
}

fn within(labels: Vec<String>, vocabulary: &[&str]) -> Vec<String> {
    dedup_preserving_order(
        labels
            .into_iter()
            .filter(|label| vocabulary.contains(&label.as_str()))
            .collect(),
    )
}

fn dedup_preserving_order(labels: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        if !out.contains(&label) {
            out.push(label);
        }
    }
    out
}

fn build_user_prompt(description: &str, name: &str, host: &str) -> String {
    format!(
        "Analyze this tech event and return a JSON object with keys event_tags, usage_tags, industry_tags, event_type, outfit_category, women_specific, invite_only.\n\nEvent Name: {name}\nHosted By: {host}\nDescription: {description}...\n\nRules:\n- event_tags: 3-8 lowercase, hyphenated tags covering audience, format, industry focus and character.\n- usage_tags: any of {usage}.\n- industry_tags: any of {industry}.\n- event_type: exactly one of {types}.\n- outfit_category: exactly one of {outfits}.\n- women_specific: true only if the event targets women.\n- invite_only: true if the event requires an invitation or is members-only.\nReturn only the JSON object, no additional text.\n",
        name = name,
        host = host,
        description = base::truncate_chars(description, PROMPT_DESCRIPTION_CHARS),
        usage = USAGE_VOCABULARY.join(", "),
        industry = INDUSTRY_VOCABULARY.join(", "),
        types = EVENT_TYPES.join(", "),
        outfits = OUTFIT_CATEGORIES.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const FENCED_REPLY: &str = r#"```json
{
  "event_tags": ["Women", "founders", "in person", "founders"],
  "usage_tags": ["networking", "find-investors", "make-friends"],
  "industry_tags": ["AI", "space-mining"],
  "event_type": "Dinner",
  "outfit_category": "black-tie",
  "women_specific": "true",
  "invite_only": 1
}
```"#;

    #[test]
    fn parses_fenced_reply_and_filters_vocabularies() {
        let parsed = parse_categorization(FENCED_REPLY).expect("parse");
        assert_eq!(parsed.event_tags, vec!["women", "founders", "in-person"]);
        assert_eq!(parsed.usage_tags, vec!["networking", "find-investors"]);
        assert_eq!(parsed.industry_tags, vec!["ai"]);
        assert_eq!(parsed.event_type, "dinner");
        assert_eq!(parsed.outfit_category, "");
        assert!(parsed.women_specific);
        assert!(parsed.invite_only);
    }

    #[test]
    fn garbage_reply_is_malformed() {
        assert!(matches!(
            parse_categorization("Sure! Here are the tags: ai, fintech"),
            Err(ClassifyError::Malformed(_))
        ));
        assert!(matches!(
            parse_categorization("[1, 2]"),
            Err(ClassifyError::Malformed(_))
        ));
    }

    #[test]
    fn short_description_skips_the_call() {
        // The endpoint is unroutable; a request would fail, not hang.
        let classifier = LlmClassifier {
            model: DEFAULT_MODEL.into(),
            base_url: "http://127.0.0.1:9".into(),
            api_key: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            client: Client::new(),
        };
        assert_eq!(
            classifier.classify("  tiny  ", "Name", "Host"),
            Categorization::default()
        );
        assert_eq!(
            classifier.classify(
                "A long enough description about founders meeting investors.",
                "Name",
                "Host"
            ),
            Categorization::default()
        );
    }

    #[test]
    fn apply_keeps_card_invite_flag() {
        let mut event = Event {
            invite_only: true,
            ..Event::default()
        };
        Categorization {
            event_type: "panel".into(),
            ..Categorization::default()
        }
        .apply_to(&mut event);
        assert!(event.invite_only);
        assert_eq!(event.event_type, "panel");
    }

    #[test]
    fn prompt_truncates_long_descriptions() {
        let prompt = build_user_prompt(&"x".repeat(2000), "Demo", "Acme");
        assert!(prompt.contains("Event Name: Demo"));
        assert!(!prompt.contains(&"x".repeat(801)));
    }
}
