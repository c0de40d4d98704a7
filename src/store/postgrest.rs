use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, Url};
use serde_json::Value;
use tracing::debug;

use super::{Row, RowStore, StoreError, StoredRecord};
use crate::config::SupabaseCredentials;
use crate::models::Event;

const PAGE_SIZE: usize = 1000;
const UPSERT_PREFER: &str = "resolution=merge-duplicates,return=representation";

/// Supabase REST (PostgREST) table.
pub struct PostgrestStore {
    client: Client,
    base: Url,
    api_key: String,
    table: String,
}

impl PostgrestStore {
    pub fn new(
        credentials: &SupabaseCredentials,
        table: &str,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let base = Url::parse(credentials.url.trim())
            .map_err(|err| StoreError::Config(format!("bad SUPABASE_URL: {err}")))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::Config(format!("bad SUPABASE_URL: {base}")));
        }
        if table.trim().is_empty() {
            return Err(StoreError::Config("table name is empty".into()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            api_key: credentials.key.clone(),
            table: table.to_string(),
        })
    }

    fn table_url(&self) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["rest", "v1", self.table.as_str()]);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn send_for_rows(&self, request: RequestBuilder) -> Result<Vec<Value>, StoreError> {
        let response = request.send()?;
        let status = response.status();
        let body = response.text()?;
        if status.as_u16() >= 400 {
            return Err(StoreError::rejected(status.as_u16(), &body));
        }
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(&body) {
            Ok(Value::Array(items)) => Ok(items),
            Ok(other) => Err(StoreError::Response(format!(
                "expected an array, got {}",
                crate::scraping::base::truncate_chars(&other.to_string(), 120)
            ))),
            Err(err) => Err(StoreError::Response(err.to_string())),
        }
    }
}

impl RowStore for PostgrestStore {
    fn upsert(&self, rows: &[Row], conflict_column: Option<&str>) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut url = self.table_url();
        if let Some(column) = conflict_column {
            url.query_pairs_mut().append_pair("on_conflict", column);
        }
        let request = self
            .request(Method::POST, url)
            .header(CONTENT_TYPE, "application/json")
            .header("Prefer", UPSERT_PREFER)
            .json(rows);
        let accepted = self.send_for_rows(request)?.len();
        debug!(table = %self.table, rows = rows.len(), accepted, "postgrest upsert");
        Ok(accepted)
    }

    fn fetch_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let mut records = Vec::new();
        let mut offset = 0;
        loop {
            let mut url = self.table_url();
            url.query_pairs_mut()
                .append_pair("select", "*")
                .append_pair("order", "id.asc")
                .append_pair("limit", &PAGE_SIZE.to_string())
                .append_pair("offset", &offset.to_string());
            let page = self.send_for_rows(self.request(Method::GET, url))?;
            let fetched = page.len();
            records.extend(page.iter().filter_map(|value| {
                let row = value.as_object()?;
                let id = match row.get("id")? {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                Some(StoredRecord {
                    id,
                    event: Event::from_row(row),
                })
            }));
            debug!(table = %self.table, offset, fetched, "postgrest page");
            if fetched < PAGE_SIZE {
                break;
            }
            offset += fetched;
        }
        Ok(records)
    }

    fn delete(&self, ids: &[String]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut url = self.table_url();
        url.query_pairs_mut()
            .append_pair("id", &format!("in.({})", ids.join(",")));
        let request = self
            .request(Method::DELETE, url)
            .header("Prefer", "return=representation");
        Ok(self.send_for_rows(request)?.len())
    }
}
