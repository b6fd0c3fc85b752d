//! Activity from an HTTP endpoint serving the grouped-max aggregate.
//!
//! `GET <url>?from=<rfc3339>&to=<rfc3339>&days=<n>` returning a JSON array:
//! `[{"terminalId": "2033AB01", "updatedAt": "2024-01-08T11:00:00Z"}, ...]`.
//! Timestamps may also be epoch milliseconds or `{"$date": ...}` objects.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use rcaledger_recon::dates::parse_last_seen;
use rcaledger_recon::{ActivityObservations, ActivitySource, ActivityWindow, ReconError};

use crate::client::build_http;

pub struct HttpActivitySource {
    http: reqwest::blocking::Client,
    url: String,
    token: Option<String>,
    id_field: String,
    timestamp_field: String,
}

impl HttpActivitySource {
    pub fn new(url: &str, token: Option<String>, timeout: Duration) -> Result<Self, ReconError> {
        let http = build_http(timeout).map_err(|e| ReconError::Io(e.to_string()))?;
        Ok(Self {
            http,
            url: url.to_string(),
            token,
            id_field: "terminalId".into(),
            timestamp_field: "updatedAt".into(),
        })
    }

    pub fn with_fields(mut self, id_field: &str, timestamp_field: &str) -> Self {
        self.id_field = id_field.to_string();
        self.timestamp_field = timestamp_field.to_string();
        self
    }

    fn fetch(&self, window: &ActivityWindow) -> Result<serde_json::Value, String> {
        let days = (window.end - window.start).num_days().to_string();
        let mut req = self.http.get(&self.url).query(&[
            ("from", window.start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("to", window.end.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("days", days),
        ]);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let response = req.send().map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(format!("HTTP {}: {}", status.as_u16(), body.trim()));
        }
        response.json().map_err(|e| format!("invalid JSON: {}", e))
    }
}

impl ActivitySource for HttpActivitySource {
    fn query_recent_activity(&self, window: &ActivityWindow) -> Result<ActivityObservations, ReconError> {
        let json = self
            .fetch(window)
            .map_err(|e| ReconError::SourceUnavailable(format!("{}: {}", self.describe(), e)))?;

        let items = json.as_array().ok_or_else(|| {
            ReconError::SourceUnavailable(format!("{}: expected a JSON array", self.describe()))
        })?;

        let mut skipped = 0usize;
        let mut events: Vec<(String, DateTime<Utc>)> = Vec::with_capacity(items.len());
        for item in items {
            let id = match &item[self.id_field.as_str()] {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => {
                    skipped += 1;
                    continue;
                }
            };
            match timestamp(&item[self.timestamp_field.as_str()]) {
                Some(at) => events.push((id, at)),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            log::warn!("{}: {} item(s) without id or timestamp skipped", self.describe(), skipped);
        }
        let observations = ActivityObservations::from_events(events, window);
        log::info!(
            "{}: {} item(s), {} terminal(s) active in window",
            self.describe(),
            items.len(),
            observations.len()
        );
        Ok(observations)
    }

    fn describe(&self) -> String {
        let host = reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(String::from))
            .unwrap_or_else(|| self.url.clone());
        format!("http:{}", host)
    }
}

fn timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => parse_last_seen(s),
        serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        serde_json::Value::Object(map) => map.get("$date").and_then(timestamp),
        _ => None,
    }
}
