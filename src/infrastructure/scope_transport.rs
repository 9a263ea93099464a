// Scope HTTP transport implementation over the webMI data calls
use crate::application::source_transport::SourceTransport;
use crate::domain::error::{TrendError, TrendResult};
use crate::domain::point::{Sample, Timestamp};
use crate::domain::sample::QueryPage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Upper bound the server accepts for an open ended query.
const HIGHEST_TIMESTAMP: Timestamp = 8_640_000_000_000_000;

const QUERY_CALL: &str = "m1scope_querytime";
const TIME_CALL: &str = "m1gettime";

#[derive(Debug, Clone)]
pub struct ScopeHttpTransport {
    host: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    error: i64,
    #[serde(default)]
    errorstring: Option<String>,
    #[serde(default)]
    result: Option<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    channels: Vec<String>,
    #[serde(default)]
    samples: Vec<ScopeSample>,
    #[serde(default)]
    remaining: u64,
}

/// One timestamp with a value per requested channel, in channel order.
#[derive(Debug, Deserialize)]
struct ScopeSample {
    t: Timestamp,
    v: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct TimeResponse {
    #[serde(default)]
    error: i64,
    #[serde(default)]
    errorstring: Option<String>,
    #[serde(default)]
    timestamp: Option<Timestamp>,
}

impl ScopeHttpTransport {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn call_url(&self, call: &str) -> String {
        format!("{}/webMI/?{}", self.host, call)
    }

    async fn execute_call<T: DeserializeOwned>(&self, call: &str, body: String) -> Result<T> {
        let response = self
            .client
            .post(self.call_url(call))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", call))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} failed with status {}: {}", call, status, body);
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse {} response", call))
    }
}

/// Form body of a range query. Channel names are sent as `channel[i]`.
fn query_body(
    recorder: &str,
    channels: &[String],
    from: Timestamp,
    until: Option<Timestamp>,
    limit: Option<u32>,
) -> String {
    let mut fields = vec![
        ("recname".to_string(), recorder.to_string()),
        ("timestart".to_string(), from.to_string()),
        ("timeend".to_string(), until.unwrap_or(HIGHEST_TIMESTAMP).to_string()),
    ];
    if let Some(limit) = limit {
        fields.push(("limit".to_string(), limit.to_string()));
    }
    for (i, channel) in channels.iter().enumerate() {
        fields.push((format!("channel[{}]", i), channel.clone()));
    }

    fields
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Splits the per-timestamp value rows into one sample list per channel.
fn to_query_page(recorder: &str, response: QueryResponse) -> TrendResult<QueryPage> {
    if response.error > 0 {
        return Err(TrendError::source(
            recorder,
            response
                .errorstring
                .unwrap_or_else(|| format!("error {}", response.error)),
        ));
    }
    let Some(result) = response.result else {
        return Ok(QueryPage::default());
    };

    let mut page = QueryPage {
        remaining: result.remaining,
        ..Default::default()
    };
    for channel in &result.channels {
        page.channels.insert(channel.clone(), Vec::new());
    }

    for sample in result.samples {
        for (channel, value) in result.channels.iter().zip(sample.v) {
            if let Some(samples) = page.channels.get_mut(channel) {
                samples.push(Sample { t: sample.t, v: value });
            }
        }
    }
    Ok(page)
}

#[async_trait]
impl SourceTransport for ScopeHttpTransport {
    async fn query(
        &self,
        recorder: &str,
        channels: &[String],
        from: Timestamp,
        until: Option<Timestamp>,
        limit: Option<u32>,
    ) -> TrendResult<QueryPage> {
        let body = query_body(recorder, channels, from, until, limit);
        tracing::debug!(recorder, channels = channels.len(), from, ?until, "scope query");

        let response: QueryResponse = self
            .execute_call(QUERY_CALL, body)
            .await
            .map_err(|e| TrendError::source(recorder, format!("{:#}", e)))?;

        to_query_page(recorder, response)
    }

    async fn get_time(&self) -> TrendResult<Timestamp> {
        let response: TimeResponse = self
            .execute_call(TIME_CALL, String::new())
            .await
            .map_err(|e| TrendError::source(&self.host, format!("{:#}", e)))?;

        if response.error > 0 {
            return Err(TrendError::source(
                &self.host,
                response.errorstring.unwrap_or_else(|| "time request failed".into()),
            ));
        }
        response
            .timestamp
            .ok_or_else(|| TrendError::source(&self.host, "time response without timestamp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_body_encodes_channels() {
        let body = query_body(
            "Recorder1",
            &["Plant/Temp 1".to_string(), "Flow".to_string()],
            1_000,
            Some(2_000),
            Some(500),
        );
        assert_eq!(
            body,
            "recname=Recorder1&timestart=1000&timeend=2000&limit=500\
             &channel%5B0%5D=Plant%2FTemp%201&channel%5B1%5D=Flow"
        );
    }

    #[test]
    fn test_open_query_uses_highest_timestamp() {
        let body = query_body("Recorder1", &[], 0, None, None);
        assert_eq!(body, "recname=Recorder1&timestart=0&timeend=8640000000000000");
    }

    #[test]
    fn test_response_split_per_channel() {
        let response: QueryResponse = serde_json::from_str(
            r#"{
                "error": 0,
                "result": {
                    "channels": ["Temp", "Flow"],
                    "samples": [
                        {"t": 10, "v": [1.5, 3.0]},
                        {"t": 20, "v": [null, 4.0]}
                    ],
                    "remaining": 7
                }
            }"#,
        )
        .unwrap();

        let page = to_query_page("Recorder1", response).unwrap();
        assert_eq!(page.remaining, 7);
        assert_eq!(
            page.channels["Temp"],
            vec![Sample::new(10, 1.5), Sample { t: 20, v: None }]
        );
        assert_eq!(page.channels["Flow"], vec![Sample::new(10, 3.0), Sample::new(20, 4.0)]);
    }

    #[test]
    fn test_error_response_maps_to_source_error() {
        let response: QueryResponse =
            serde_json::from_str(r#"{"error": 3, "errorstring": "access denied"}"#).unwrap();

        assert_eq!(
            to_query_page("Recorder2", response),
            Err(TrendError::source("Recorder2", "access denied"))
        );
    }

    #[test]
    fn test_call_url() {
        let transport = ScopeHttpTransport::new("http://scada.local/");
        assert_eq!(
            transport.call_url(QUERY_CALL),
            "http://scada.local/webMI/?m1scope_querytime"
        );
    }
}
