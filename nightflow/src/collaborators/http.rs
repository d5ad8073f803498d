//! HTTP API source.

use super::{ApiSource, Record};
use crate::errors::TaskError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Fetches records with a `GET` request to a JSON endpoint.
///
/// The body may be an array of objects, an object with a `data` array, or a
/// single object.
#[derive(Debug, Clone)]
pub struct HttpApiSource {
    client: reqwest::Client,
    url: String,
}

impl HttpApiSource {
    /// Creates a source for `url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nightflow/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ApiSource for HttpApiSource {
    async fn fetch(&self) -> Result<Vec<Record>, TaskError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| TaskError::collaborator(format!("request to {} failed: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(
                TaskError::collaborator(format!("{} returned HTTP {status}", self.url))
                    .with_detail(body),
            );
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TaskError::collaborator(format!("invalid JSON from {}: {e}", self.url)))?;
        let records = records_from_body(body)?;
        debug!(url = %self.url, records = records.len(), "Fetched API records");
        Ok(records)
    }
}

fn records_from_body(body: Value) -> Result<Vec<Record>, TaskError> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                map.insert("data".to_string(), other);
                vec![Value::Object(map)]
            }
            None => vec![Value::Object(map)],
        },
        other => {
            return Err(TaskError::collaborator(format!(
                "expected a JSON object or array, got {other}"
            )))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(map) => Ok(map),
            other => Err(TaskError::collaborator(format!(
                "record {index} is not a JSON object: {other}"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_records_from_array_and_envelope() {
        let from_array = records_from_body(json!([{"a": 1}, {"a": 2}])).unwrap();
        assert_eq!(from_array.len(), 2);

        let from_envelope = records_from_body(json!({"data": [{"a": 1}], "page": 1})).unwrap();
        assert_eq!(from_envelope.len(), 1);
        assert_eq!(from_envelope[0]["a"], json!(1));
    }

    #[test]
    fn test_single_object_is_one_record() {
        let records = records_from_body(json!({"data": "scalar", "b": true})).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["data"], json!("scalar"));
    }

    #[test]
    fn test_non_object_records_are_rejected() {
        assert!(records_from_body(json!([1, 2])).is_err());
        assert!(records_from_body(json!("text")).is_err());
    }

    #[test]
    fn test_new_builds_client() {
        let source = HttpApiSource::new("http://localhost:9/data", Duration::from_secs(5)).unwrap();
        assert_eq!(source.url(), "http://localhost:9/data");
    }
}
