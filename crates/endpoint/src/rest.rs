//! REST client for a Google-Sheets-style `values.*` API.
//!
//! Authentication is a caller-supplied bearer token; obtaining and refreshing
//! credentials is the caller's concern.

use async_trait::async_trait;
use reqwest::Client;

use crate::{EndpointError, TabularEndpoint};

/// Tabular endpoint backed by the `spreadsheets.values` REST surface.
pub struct RestEndpoint {
    http: Client,
    base_url: String,
    spreadsheet_id: String,
    token: String,
}

impl RestEndpoint {
    pub fn new(
        base_url: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self, EndpointError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| EndpointError::Read(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            token: token.into(),
        })
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{range}",
            self.base_url, self.spreadsheet_id
        )
    }

    fn to_cells(value: &serde_json::Value) -> Vec<Vec<String>> {
        let Some(rows) = value.get("values").and_then(|v| v.as_array()) else {
            return Vec::new();
        };
        rows.iter()
            .map(|row| {
                row.as_array()
                    .map(|cells| {
                        cells
                            .iter()
                            .map(|c| match c {
                                serde_json::Value::String(s) => s.clone(),
                                other => other.to_string(),
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect()
    }

    fn body(values: Vec<Vec<String>>) -> serde_json::Value {
        serde_json::json!({ "values": values })
    }
}

#[async_trait]
impl TabularEndpoint for RestEndpoint {
    async fn values_get(&self, range: &str) -> Result<Vec<Vec<String>>, EndpointError> {
        tracing::debug!("reading range {range}");
        let response = self
            .http
            .get(self.values_url(range))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| EndpointError::Read(e.to_string()))?
            .error_for_status()
            .map_err(|e| EndpointError::Read(e.to_string()))?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EndpointError::Read(e.to_string()))?;

        Ok(Self::to_cells(&payload))
    }

    async fn values_update(
        &self,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<(), EndpointError> {
        tracing::debug!("updating range {range}");
        self.http
            .put(format!(
                "{}?valueInputOption=USER_ENTERED",
                self.values_url(range)
            ))
            .bearer_auth(&self.token)
            .json(&Self::body(values))
            .send()
            .await
            .map_err(|e| EndpointError::Write(e.to_string()))?
            .error_for_status()
            .map_err(|e| EndpointError::Write(e.to_string()))?;
        Ok(())
    }

    async fn values_append(
        &self,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<(), EndpointError> {
        tracing::debug!("appending to range {range}");
        self.http
            .post(format!(
                "{}:append?valueInputOption=USER_ENTERED",
                self.values_url(range)
            ))
            .bearer_auth(&self.token)
            .json(&Self::body(values))
            .send()
            .await
            .map_err(|e| EndpointError::Write(e.to_string()))?
            .error_for_status()
            .map_err(|e| EndpointError::Write(e.to_string()))?;
        Ok(())
    }
}
