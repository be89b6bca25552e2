// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Insight Provider
 * Pluggable report-enrichment seam: a no-op default and an HTTP provider
 * that POSTs a context blob and returns the text body
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::LimitsConfig;

/// External report-enrichment collaborator. The core only guarantees: given a
/// JSON context blob, POST it to the configured endpoint and return the text
/// body. Without an endpoint the provider is a no-op.
#[derive(Clone)]
pub enum InsightProvider {
    Noop,
    Http {
        client: Client,
        endpoint: String,
    },
}

impl InsightProvider {
    pub fn from_config(limits: &LimitsConfig) -> Self {
        match &limits.insight_endpoint {
            Some(endpoint) => {
                let client = Client::builder()
                    .timeout(limits.insight_timeout)
                    .build()
                    .unwrap_or_default();
                Self::Http {
                    client,
                    endpoint: endpoint.clone(),
                }
            }
            None => Self::Noop,
        }
    }

    pub fn noop() -> Self {
        Self::Noop
    }

    #[cfg(test)]
    pub fn http(endpoint: &str, timeout: std::time::Duration) -> Self {
        Self::Http {
            client: Client::builder().timeout(timeout).build().unwrap_or_default(),
            endpoint: endpoint.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Http { .. })
    }

    /// Generate an insight text for a context blob. Failures degrade to None;
    /// results never depend on this collaborator.
    pub async fn generate(&self, context: &Value) -> Option<String> {
        match self {
            Self::Noop => None,
            Self::Http { client, endpoint } => {
                let response = match client.post(endpoint).json(context).send().await {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(error = %e, "Insight provider request failed");
                        return None;
                    }
                };

                if !response.status().is_success() {
                    warn!(
                        status = response.status().as_u16(),
                        "Insight provider returned non-success"
                    );
                    return None;
                }

                match response.text().await {
                    Ok(text) if !text.trim().is_empty() => {
                        debug!(chars = text.len(), "Insight generated");
                        Some(text)
                    }
                    Ok(_) => None,
                    Err(e) => {
                        warn!(error = %e, "Insight provider body read failed");
                        None
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_noop_returns_none() {
        let provider = InsightProvider::noop();
        assert!(!provider.is_enabled());
        assert!(provider.generate(&json!({"scan": "x"})).await.is_none());
    }

    #[tokio::test]
    async fn test_http_failure_degrades_to_none() {
        // Nothing listens on this port; the provider must swallow the error.
        let provider =
            InsightProvider::http("http://127.0.0.1:1/insight", Duration::from_millis(200));
        assert!(provider.is_enabled());
        assert!(provider.generate(&json!({})).await.is_none());
    }
}
