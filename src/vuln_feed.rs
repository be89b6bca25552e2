// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Vulnerability Feed Client
 * OSV advisory lookups memoized through the vulnerability cache
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::FeedConfig;
use crate::database::Database;
use crate::types::{Severity, Vulnerability, VulnerabilityCacheEntry};

/// OSV query response shape (the fields this client consumes).
#[derive(Debug, Deserialize)]
struct OsvResponse {
    #[serde(default)]
    vulns: Vec<OsvRecord>,
}

#[derive(Debug, Deserialize)]
struct OsvRecord {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    severity: Vec<OsvSeverity>,
    #[serde(default)]
    references: Vec<OsvReference>,
    #[serde(default)]
    database_specific: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OsvSeverity {
    #[serde(rename = "type", default)]
    severity_type: Option<String>,
    #[serde(default)]
    score: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OsvReference {
    #[serde(default)]
    url: Option<String>,
}

/// Extract a numeric CVSS base score from an OSV record when one is present,
/// either as a bare number or via the database_specific severity label.
fn extract_cvss(record: &OsvRecord) -> Option<f64> {
    for severity in &record.severity {
        if let Some(score) = &severity.score {
            if let Ok(numeric) = score.parse::<f64>() {
                return Some(numeric);
            }
            // CVSS vector strings carry no base score; the label below covers
            // records that ship only a vector.
            let _ = severity.severity_type;
        }
    }
    None
}

fn severity_label(record: &OsvRecord) -> Option<Severity> {
    record
        .database_specific
        .as_ref()
        .and_then(|ds| ds.get("severity"))
        .and_then(|s| s.as_str())
        .and_then(|s| Severity::parse(&s.to_ascii_lowercase()))
}

fn map_record(record: OsvRecord) -> Vulnerability {
    let cvss = extract_cvss(&record);
    let severity = cvss
        .map(Severity::from_cvss)
        .or_else(|| severity_label(&record))
        .unwrap_or(Severity::Moderate);

    let title = record
        .summary
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| record.id.clone());
    let description = record
        .details
        .clone()
        .or(record.summary.clone())
        .unwrap_or_default();

    Vulnerability {
        id: record.id,
        title,
        description,
        severity,
        cvss_score: cvss,
        references: record
            .references
            .into_iter()
            .filter_map(|r| r.url)
            .collect(),
    }
}

/// Advisory lookups with a database-backed read-through cache.
///
/// Lookup failures degrade to an empty list and are never cached, so a feed
/// outage cannot poison results. Genuine empty answers ARE cached, with the
/// shorter negative TTL.
#[derive(Clone)]
pub struct VulnerabilityFeed {
    client: Client,
    config: FeedConfig,
    db: Arc<Database>,
}

impl VulnerabilityFeed {
    pub fn new(config: FeedConfig, db: Arc<Database>) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { client, config, db }
    }

    /// Fetch known vulnerabilities for a package, cache-first.
    pub async fn get_vulnerabilities(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Vec<Vulnerability> {
        let now = Utc::now();

        match self.db.get_vulnerability_cache(name, version).await {
            Ok(Some(entry)) if !entry.is_expired(now) => {
                debug!(package = name, version, "Vulnerability cache hit");
                return entry.vulnerabilities;
            }
            Ok(_) => {}
            Err(e) => warn!(package = name, error = %e, "Vulnerability cache read failed"),
        }

        let vulns = match self.query_feed(name, version).await {
            Ok(vulns) => vulns,
            Err(e) => {
                warn!(package = name, version, error = %e, "Advisory feed lookup failed");
                return Vec::new();
            }
        };

        let ttl = if vulns.is_empty() {
            self.config.negative_cache_ttl_seconds
        } else {
            self.config.cache_ttl_seconds
        };
        let entry = VulnerabilityCacheEntry {
            package_name: name.to_string(),
            version: version.unwrap_or("").to_string(),
            vulnerabilities: vulns.clone(),
            last_updated: now,
            ttl_seconds: ttl,
        };
        if let Err(e) = self.db.upsert_vulnerability_cache(&entry).await {
            warn!(package = name, error = %e, "Vulnerability cache write failed");
        }

        vulns
    }

    async fn query_feed(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Vec<Vulnerability>, reqwest::Error> {
        let mut body = serde_json::json!({
            "package": { "name": name, "ecosystem": "npm" }
        });
        if let Some(version) = version {
            body["version"] = serde_json::Value::String(version.to_string());
        }

        let response = self
            .client
            .post(&self.config.osv_api_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: OsvResponse = response.json().await?;
        debug!(
            package = name,
            version,
            advisories = parsed.vulns.len(),
            "Advisory feed answered"
        );

        Ok(parsed.vulns.into_iter().map(map_record).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: serde_json::Value) -> OsvRecord {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_map_record_with_numeric_score() {
        let vuln = map_record(record(serde_json::json!({
            "id": "GHSA-xxxx",
            "summary": "Prototype pollution",
            "details": "Long details",
            "severity": [{ "type": "CVSS_V3", "score": "9.8" }],
            "references": [{ "url": "https://example.com/adv" }]
        })));

        assert_eq!(vuln.id, "GHSA-xxxx");
        assert_eq!(vuln.title, "Prototype pollution");
        assert_eq!(vuln.description, "Long details");
        assert_eq!(vuln.severity, Severity::Critical);
        assert_eq!(vuln.cvss_score, Some(9.8));
        assert_eq!(vuln.references, vec!["https://example.com/adv"]);
    }

    #[test]
    fn test_map_record_falls_back_to_id_title() {
        let vuln = map_record(record(serde_json::json!({ "id": "CVE-2021-0001" })));
        assert_eq!(vuln.title, "CVE-2021-0001");
        assert_eq!(vuln.severity, Severity::Moderate);
        assert!(vuln.cvss_score.is_none());
    }

    #[test]
    fn test_map_record_uses_database_specific_label() {
        let vuln = map_record(record(serde_json::json!({
            "id": "GHSA-yyyy",
            "severity": [{ "type": "CVSS_V3", "score": "CVSS:3.1/AV:N/AC:L" }],
            "database_specific": { "severity": "HIGH" }
        })));
        assert_eq!(vuln.severity, Severity::High);
    }

    #[test]
    fn test_severity_buckets_from_scores() {
        for (score, expected) in [
            ("9.1", Severity::Critical),
            ("7.5", Severity::High),
            ("5.0", Severity::Moderate),
            ("2.1", Severity::Low),
        ] {
            let vuln = map_record(record(serde_json::json!({
                "id": "X",
                "severity": [{ "type": "CVSS_V3", "score": score }]
            })));
            assert_eq!(vuln.severity, expected, "score {}", score);
        }
    }
}
