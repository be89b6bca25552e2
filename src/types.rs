// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - ShieldEye Domain Model
 * Scan lifecycle, findings, libraries and queue task payloads
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of a scan. Transitions are strictly forward:
/// `pending -> running -> (completed | failed)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScanStatus::Pending),
            "running" => Some(ScanStatus::Running),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Moderate => "moderate",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "moderate" | "medium" => Some(Severity::Moderate),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// Map a numeric CVSS base score to a severity bucket.
    pub fn from_cvss(score: f64) -> Self {
        if score >= 9.0 {
            Severity::Critical
        } else if score >= 7.0 {
            Severity::High
        } else if score >= 4.0 {
            Severity::Moderate
        } else {
            Severity::Low
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucketed interpretation of a 0-100 risk score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of finding kinds. Exhaustive matching keeps the analyzer from
/// ever emitting a finding without a title/severity mapping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingType {
    EvalUsage,
    HardcodedToken,
    DynamicImport,
    Webassembly,
    DomXssSink,
    FormSecurity,
    InlineEventHandler,
    IframeSecurity,
    SecurityHeader,
    SecurityCookie,
    ScriptIntegrity,
    Info,
    Error,
    Cve,
    RemoteCode,
}

impl FindingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingType::EvalUsage => "EVAL_USAGE",
            FindingType::HardcodedToken => "HARDCODED_TOKEN",
            FindingType::DynamicImport => "DYNAMIC_IMPORT",
            FindingType::Webassembly => "WEBASSEMBLY",
            FindingType::DomXssSink => "DOM_XSS_SINK",
            FindingType::FormSecurity => "FORM_SECURITY",
            FindingType::InlineEventHandler => "INLINE_EVENT_HANDLER",
            FindingType::IframeSecurity => "IFRAME_SECURITY",
            FindingType::SecurityHeader => "SECURITY_HEADER",
            FindingType::SecurityCookie => "SECURITY_COOKIE",
            FindingType::ScriptIntegrity => "SCRIPT_INTEGRITY",
            FindingType::Info => "INFO",
            FindingType::Error => "ERROR",
            FindingType::Cve => "CVE",
            FindingType::RemoteCode => "REMOTE_CODE",
        }
    }
}

impl std::fmt::Display for FindingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-supplied scan parameters, persisted verbatim on the scan row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanParameters {
    #[serde(default = "default_render_javascript")]
    pub render_javascript: bool,

    /// Per-scan render timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,

    /// Crawl depth; 0 renders only the target page.
    #[serde(default)]
    pub depth: u32,

    #[serde(default)]
    pub user_agent: Option<String>,

    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
}

fn default_render_javascript() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ScanParameters {
    fn default() -> Self {
        Self {
            render_javascript: true,
            timeout: default_timeout_ms(),
            depth: 0,
            user_agent: None,
            headers: None,
        }
    }
}

/// A persisted scan row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scan {
    pub id: String,
    pub url: String,
    pub parameters: ScanParameters,
    pub status: ScanStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub global_risk_score: i32,
    /// Object-store keys produced by the render stage, keyed by artifact kind.
    #[serde(default)]
    pub artifact_paths: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One script observed on the scanned page, inline or external.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRecord {
    pub id: String,
    pub scan_id: String,
    /// Absent for inline scripts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub is_inline: bool,
    pub artifact_path: String,
    /// Hex SHA-256 of the script body.
    pub fingerprint: String,
    pub detected_patterns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_version: Option<String>,
    pub confidence: i32,
}

/// An advisory attached to a detected library.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvss_score: Option<f64>,
    #[serde(default)]
    pub references: Vec<String>,
}

/// A consolidated client-side library detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryRecord {
    pub id: String,
    pub scan_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_version: Option<String>,
    pub related_scripts: Vec<String>,
    pub detection_method: String,
    pub vulnerabilities: Vec<Vulnerability>,
    pub risk_score: i32,
    pub confidence: i32,
}

/// A discrete security observation attached to a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    pub scan_id: String,
    #[serde(rename = "type")]
    pub finding_type: FindingType,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl Finding {
    pub fn new(
        scan_id: &str,
        finding_type: FindingType,
        title: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        location: impl Into<String>,
        evidence: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scan_id: scan_id.to_string(),
            finding_type,
            title: title.into(),
            description: description.into(),
            severity,
            location: location.into(),
            evidence,
        }
    }
}

/// Cached advisory lookup for one `(package, version)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityCacheEntry {
    pub package_name: String,
    /// Empty string when the lookup was version-less.
    pub version: String,
    pub vulnerabilities: Vec<Vulnerability>,
    pub last_updated: DateTime<Utc>,
    pub ttl_seconds: i64,
}

impl VulnerabilityCacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.last_updated + chrono::Duration::seconds(self.ttl_seconds)
    }
}

// ============================================================================
// Queue task payloads
// ============================================================================

/// Primary scan job payload published to `scan-queue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanTask {
    pub scan_id: String,
    pub url: String,
    pub parameters: ScanParameters,
}

/// An inline script captured from the rendered DOM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineScript {
    pub content: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// An external script reference captured from the rendered DOM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalScript {
    pub src: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// One network resource observed while rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkResource {
    pub url: String,
    pub resource_type: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing_ms: Option<u64>,
}

/// Everything the render stage learned about the page, handed to analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomAnalysis {
    pub page_url: String,
    /// URL after redirects, when it differs from `page_url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    pub inline_scripts: Vec<InlineScript>,
    pub external_scripts: Vec<ExternalScript>,
    /// Source-map artifact keys by the script URL that referenced them.
    #[serde(default)]
    pub source_maps: HashMap<String, String>,
    #[serde(default)]
    pub resources: Vec<NetworkResource>,
    /// Top-level document response headers, lower-cased keys.
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
    /// Raw Set-Cookie header values from the document response.
    #[serde(default)]
    pub set_cookies: Vec<String>,
}

/// One stored external-script artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptArtifact {
    /// Object-store key (`scans/{scanId}/scripts/external-script-{i}.js`).
    pub path: String,
    pub source_url: String,
}

/// Artifact manifest carried from render to analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisArtifacts {
    pub dom_snapshot: String,
    pub scripts: Vec<ScriptArtifact>,
}

/// Analysis job payload published to `analysis-queue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisTask {
    pub scan_id: String,
    pub artifacts: AnalysisArtifacts,
    pub dom_analysis: DomAnalysis,
    #[serde(default)]
    pub fetch_errors: Vec<String>,
}

/// Worker completion record stored as the queue job's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub scan_id: String,
    pub success: bool,
    #[serde(default)]
    pub artifacts: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One library detection before consolidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub confidence: i32,
    pub detection_method: String,
    pub evidence: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_terminal() {
        assert!(!ScanStatus::Pending.is_terminal());
        assert!(!ScanStatus::Running.is_terminal());
        assert!(ScanStatus::Completed.is_terminal());
        assert!(ScanStatus::Failed.is_terminal());
    }

    #[test]
    fn test_severity_from_cvss_buckets() {
        assert_eq!(Severity::from_cvss(9.8), Severity::Critical);
        assert_eq!(Severity::from_cvss(9.0), Severity::Critical);
        assert_eq!(Severity::from_cvss(7.5), Severity::High);
        assert_eq!(Severity::from_cvss(4.0), Severity::Moderate);
        assert_eq!(Severity::from_cvss(3.9), Severity::Low);
        assert_eq!(Severity::from_cvss(0.0), Severity::Low);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Moderate);
        assert!(Severity::Moderate > Severity::Low);
    }

    #[test]
    fn test_finding_type_wire_format() {
        let ft = FindingType::DomXssSink;
        let json = serde_json::to_string(&ft).unwrap();
        assert_eq!(json, "\"DOM_XSS_SINK\"");
        let back: FindingType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FindingType::DomXssSink);
    }

    #[test]
    fn test_scan_parameters_defaults() {
        let params: ScanParameters = serde_json::from_str("{}").unwrap();
        assert!(params.render_javascript);
        assert_eq!(params.timeout, 30_000);
        assert_eq!(params.depth, 0);
    }

    #[test]
    fn test_cache_entry_expiry() {
        let now = Utc::now();
        let entry = VulnerabilityCacheEntry {
            package_name: "jquery".to_string(),
            version: "1.12.4".to_string(),
            vulnerabilities: Vec::new(),
            last_updated: now - chrono::Duration::seconds(2),
            ttl_seconds: 1,
        };
        assert!(entry.is_expired(now));

        let fresh = VulnerabilityCacheEntry {
            last_updated: now,
            ttl_seconds: 86_400,
            ..entry
        };
        assert!(!fresh.is_expired(now));
    }
}
