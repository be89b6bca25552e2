// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - HTTP Security Control Analyzer
 * Response-header, CORS and cookie-flag checks
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::types::{Finding, FindingType, Severity};

static SENSITIVE_COOKIE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)session|auth|token|jwt").expect("Invalid cookie name regex"));

static WEAK_REFERRER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)unsafe-url|no-referrer-when-downgrade").expect("Invalid referrer regex")
});

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers.get(name).map(|v| v.as_str())
}

/// Analyze the document response headers and Set-Cookie values.
///
/// `headers` must be keyed lower-case. Deterministic for identical inputs.
pub fn analyze_headers(
    scan_id: &str,
    is_https: bool,
    headers: &HashMap<String, String>,
    set_cookies: &[String],
) -> Vec<Finding> {
    let mut findings = Vec::new();

    check_csp(scan_id, headers, &mut findings);
    check_hsts(scan_id, is_https, headers, &mut findings);
    check_frame_options(scan_id, headers, &mut findings);
    check_content_type_options(scan_id, headers, &mut findings);
    check_referrer_policy(scan_id, headers, &mut findings);
    check_permissions_policy(scan_id, headers, &mut findings);
    if is_https {
        check_cross_origin_isolation(scan_id, headers, &mut findings);
    }
    check_cors(scan_id, headers, &mut findings);
    check_cookies(scan_id, set_cookies, &mut findings);

    findings
}

fn push_header_finding(
    findings: &mut Vec<Finding>,
    scan_id: &str,
    title: &str,
    description: &str,
    severity: Severity,
    evidence: Option<String>,
) {
    findings.push(Finding::new(
        scan_id,
        FindingType::SecurityHeader,
        title,
        description,
        severity,
        "headers",
        evidence,
    ));
}

fn check_csp(scan_id: &str, headers: &HashMap<String, String>, findings: &mut Vec<Finding>) {
    match header(headers, "content-security-policy") {
        None => push_header_finding(
            findings,
            scan_id,
            "Content-Security-Policy header missing",
            "Without a CSP the browser applies no restrictions on script sources, \
             leaving injected markup free to execute.",
            Severity::Moderate,
            None,
        ),
        Some(value) => {
            let lowered = value.to_ascii_lowercase();
            if lowered.contains("unsafe-inline") || lowered.contains("unsafe-eval") {
                push_header_finding(
                    findings,
                    scan_id,
                    "Content-Security-Policy allows unsafe directives",
                    "The policy permits unsafe-inline or unsafe-eval, which restores \
                     most of the attack surface a CSP is meant to remove.",
                    Severity::High,
                    Some(value.to_string()),
                );
            }
        }
    }
}

fn check_hsts(
    scan_id: &str,
    is_https: bool,
    headers: &HashMap<String, String>,
    findings: &mut Vec<Finding>,
) {
    if is_https && header(headers, "strict-transport-security").is_none() {
        push_header_finding(
            findings,
            scan_id,
            "Strict-Transport-Security header missing",
            "Without HSTS, first requests and downgraded links go over plain HTTP and \
             can be intercepted.",
            Severity::High,
            None,
        );
    }
}

fn check_frame_options(
    scan_id: &str,
    headers: &HashMap<String, String>,
    findings: &mut Vec<Finding>,
) {
    match header(headers, "x-frame-options") {
        None => push_header_finding(
            findings,
            scan_id,
            "X-Frame-Options header missing",
            "The page can be framed by any site, enabling clickjacking overlays.",
            Severity::Moderate,
            None,
        ),
        Some(value) => {
            let upper = value.trim().to_ascii_uppercase();
            if upper != "DENY" && upper != "SAMEORIGIN" {
                push_header_finding(
                    findings,
                    scan_id,
                    "X-Frame-Options has a weak value",
                    "Only DENY and SAMEORIGIN are honored consistently by browsers.",
                    Severity::Moderate,
                    Some(value.to_string()),
                );
            }
        }
    }
}

fn check_content_type_options(
    scan_id: &str,
    headers: &HashMap<String, String>,
    findings: &mut Vec<Finding>,
) {
    let valid = header(headers, "x-content-type-options")
        .map(|v| v.trim().eq_ignore_ascii_case("nosniff"))
        .unwrap_or(false);
    if !valid {
        push_header_finding(
            findings,
            scan_id,
            "X-Content-Type-Options header missing or invalid",
            "Without nosniff, browsers may MIME-sniff responses into executable types.",
            Severity::Moderate,
            header(headers, "x-content-type-options").map(|v| v.to_string()),
        );
    }
}

fn check_referrer_policy(
    scan_id: &str,
    headers: &HashMap<String, String>,
    findings: &mut Vec<Finding>,
) {
    match header(headers, "referrer-policy") {
        None => push_header_finding(
            findings,
            scan_id,
            "Referrer-Policy header missing",
            "Full URLs leak to third parties through the Referer header by default.",
            Severity::Moderate,
            None,
        ),
        Some(value) if WEAK_REFERRER_REGEX.is_match(value) => push_header_finding(
            findings,
            scan_id,
            "Referrer-Policy allows downgrade",
            "The configured policy still sends full URLs cross-origin or over HTTP.",
            Severity::Moderate,
            Some(value.to_string()),
        ),
        Some(_) => {}
    }
}

fn check_permissions_policy(
    scan_id: &str,
    headers: &HashMap<String, String>,
    findings: &mut Vec<Finding>,
) {
    if header(headers, "permissions-policy").is_none() {
        push_header_finding(
            findings,
            scan_id,
            "Permissions-Policy header missing",
            "Browser features (camera, geolocation, etc.) are not restricted for \
             embedded content.",
            Severity::Low,
            None,
        );
    }
}

fn check_cross_origin_isolation(
    scan_id: &str,
    headers: &HashMap<String, String>,
    findings: &mut Vec<Finding>,
) {
    let coop_ok = header(headers, "cross-origin-opener-policy")
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            v == "same-origin" || v == "same-origin-allow-popups"
        })
        .unwrap_or(false);
    if !coop_ok {
        push_header_finding(
            findings,
            scan_id,
            "Cross-Origin-Opener-Policy header missing or weak",
            "Without COOP the window can be controlled by cross-origin openers.",
            Severity::Low,
            header(headers, "cross-origin-opener-policy").map(|v| v.to_string()),
        );
    }

    if header(headers, "cross-origin-embedder-policy").is_none() {
        push_header_finding(
            findings,
            scan_id,
            "Cross-Origin-Embedder-Policy header missing",
            "COEP is required for cross-origin isolation of powerful APIs.",
            Severity::Low,
            None,
        );
    }

    if header(headers, "cross-origin-resource-policy").is_none() {
        push_header_finding(
            findings,
            scan_id,
            "Cross-Origin-Resource-Policy header missing",
            "Responses can be embedded by any origin without CORP.",
            Severity::Low,
            None,
        );
    }
}

fn check_cors(scan_id: &str, headers: &HashMap<String, String>, findings: &mut Vec<Finding>) {
    let allow_origin = header(headers, "access-control-allow-origin").map(|v| v.trim());
    let allow_credentials = header(headers, "access-control-allow-credentials")
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    match allow_origin {
        Some("*") if allow_credentials => push_header_finding(
            findings,
            scan_id,
            "Insecure CORS configuration: wildcard origin with credentials",
            "Access-Control-Allow-Origin: * combined with credentials exposes \
             authenticated responses to every origin.",
            Severity::High,
            Some("access-control-allow-origin: *; access-control-allow-credentials: true".into()),
        ),
        Some("*") => push_header_finding(
            findings,
            scan_id,
            "CORS allows any origin",
            "Responses are readable cross-origin from any site.",
            Severity::Moderate,
            Some("access-control-allow-origin: *".into()),
        ),
        _ => {}
    }
}

/// Parse one Set-Cookie value into (name, has_secure, has_httponly, has_samesite).
fn parse_cookie(raw: &str) -> Option<(String, bool, bool, bool)> {
    let mut parts = raw.split(';');
    let name = parts.next()?.split('=').next()?.trim().to_string();
    if name.is_empty() {
        return None;
    }

    let mut secure = false;
    let mut http_only = false;
    let mut same_site = false;
    for attr in parts {
        let attr = attr.trim().to_ascii_lowercase();
        if attr == "secure" {
            secure = true;
        } else if attr == "httponly" {
            http_only = true;
        } else if attr.starts_with("samesite") {
            same_site = true;
        }
    }

    Some((name, secure, http_only, same_site))
}

fn check_cookies(scan_id: &str, set_cookies: &[String], findings: &mut Vec<Finding>) {
    let mut sensitive_reported = false;
    let mut generic_reported = false;

    for raw in set_cookies {
        if sensitive_reported && generic_reported {
            break;
        }

        let (name, secure, http_only, same_site) = match parse_cookie(raw) {
            Some(parsed) => parsed,
            None => continue,
        };

        let mut missing = Vec::new();
        if !secure {
            missing.push("Secure");
        }
        if !http_only {
            missing.push("HttpOnly");
        }
        if !same_site {
            missing.push("SameSite");
        }
        if missing.is_empty() {
            continue;
        }

        let sensitive = SENSITIVE_COOKIE_REGEX.is_match(&name);

        if sensitive && !sensitive_reported {
            sensitive_reported = true;
            findings.push(Finding::new(
                scan_id,
                FindingType::SecurityCookie,
                "Sensitive cookie missing security flags",
                "A session/auth cookie is set without the full Secure/HttpOnly/SameSite \
                 protection, exposing it to interception or script access.",
                Severity::High,
                "cookies",
                Some(format!("{}: missing {}", name, missing.join(", "))),
            ));
        } else if !sensitive && !generic_reported {
            generic_reported = true;
            findings.push(Finding::new(
                scan_id,
                FindingType::SecurityCookie,
                "Cookie missing security flags",
                "A cookie is set without Secure/HttpOnly/SameSite attributes.",
                Severity::Moderate,
                "cookies",
                Some(format!("{}: missing {}", name, missing.join(", "))),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn titles(findings: &[Finding]) -> Vec<&str> {
        findings.iter().map(|f| f.title.as_str()).collect()
    }

    #[test]
    fn test_bare_https_response_flags_everything() {
        let findings = analyze_headers("scan-1", true, &HashMap::new(), &[]);
        let t = titles(&findings);
        assert!(t.contains(&"Content-Security-Policy header missing"));
        assert!(t.contains(&"Strict-Transport-Security header missing"));
        assert!(t.contains(&"X-Frame-Options header missing"));
        assert!(t.contains(&"X-Content-Type-Options header missing or invalid"));
        assert!(t.contains(&"Referrer-Policy header missing"));
        assert!(t.contains(&"Permissions-Policy header missing"));
        assert!(t.contains(&"Cross-Origin-Opener-Policy header missing or weak"));
        assert!(t.contains(&"Cross-Origin-Embedder-Policy header missing"));
        assert!(t.contains(&"Cross-Origin-Resource-Policy header missing"));
    }

    #[test]
    fn test_http_page_skips_hsts_and_isolation() {
        let findings = analyze_headers("scan-1", false, &HashMap::new(), &[]);
        let t = titles(&findings);
        assert!(!t.contains(&"Strict-Transport-Security header missing"));
        assert!(!t.contains(&"Cross-Origin-Embedder-Policy header missing"));
    }

    #[test]
    fn test_unsafe_csp_is_high() {
        let headers = headers_of(&[(
            "content-security-policy",
            "default-src 'self'; script-src 'unsafe-inline'",
        )]);
        let findings = analyze_headers("scan-1", false, &headers, &[]);
        let csp = findings
            .iter()
            .find(|f| f.title == "Content-Security-Policy allows unsafe directives")
            .unwrap();
        assert_eq!(csp.severity, Severity::High);
    }

    #[test]
    fn test_weak_frame_options() {
        let headers = headers_of(&[("x-frame-options", "ALLOW-FROM https://x.example")]);
        let findings = analyze_headers("scan-1", false, &headers, &[]);
        assert!(titles(&findings).contains(&"X-Frame-Options has a weak value"));
    }

    #[test]
    fn test_cors_wildcard_with_credentials_is_high() {
        let headers = headers_of(&[
            ("access-control-allow-origin", "*"),
            ("access-control-allow-credentials", "true"),
        ]);
        let findings = analyze_headers("scan-1", true, &headers, &[]);
        let cors = findings
            .iter()
            .find(|f| {
                f.title == "Insecure CORS configuration: wildcard origin with credentials"
            })
            .unwrap();
        assert_eq!(cors.severity, Severity::High);
    }

    #[test]
    fn test_cors_wildcard_alone_is_moderate() {
        let headers = headers_of(&[("access-control-allow-origin", "*")]);
        let findings = analyze_headers("scan-1", true, &headers, &[]);
        let cors = findings
            .iter()
            .find(|f| f.title == "CORS allows any origin")
            .unwrap();
        assert_eq!(cors.severity, Severity::Moderate);
    }

    #[test]
    fn test_cookie_flag_detection() {
        let cookies = vec![
            "session_id=abc123; Path=/".to_string(),
            "theme=dark".to_string(),
            "prefs=1; Secure; HttpOnly; SameSite=Lax".to_string(),
        ];
        let findings = analyze_headers("scan-1", true, &HashMap::new(), &cookies);

        let cookie_findings: Vec<_> = findings
            .iter()
            .filter(|f| f.finding_type == FindingType::SecurityCookie)
            .collect();
        assert_eq!(cookie_findings.len(), 2);

        let sensitive = cookie_findings
            .iter()
            .find(|f| f.title == "Sensitive cookie missing security flags")
            .unwrap();
        assert_eq!(sensitive.severity, Severity::High);
        assert!(sensitive.evidence.as_ref().unwrap().contains("session_id"));

        let generic = cookie_findings
            .iter()
            .find(|f| f.title == "Cookie missing security flags")
            .unwrap();
        assert_eq!(generic.severity, Severity::Moderate);
    }

    #[test]
    fn test_at_most_one_finding_per_cookie_class() {
        let cookies = vec![
            "auth=1".to_string(),
            "jwt=2".to_string(),
            "a=1".to_string(),
            "b=2".to_string(),
        ];
        let findings = analyze_headers("scan-1", true, &HashMap::new(), &cookies);
        let cookie_count = findings
            .iter()
            .filter(|f| f.finding_type == FindingType::SecurityCookie)
            .count();
        assert_eq!(cookie_count, 2);
    }

    #[test]
    fn test_fully_flagged_cookie_clean() {
        let cookies = vec!["session=x; Secure; HttpOnly; SameSite=Strict".to_string()];
        let findings = analyze_headers("scan-1", true, &HashMap::new(), &cookies);
        assert!(!findings
            .iter()
            .any(|f| f.finding_type == FindingType::SecurityCookie));
    }
}
